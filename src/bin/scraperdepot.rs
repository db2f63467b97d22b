use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scraperdepot_core::logging::init_logging;
use scraperdepot_core::{AddonDetails, AddonRegistry, Console, DepotConfig, StdConsole, Updater, Version};
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

/// The updater has already written this failure to the console.
#[derive(Debug)]
struct Reported;

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation failed")
    }
}

impl std::error::Error for Reported {}

#[derive(Debug, Parser)]
#[command(name = "scraperdepot", version, about = "Manage media center scraper add-ons")]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List installed and available add-ons
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Update installed add-ons, or only the given ones
    Update { ids: Vec<String> },
    /// Install add-ons and their requirements
    Install {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Remove add-ons and everything that depends on them
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn display_version(version: Option<&Version>) -> String {
    version.map(Version::to_string).unwrap_or_default()
}

fn print_table(addons: &[AddonDetails]) {
    let headers = ["ID", "Status", "Installed Version", "Available Version"];
    let rows: Vec<[String; 4]> = addons
        .iter()
        .map(|ad| {
            [
                ad.id.clone(),
                ad.status.display_name().to_string(),
                display_version(ad.installed_version.as_ref()),
                display_version(ad.available_version.as_ref()),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!("{}", line(headers));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &rows {
        println!("{}", line([row[0].as_str(), row[1].as_str(), row[2].as_str(), row[3].as_str()]));
    }
}

fn run(cli: Cli, console: &StdConsole) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(DepotConfig::default_path);
    let config = DepotConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    init_logging(&config.logging)?;

    let updater = Updater::from_config(&config)?;
    let registry = AddonRegistry::load(updater.addons_dir())
        .with_context(|| format!("Failed to read add-ons in {:?}", updater.addons_dir()))?;

    match cli.command {
        Command::List { json } => {
            let addons = updater.list_addons(console).map_err(|_| Reported)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&addons)?);
            } else {
                print_table(&addons);
            }
        }
        Command::Update { ids } => {
            let outcome = if ids.is_empty() {
                updater.update(console, registry).map_err(|_| Reported)?
            } else {
                updater.update_addons(console, &ids, registry).map_err(|_| Reported)?
            };
            console.info(&format!("Updated {} add-on(s)", outcome.count));
        }
        Command::Install { ids } => {
            let outcome = updater.install_addons(console, &ids, registry).map_err(|_| Reported)?;
            console.info(&format!("Installed {} add-on(s)", outcome.count));
        }
        Command::Remove { ids } => {
            let outcome = updater.uninstall_addons(console, &ids, registry).map_err(|_| Reported)?;
            console.info(&format!("Removed {} add-on(s)", outcome.count));
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let console = StdConsole;

    match run(cli, &console) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.downcast_ref::<Reported>().is_none() {
                console.error(&format!("Error: {:#}", e));
            }
            ExitCode::FAILURE
        }
    }
}
