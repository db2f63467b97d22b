//! ScraperDepot Core Library
//!
//! Installs, updates and removes metadata-scraper add-ons for a media center,
//! driven by a remotely published add-on catalog.
//!
//! # Architecture
//!
//! The library is consumed by the `scraperdepot` command line tool, and by any
//! other frontend that needs to keep an add-ons directory in step with a
//! catalog. All work is blocking and happens on the calling thread.
//!
//! # Core Features Implemented
//!
//! ## Local Add-ons (`registry` module)
//! - `scan_installed()` - Read every installed add-on descriptor under the add-ons root
//! - `AddonRegistry` - Snapshot of live add-ons and the scraper capabilities they provide
//!
//! ## Remote Catalog (`catalog` module)
//! - `fetch_catalog()` - Download `addons.xml`, check it against `addons.xml.md5`, parse it
//! - `HttpTransport` - Blocking HTTP with timeouts and bounded retries
//!
//! ## Resolution (`merge` and `resolver` modules)
//! - `list_addons()` - Merge local and remote state into `AddonDetails`
//! - `resolve_install()` - Add-ons to download for an install, following requirements
//! - `resolve_uninstall()` - Add-ons to delete for an uninstall, following dependents
//!
//! ## Management (`operations` module)
//! - `Updater::update()` - Update installed add-ons, or install the default set
//! - `Updater::install_addons()` - Install add-ons and their missing requirements
//! - `Updater::uninstall_addons()` - Remove add-ons and everything depending on them
//!
//! ## Data Structures (`addon` and `version` modules)
//! - `Version` - Dotted numeric version with numeric, zero-padded ordering
//! - `CatalogEntry` - Add-on as published in the catalog
//! - `InstalledAddon` - Add-on as found on disk
//! - `AddonDetails` - Merged view with its `AddonStatus`

pub mod addon;
pub mod catalog;
pub mod config;
pub mod console;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod merge;
pub mod operations;
pub mod registry;
pub mod resolver;
pub mod staging;
pub mod swap;
pub mod version;

pub use addon::{AddonDetails, AddonStatus, Capability, CatalogEntry, InstalledAddon, Requirement};
pub use catalog::{fetch_catalog, CatalogUrls, FetchedCatalog, HttpTransport, Transport};
pub use config::DepotConfig;
pub use console::{Console, StdConsole};
pub use error::{AddonError, ErrorKind, Result};
pub use merge::list_addons;
pub use operations::{Outcome, Updater, DEFAULT_ADDONS};
pub use registry::{scan_installed, AddonRegistry, RegisteredAddon};
pub use resolver::{resolve_install, resolve_uninstall};
pub use version::Version;
