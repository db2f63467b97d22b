use crate::version::Version;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// A dependency edge: `id` must be present at `min_version` or newer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub id: String,
    pub min_version: Version,
}

/// One `<addon>` element of the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub version: Version,
    pub requires: Vec<Requirement>,
}

impl CatalogEntry {
    pub fn required_ids(&self) -> BTreeSet<String> {
        self.requires.iter().map(|r| r.id.clone()).collect()
    }
}

/// An add-on unpacked under the add-ons root. Only requirement ids are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledAddon {
    pub id: String,
    pub version: Version,
    pub requires: BTreeSet<String>,
    pub install_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddonStatus {
    Installed,
    NotInstalled,
    OutOfDate,
}

impl AddonStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            AddonStatus::Installed => "Installed",
            AddonStatus::NotInstalled => "Not installed",
            AddonStatus::OutOfDate => "Out of date",
        }
    }
}

impl fmt::Display for AddonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Merged local/remote view of one add-on, as returned by `list_addons`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddonDetails {
    pub id: String,
    pub installed_version: Option<Version>,
    pub available_version: Option<Version>,
    pub status: AddonStatus,
    pub required_addons: BTreeSet<String>,
}

impl AddonDetails {
    pub(crate) fn from_catalog(entry: &CatalogEntry) -> Self {
        Self {
            id: entry.id.clone(),
            installed_version: None,
            available_version: Some(entry.version.clone()),
            status: AddonStatus::NotInstalled,
            required_addons: entry.required_ids(),
        }
    }

    pub(crate) fn from_installed(addon: &InstalledAddon) -> Self {
        Self {
            id: addon.id.clone(),
            installed_version: Some(addon.version.clone()),
            available_version: None,
            status: AddonStatus::Installed,
            required_addons: addon.requires.clone(),
        }
    }
}

/// What an installed add-on provides, taken from its `<extension point>` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Capability {
    MovieScraper,
    TvScraper,
    MusicScraper,
    ScraperLibrary,
}

impl Capability {
    /// Maps an extension point name; unrelated points yield `None`.
    pub fn from_extension_point(point: &str) -> Option<Self> {
        match point {
            "xbmc.metadata.scraper.movies" => Some(Capability::MovieScraper),
            "xbmc.metadata.scraper.tvshows" => Some(Capability::TvScraper),
            "xbmc.metadata.scraper.albums"
            | "xbmc.metadata.scraper.artists"
            | "xbmc.metadata.scraper.musicvideos" => Some(Capability::MusicScraper),
            "xbmc.metadata.scraper.library" => Some(Capability::ScraperLibrary),
            _ => None,
        }
    }
}
