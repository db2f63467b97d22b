//! Discovery of add-ons installed under the add-ons root.
//!
//! Every subdirectory holding an `addon.xml` is an add-on whose id is the
//! directory name. Directories without a descriptor are not add-ons and are
//! skipped; hidden directories (the staging area, swap backups) are never
//! considered. A descriptor that cannot be parsed fails the whole scan so a
//! corrupted installation is reported instead of silently disappearing.

use crate::addon::{Capability, InstalledAddon};
use crate::descriptor::{parse_local, LocalDescriptor};
use crate::error::{AddonError, Result};
use crate::version::Version;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the descriptor file inside each add-on directory.
pub const DESCRIPTOR_FILE: &str = "addon.xml";

/// Reads one add-on directory. `Ok(None)` means "not an add-on".
fn read_addon_dir(dir: &Path) -> Result<Option<(InstalledAddon, LocalDescriptor)>> {
    let Some(id) = dir.file_name().map(|n| n.to_string_lossy().to_string()) else {
        return Ok(None);
    };
    if id.starts_with('.') {
        return Ok(None);
    }

    let descriptor_path = dir.join(DESCRIPTOR_FILE);
    if !descriptor_path.is_file() {
        return Ok(None);
    }

    let bytes = fs::read(&descriptor_path)
        .map_err(|e| AddonError::io(format!("Failed to read {:?}", descriptor_path), e))?;
    let descriptor = parse_local(&bytes, &id).map_err(|e| match e {
        AddonError::Parse(msg) => {
            AddonError::Parse(format!("unable to read add-on version from {:?}: {}", descriptor_path, msg))
        }
        other => other,
    })?;

    let addon = InstalledAddon {
        id,
        version: descriptor.version.clone(),
        requires: descriptor.requires.clone(),
        install_path: dir.to_path_buf(),
    };
    Ok(Some((addon, descriptor)))
}

fn scan_descriptors(root: &Path) -> Result<BTreeMap<String, (InstalledAddon, LocalDescriptor)>> {
    let mut found = BTreeMap::new();

    // Nothing installed yet
    if !root.exists() {
        return Ok(found);
    }

    let entries = fs::read_dir(root)
        .map_err(|e| AddonError::io(format!("Failed to read directory: {:?}", root), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| AddonError::io(format!("Failed to read directory: {:?}", root), e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        if let Some((addon, descriptor)) = read_addon_dir(&path)? {
            tracing::debug!(id = %addon.id, version = %addon.version, "found installed add-on");
            found.insert(addon.id.clone(), (addon, descriptor));
        }
    }

    Ok(found)
}

/// Scans `root` and returns the installed add-ons ordered by id.
pub fn scan_installed(root: &Path) -> Result<Vec<InstalledAddon>> {
    Ok(scan_descriptors(root)?
        .into_values()
        .map(|(addon, _)| addon)
        .collect())
}

/// True when `root` holds no installed add-on.
pub fn is_empty_root(root: &Path) -> Result<bool> {
    Ok(scan_descriptors(root)?.is_empty())
}

/// A live add-on known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredAddon {
    pub id: String,
    pub name: Option<String>,
    pub provider: Option<String>,
    pub version: Version,
    pub path: PathBuf,
    pub capabilities: BTreeSet<Capability>,
}

/// Snapshot of the add-ons available to the rest of the application.
///
/// The updater consumes a registry and hands back a freshly loaded one, so
/// holders never observe a half-updated add-ons root.
#[derive(Debug, Clone, Default)]
pub struct AddonRegistry {
    addons: BTreeMap<String, RegisteredAddon>,
}

impl AddonRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers every add-on currently installed under `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let addons = scan_descriptors(root)?
            .into_iter()
            .map(|(id, (addon, descriptor))| {
                let registered = RegisteredAddon {
                    id: addon.id,
                    name: descriptor.name,
                    provider: descriptor.provider,
                    version: addon.version,
                    path: addon.install_path,
                    capabilities: descriptor.capabilities,
                };
                (id, registered)
            })
            .collect();

        Ok(Self { addons })
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredAddon> {
        self.addons.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.addons.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }

    /// First add-on, in id order, that provides `capability`.
    pub fn default_for(&self, capability: Capability) -> Option<&RegisteredAddon> {
        self.addons
            .values()
            .find(|a| a.capabilities.contains(&capability))
    }
}
