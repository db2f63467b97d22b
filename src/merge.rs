//! Joins catalog and local state into one `AddonDetails` per id.

use crate::addon::{AddonDetails, AddonStatus, CatalogEntry, InstalledAddon};
use std::collections::BTreeMap;

/// Local entries win: a catalog entry only shows up on its own when nothing of
/// that id is installed. Output is ordered by id.
pub fn list_addons(catalog: &[CatalogEntry], installed: &[InstalledAddon]) -> Vec<AddonDetails> {
    let mut merged: BTreeMap<String, AddonDetails> = installed
        .iter()
        .map(|addon| (addon.id.clone(), AddonDetails::from_installed(addon)))
        .collect();

    for entry in catalog {
        match merged.get_mut(&entry.id) {
            Some(local) => {
                let out_of_date = local
                    .installed_version
                    .as_ref()
                    .map_or(false, |installed| *installed < entry.version);
                if out_of_date {
                    local.status = AddonStatus::OutOfDate;
                }
                local.available_version = Some(entry.version.clone());
            }
            None => {
                merged.insert(entry.id.clone(), AddonDetails::from_catalog(entry));
            }
        }
    }

    merged.into_values().collect()
}
