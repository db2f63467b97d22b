//! Dependency resolution over the catalog (install) and the local graph
//! (uninstall).

use crate::addon::{CatalogEntry, InstalledAddon};
use crate::error::{AddonError, Result};
use crate::version::Version;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

struct Forward<'a> {
    catalog: HashMap<&'a str, &'a CatalogEntry>,
    installed: HashMap<&'a str, &'a Version>,
    expanded: HashSet<String>,
    fetch: BTreeSet<String>,
}

impl<'a> Forward<'a> {
    fn visit(&mut self, id: &str, min_version: &Version) {
        let satisfied = self
            .installed
            .get(id)
            .map_or(false, |installed| *installed >= min_version);

        // An installed add-on that is new enough is trusted together with
        // everything it requires.
        if satisfied {
            return;
        }

        let Some(entry) = self.catalog.get(id).copied() else {
            tracing::debug!("Requirement '{}' is not published in the catalog, skipping", id);
            return;
        };

        self.fetch.insert(id.to_string());
        if !self.expanded.insert(id.to_string()) {
            return;
        }

        for requirement in &entry.requires {
            self.visit(&requirement.id, &requirement.min_version);
        }
    }
}

/// Ids that must be downloaded so that every requested add-on is installed at
/// its catalog version together with its requirements.
///
/// Requested ids must be published in the catalog. Requirements missing from
/// the catalog are assumed to be provided by the media center and skipped.
pub fn resolve_install<S: AsRef<str>>(
    requested: &[S],
    catalog: &[CatalogEntry],
    installed: &[InstalledAddon],
) -> Result<BTreeSet<String>> {
    let mut forward = Forward {
        catalog: catalog.iter().map(|e| (e.id.as_str(), e)).collect(),
        installed: installed.iter().map(|a| (a.id.as_str(), &a.version)).collect(),
        expanded: HashSet::new(),
        fetch: BTreeSet::new(),
    };

    for id in requested {
        let id = id.as_ref();
        let entry = forward
            .catalog
            .get(id)
            .copied()
            .ok_or_else(|| AddonError::UnknownAddon(id.to_string()))?;
        forward.visit(id, &entry.version);
    }

    Ok(forward.fetch)
}

/// The requested ids plus every installed add-on that transitively requires
/// one of them.
pub fn resolve_uninstall<S: AsRef<str>>(requested: &[S], installed: &[InstalledAddon]) -> BTreeSet<String> {
    let mut removal: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = requested.iter().map(|s| s.as_ref().to_string()).collect();

    while let Some(id) = queue.pop_front() {
        if !removal.insert(id.clone()) {
            continue;
        }
        for dependent in installed.iter().filter(|a| a.requires.contains(&id)) {
            if !removal.contains(&dependent.id) {
                queue.push_back(dependent.id.clone());
            }
        }
    }

    removal
}
