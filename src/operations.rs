//! Add-on management operations (list, update, install, uninstall).
//!
//! Every mutating run follows the same sequence and stops at the first
//! unrecoverable error:
//! - fetch and verify the catalog
//! - determine which add-ons have to be downloaded
//! - download and unpack them into the staging area
//! - swap the staged directories into the add-ons root
//! - remove the staging area and temporary catalog
//!
//! Nothing in the add-ons root is touched before the catalog has been fetched,
//! and the staging area is gone when a run returns, whatever the outcome.
//! Directories already swapped in before a failure stay swapped in.

use crate::addon::{AddonDetails, CatalogEntry, InstalledAddon};
use crate::catalog::{artifact_file_name, fetch_catalog, CatalogUrls, FetchedCatalog, HttpTransport, TempPath, Transport};
use crate::config::DepotConfig;
use crate::console::Console;
use crate::error::{AddonError, Result};
use crate::merge::list_addons;
use crate::registry::{is_empty_root, scan_installed, AddonRegistry};
use crate::resolver::{resolve_install, resolve_uninstall};
use crate::staging::StagingArea;
use crate::swap::{self, LockGuard};
use std::fs;
use std::path::{Path, PathBuf};

/// Scrapers installed by a bare `update` when nothing is installed yet.
pub const DEFAULT_ADDONS: [&str; 3] = [
    "metadata.themoviedb.org",
    "metadata.tvdb.com",
    "metadata.imdb.com",
];

/// Copy of the last catalog a run succeeded with.
const STORED_CATALOG_NAME: &str = "addons.xml";

/// Result of a mutating run.
#[derive(Debug)]
pub struct Outcome {
    /// Add-ons installed, updated or removed.
    pub count: usize,
    /// Registry reloaded from the add-ons root after the run.
    pub registry: AddonRegistry,
}

enum Target<'a> {
    /// Installed add-ons, or the default set on first run.
    Installed,
    Explicit(&'a [String]),
}

/// Installs, updates and removes add-ons under one add-ons root.
pub struct Updater {
    addons_dir: PathBuf,
    urls: CatalogUrls,
    transport: Box<dyn Transport>,
}

impl Updater {
    pub fn new(addons_dir: impl Into<PathBuf>, urls: CatalogUrls, transport: Box<dyn Transport>) -> Self {
        Self {
            addons_dir: addons_dir.into(),
            urls,
            transport,
        }
    }

    /// Updater talking HTTP to the configured catalog.
    pub fn from_config(config: &DepotConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.network)?;
        Ok(Self::new(
            config.addons_dir.clone(),
            CatalogUrls::new(config.catalog_base()),
            Box::new(transport),
        ))
    }

    pub fn addons_dir(&self) -> &Path {
        &self.addons_dir
    }

    /// True when no add-on has been installed yet.
    pub fn is_first_time(&self) -> Result<bool> {
        is_empty_root(&self.addons_dir)
    }

    /// Current state of every add-on known locally or to the catalog.
    pub fn list_addons(&self, console: &dyn Console) -> Result<Vec<AddonDetails>> {
        report(console, self.run_list())
    }

    /// Updates every installed add-on, or installs the default set when
    /// nothing is installed.
    ///
    /// `registry` is consumed; on failure reload it with [`AddonRegistry::load`].
    pub fn update(&self, console: &dyn Console, registry: AddonRegistry) -> Result<Outcome> {
        drop(registry);
        let count = report(console, self.run_update(console, Target::Installed))?;
        self.finish(count)
    }

    /// Brings the given add-ons, and whatever they require, up to the catalog version.
    pub fn update_addons(&self, console: &dyn Console, ids: &[String], registry: AddonRegistry) -> Result<Outcome> {
        drop(registry);
        let count = report(console, self.run_update(console, Target::Explicit(ids)))?;
        self.finish(count)
    }

    /// Installs the given add-ons together with their missing requirements.
    pub fn install_addons(&self, console: &dyn Console, ids: &[String], registry: AddonRegistry) -> Result<Outcome> {
        self.update_addons(console, ids, registry)
    }

    /// Removes the given add-ons and every installed add-on that depends on them.
    pub fn uninstall_addons(&self, console: &dyn Console, ids: &[String], registry: AddonRegistry) -> Result<Outcome> {
        drop(registry);
        let count = report(console, self.run_uninstall(console, ids))?;
        self.finish(count)
    }

    fn finish(&self, count: usize) -> Result<Outcome> {
        Ok(Outcome {
            count,
            registry: AddonRegistry::load(&self.addons_dir)?,
        })
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.addons_dir).map_err(|e| {
            AddonError::io(format!("Failed to create add-ons directory: {:?}", self.addons_dir), e)
        })
    }

    fn fetch(&self) -> Result<FetchedCatalog> {
        self.ensure_root()?;
        fetch_catalog(self.transport.as_ref(), &self.urls, &self.addons_dir)
    }

    fn run_list(&self) -> Result<Vec<AddonDetails>> {
        let catalog = self.fetch()?;
        let installed = scan_installed(&self.addons_dir)?;
        Ok(list_addons(&catalog.entries, &installed))
    }

    fn stored_catalog_path(&self) -> PathBuf {
        self.addons_dir.join(STORED_CATALOG_NAME)
    }

    fn catalog_unchanged(&self, catalog: &FetchedCatalog) -> bool {
        fs::read(self.stored_catalog_path())
            .map(|stored| stored == catalog.bytes)
            .unwrap_or(false)
    }

    fn store_catalog(&self, catalog: &FetchedCatalog) -> Result<()> {
        let path = self.stored_catalog_path();
        fs::write(&path, &catalog.bytes)
            .map_err(|e| AddonError::io(format!("Failed to store catalog {:?}", path), e))
    }

    /// Ids a bare update starts from; `None` when the catalog has not changed
    /// since the last successful run.
    fn seed_ids(
        &self,
        console: &dyn Console,
        catalog: &FetchedCatalog,
        installed: &[InstalledAddon],
    ) -> Option<Vec<String>> {
        let candidates: Vec<String> = if installed.is_empty() {
            DEFAULT_ADDONS.iter().map(|id| id.to_string()).collect()
        } else {
            if self.catalog_unchanged(catalog) {
                console.info("No scraper updates found.");
                return None;
            }
            installed.iter().map(|a| a.id.clone()).collect()
        };

        Some(
            candidates
                .into_iter()
                .filter(|id| {
                    let published = catalog.entry(id).is_some();
                    if !published {
                        tracing::debug!("'{}' is not published in the catalog, not updating it", id);
                    }
                    published
                })
                .collect(),
        )
    }

    fn run_update(&self, console: &dyn Console, target: Target<'_>) -> Result<usize> {
        self.ensure_root()?;
        let _lock = LockGuard::acquire(&self.addons_dir)?;
        let restored = swap::recover(&self.addons_dir)?;
        if restored > 0 {
            console.info(&format!("Restored {} add-on(s) from an interrupted update", restored));
        }

        let catalog = self.fetch()?;
        let installed = scan_installed(&self.addons_dir)?;

        let seeds = match target {
            Target::Installed => match self.seed_ids(console, &catalog, &installed) {
                Some(seeds) => seeds,
                None => return Ok(0),
            },
            Target::Explicit(ids) => ids.to_vec(),
        };
        let required = resolve_install(&seeds, &catalog.entries, &installed)?;
        tracing::info!(?required, "Resolved add-ons to download");

        let staging = StagingArea::create(&self.addons_dir)?;
        for id in &required {
            let Some(entry) = catalog.entry(id) else {
                continue;
            };
            if staging.contains(id) {
                continue;
            }
            let current = installed.iter().find(|a| a.id == *id).map(|a| &a.version);
            if let Some(current) = current {
                if entry.version <= *current {
                    tracing::warn!(
                        "Catalog offers '{}' {} but {} is installed, keeping the installed copy",
                        id,
                        entry.version,
                        current
                    );
                    continue;
                }
            }
            self.download_addon(console, &staging, entry)?;
        }

        let count = swap::swap_into_live(&self.addons_dir, &staging, console)?;
        staging.close()?;
        self.store_catalog(&catalog)?;
        Ok(count)
    }

    /// Downloads one artifact into the staging area and unpacks it there.
    fn download_addon(&self, console: &dyn Console, staging: &StagingArea, entry: &CatalogEntry) -> Result<()> {
        let url = self.urls.artifact(&entry.id, &entry.version);
        let archive = TempPath::new(staging.path().join(artifact_file_name(&entry.id, &entry.version)));

        tracing::debug!("Downloading {}", url);
        self.transport.download(&url, archive.path())?;
        staging.unpack(archive.path(), &entry.id)?;

        console.info(&format!("Downloaded plugin '{}' version={}", entry.id, entry.version));
        Ok(())
    }

    fn run_uninstall(&self, console: &dyn Console, ids: &[String]) -> Result<usize> {
        self.ensure_root()?;
        let _lock = LockGuard::acquire(&self.addons_dir)?;
        swap::recover(&self.addons_dir)?;

        let installed = scan_installed(&self.addons_dir)?;
        let removal = resolve_uninstall(ids, &installed);

        // Refuse before deleting anything
        if let Some(missing) = removal.iter().find(|id| !installed.iter().any(|a| a.id == **id)) {
            return Err(AddonError::Integrity(format!(
                "unable to find add-on directory: {:?}",
                self.addons_dir.join(missing)
            )));
        }

        for id in &removal {
            console.info(&format!("Uninstalling addon {}", id));
            let dir = self.addons_dir.join(id);
            fs::remove_dir_all(&dir)
                .map_err(|e| AddonError::io(format!("Unable to uninstall add-on directory: {:?}", dir), e))?;
        }

        Ok(removal.len())
    }
}

/// Echoes a failure to the console before handing it back.
fn report<T>(console: &dyn Console, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        console.error(&e.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::AddonStatus;
    use crate::catalog::md5_hex;
    use crate::error::ErrorKind;
    use crate::staging::STAGING_DIR_NAME;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::{Cursor, Write};
    use std::rc::Rc;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const BASE: &str = "http://repo";

    #[derive(Default)]
    struct Recorder {
        info: RefCell<Vec<String>>,
        errors: RefCell<Vec<String>>,
    }

    impl Console for Recorder {
        fn info(&self, message: &str) {
            self.info.borrow_mut().push(message.to_string());
        }
        fn error(&self, message: &str) {
            self.errors.borrow_mut().push(message.to_string());
        }
    }

    /// Serves canned bodies and remembers which URLs were requested.
    struct FakeRepo {
        files: HashMap<String, Vec<u8>>,
        requests: Rc<RefCell<Vec<String>>>,
    }

    impl Transport for FakeRepo {
        fn download(&self, url: &str, dest: &Path) -> Result<()> {
            self.requests.borrow_mut().push(url.to_string());
            let body = self.files.get(url).ok_or_else(|| AddonError::Network {
                url: url.to_string(),
                message: "404 Not Found".to_string(),
            })?;
            fs::write(dest, body).map_err(|e| AddonError::io("fake download", e))
        }
    }

    fn descriptor(id: &str, version: &str, requires: &[(&str, &str)]) -> String {
        let imports: String = requires
            .iter()
            .map(|(dep, min)| format!(r#"<import addon="{}" version="{}"/>"#, dep, min))
            .collect();
        format!(
            r#"<addon id="{}" version="{}"><requires>{}</requires></addon>"#,
            id, version, imports
        )
    }

    fn zip_of(files: &[(String, String)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in files {
            writer.start_file(name.as_str(), SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Catalog entry plus the artifact that installs it.
    struct Published {
        id: &'static str,
        version: &'static str,
        requires: Vec<(&'static str, &'static str)>,
    }

    fn published(id: &'static str, version: &'static str, requires: &[(&'static str, &'static str)]) -> Published {
        Published {
            id,
            version,
            requires: requires.to_vec(),
        }
    }

    fn repo(addons: &[Published]) -> (FakeRepo, Rc<RefCell<Vec<String>>>) {
        let mut catalog = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<addons>\n");
        let mut files = HashMap::new();
        for addon in addons {
            let xml = descriptor(addon.id, addon.version, &addon.requires);
            catalog.push_str(&xml);
            catalog.push('\n');
            let archive = zip_of(&[(format!("{}/addon.xml", addon.id), xml)]);
            files.insert(format!("{0}/{1}/{1}-{2}.zip", BASE, addon.id, addon.version), archive);
        }
        catalog.push_str("</addons>\n");

        files.insert(format!("{}/addons.xml.md5", BASE), md5_hex(catalog.as_bytes()).into_bytes());
        files.insert(format!("{}/addons.xml", BASE), catalog.into_bytes());

        let requests = Rc::new(RefCell::new(Vec::new()));
        (
            FakeRepo {
                files,
                requests: Rc::clone(&requests),
            },
            requests,
        )
    }

    fn updater(root: &Path, repo: FakeRepo) -> Updater {
        Updater::new(root, CatalogUrls::new(BASE), Box::new(repo))
    }

    fn install_locally(root: &Path, id: &str, version: &str, requires: &[(&str, &str)]) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("addon.xml"), descriptor(id, version, requires)).unwrap();
    }

    fn artifacts(requests: &Rc<RefCell<Vec<String>>>) -> Vec<String> {
        let mut zips: Vec<String> = requests
            .borrow()
            .iter()
            .filter(|url| url.ends_with(".zip"))
            .cloned()
            .collect();
        zips.sort();
        zips
    }

    fn root_entries(root: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn default_catalog() -> Vec<Published> {
        vec![
            published("metadata.themoviedb.org", "3.1.0", &[("metadata.common.themoviedb.org", "2.0")]),
            published("metadata.common.themoviedb.org", "2.1.0", &[]),
            published("metadata.tvdb.com", "1.5.0", &[]),
            published("metadata.imdb.com", "1.0.2", &[]),
        ]
    }

    #[test]
    fn first_update_installs_default_set_then_finds_nothing_new() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("addons");
        let (fake, requests) = repo(&default_catalog());
        let updater = updater(&root, fake);
        let console = Recorder::default();

        assert!(updater.is_first_time().unwrap());
        let outcome = updater.update(&console, AddonRegistry::empty()).unwrap();
        assert_eq!(outcome.count, 4);
        assert_eq!(outcome.registry.len(), 4);
        assert!(outcome.registry.get("metadata.common.themoviedb.org").is_some());
        assert!(!updater.is_first_time().unwrap());
        assert_eq!(artifacts(&requests).len(), 4);
        assert!(console
            .info
            .borrow()
            .contains(&"Installed plugin 'metadata.tvdb.com'".to_string()));

        requests.borrow_mut().clear();
        let outcome = updater.update(&console, outcome.registry).unwrap();
        assert_eq!(outcome.count, 0);
        assert!(artifacts(&requests).is_empty());
        assert_eq!(console.info.borrow().last().map(String::as_str), Some("No scraper updates found."));
        assert!(console.errors.borrow().is_empty());
    }

    #[test]
    fn install_fetches_unsatisfied_requirements() {
        let tmp = TempDir::new().unwrap();
        let (fake, requests) = repo(&[
            published("A", "1.0", &[("B", "2.0")]),
            published("B", "2.1", &[]),
        ]);
        let updater = updater(tmp.path(), fake);
        let console = Recorder::default();

        let outcome = updater.install_addons(&console, &ids(&["A"]), AddonRegistry::empty()).unwrap();
        assert_eq!(outcome.count, 2);
        assert_eq!(
            artifacts(&requests),
            vec!["http://repo/A/A-1.0.zip".to_string(), "http://repo/B/B-2.1.zip".to_string()]
        );
        assert_eq!(outcome.registry.get("B").unwrap().version.to_string(), "2.1");
    }

    #[test]
    fn install_skips_satisfied_requirements() {
        let tmp = TempDir::new().unwrap();
        install_locally(tmp.path(), "B", "2.0", &[]);
        let (fake, requests) = repo(&[
            published("A", "1.0", &[("B", "2.0")]),
            published("B", "2.1", &[]),
        ]);
        let updater = updater(tmp.path(), fake);

        let outcome = updater
            .install_addons(&Recorder::default(), &ids(&["A"]), AddonRegistry::empty())
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert_eq!(artifacts(&requests), vec!["http://repo/A/A-1.0.zip".to_string()]);
        assert_eq!(outcome.registry.get("B").unwrap().version.to_string(), "2.0");
    }

    #[test]
    fn update_replaces_outdated_copy() {
        let tmp = TempDir::new().unwrap();
        install_locally(tmp.path(), "A", "1.0", &[]);
        fs::write(tmp.path().join("A").join("stale.txt"), "old").unwrap();
        let (fake, _) = repo(&[published("A", "1.1", &[])]);
        let updater = updater(tmp.path(), fake);

        let outcome = updater.update(&Recorder::default(), AddonRegistry::empty()).unwrap();
        assert_eq!(outcome.count, 1);
        assert_eq!(outcome.registry.get("A").unwrap().version.to_string(), "1.1");
        assert!(!tmp.path().join("A").join("stale.txt").exists());
        assert_eq!(root_entries(tmp.path()), ids(&["A", "addons.xml"]));
    }

    #[test]
    fn uninstall_removes_dependents() {
        let tmp = TempDir::new().unwrap();
        install_locally(tmp.path(), "A", "1.0", &[("B", "2.0")]);
        install_locally(tmp.path(), "B", "2.0", &[]);
        install_locally(tmp.path(), "C", "1.0", &[]);
        let (fake, requests) = repo(&[]);
        let updater = updater(tmp.path(), fake);
        let console = Recorder::default();

        let outcome = updater
            .uninstall_addons(&console, &ids(&["B"]), AddonRegistry::empty())
            .unwrap();
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.registry.ids().collect::<Vec<_>>(), vec!["C"]);
        assert_eq!(root_entries(tmp.path()), ids(&["C"]));
        assert!(requests.borrow().is_empty());
        assert_eq!(
            *console.info.borrow(),
            ids(&["Uninstalling addon A", "Uninstalling addon B"])
        );
    }

    #[test]
    fn uninstall_of_missing_addon_deletes_nothing() {
        let tmp = TempDir::new().unwrap();
        install_locally(tmp.path(), "A", "1.0", &[]);
        let (fake, _) = repo(&[]);
        let updater = updater(tmp.path(), fake);
        let console = Recorder::default();

        let err = updater
            .uninstall_addons(&console, &ids(&["A", "ghost"]), AddonRegistry::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(tmp.path().join("A").is_dir());
        assert_eq!(console.errors.borrow().len(), 1);
    }

    #[test]
    fn checksum_mismatch_leaves_root_untouched() {
        let tmp = TempDir::new().unwrap();
        install_locally(tmp.path(), "A", "1.0", &[]);
        let (mut fake, requests) = repo(&[published("A", "1.1", &[])]);
        fake.files
            .insert(format!("{}/addons.xml.md5", BASE), b"00000000000000000000000000000000".to_vec());
        let updater = updater(tmp.path(), fake);
        let console = Recorder::default();

        let descriptor_before = fs::read(tmp.path().join("A").join("addon.xml")).unwrap();

        let err = updater.update(&console, AddonRegistry::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(artifacts(&requests).is_empty());
        assert_eq!(root_entries(tmp.path()), ids(&["A"]));
        assert_eq!(root_entries(&tmp.path().join("A")), ids(&["addon.xml"]));
        assert_eq!(fs::read(tmp.path().join("A").join("addon.xml")).unwrap(), descriptor_before);
        assert!(!tmp.path().join(".addons.xml.new").exists());
        assert!(!tmp.path().join(STAGING_DIR_NAME).exists());
        assert_eq!(console.errors.borrow().len(), 1);
    }

    #[test]
    fn archive_without_addon_directory_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let (mut fake, _) = repo(&[published("A", "1.0", &[])]);
        fake.files.insert(
            format!("{}/A/A-1.0.zip", BASE),
            zip_of(&[("Other/addon.xml".to_string(), descriptor("Other", "1.0", &[]))]),
        );
        let updater = updater(tmp.path(), fake);

        let err = updater
            .install_addons(&Recorder::default(), &ids(&["A"]), AddonRegistry::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert!(!tmp.path().join(STAGING_DIR_NAME).exists());
        assert!(root_entries(tmp.path()).is_empty());
    }

    #[test]
    fn unknown_addon_is_reported() {
        let tmp = TempDir::new().unwrap();
        let (fake, requests) = repo(&[published("A", "1.0", &[])]);
        let updater = updater(tmp.path(), fake);
        let console = Recorder::default();

        let err = updater
            .install_addons(&console, &ids(&["nope"]), AddonRegistry::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownAddon);
        assert!(artifacts(&requests).is_empty());
        assert!(console.errors.borrow()[0].contains("nope"));
    }

    #[test]
    fn concurrent_run_is_refused() {
        let tmp = TempDir::new().unwrap();
        let (fake, requests) = repo(&[published("A", "1.0", &[])]);
        let updater = updater(tmp.path(), fake);

        let _held = LockGuard::acquire(tmp.path()).unwrap();
        let err = updater
            .install_addons(&Recorder::default(), &ids(&["A"]), AddonRegistry::empty())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);
        assert!(requests.borrow().is_empty());
    }

    #[test]
    fn list_merges_local_and_catalog_state() {
        let tmp = TempDir::new().unwrap();
        install_locally(tmp.path(), "A", "1.0", &[]);
        install_locally(tmp.path(), "B", "2.0", &[]);
        install_locally(tmp.path(), "local.only", "0.1", &[]);
        let (fake, _) = repo(&[
            published("A", "1.1", &[]),
            published("B", "2.0", &[]),
            published("C", "3.0", &[("A", "1.0")]),
        ]);
        let updater = updater(tmp.path(), fake);

        let list = updater.list_addons(&Recorder::default()).unwrap();
        let statuses: Vec<(&str, AddonStatus)> = list.iter().map(|d| (d.id.as_str(), d.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("A", AddonStatus::OutOfDate),
                ("B", AddonStatus::Installed),
                ("C", AddonStatus::NotInstalled),
                ("local.only", AddonStatus::Installed),
            ]
        );
        assert!(list[2].required_addons.contains("A"));
    }
}
