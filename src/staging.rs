//! Scratch directory that collects freshly unpacked add-ons before they
//! replace the live ones.

use crate::error::{AddonError, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Hidden, so it can never be taken for an add-on id.
pub const STAGING_DIR_NAME: &str = ".newplugins";

/// Removed on drop; call [`StagingArea::close`] to observe removal errors.
#[derive(Debug)]
pub struct StagingArea {
    path: Option<PathBuf>,
}

impl StagingArea {
    /// Creates an empty staging area under `root`, discarding any leftover
    /// from an earlier crashed run.
    pub fn create(root: &Path) -> Result<Self> {
        let path = root.join(STAGING_DIR_NAME);
        if path.exists() {
            tracing::warn!("Removing stale staging directory {:?}", path);
            fs::remove_dir_all(&path).map_err(|e| AddonError::staging(&path, e))?;
        }
        fs::create_dir_all(&path).map_err(|e| AddonError::staging(&path, e))?;
        Ok(Self { path: Some(path) })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// True when a directory named `id` has already been staged.
    pub fn contains(&self, id: &str) -> bool {
        self.path().join(id).is_dir()
    }

    /// Names of the staged top-level directories, sorted.
    pub fn staged_ids(&self) -> Result<Vec<String>> {
        let dir = self.path();
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| AddonError::staging(dir, e))? {
            let entry = entry.map_err(|e| AddonError::staging(dir, e))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Unpacks `archive` into the staging area and checks that it produced a
    /// top-level directory named `id`.
    pub fn unpack(&self, archive: &Path, id: &str) -> Result<()> {
        extract_zip(archive, self.path())?;
        if !self.contains(id) {
            return Err(AddonError::Extraction(format!(
                "archive {:?} did not contain a '{}' directory",
                archive.file_name().unwrap_or_default(),
                id
            )));
        }
        Ok(())
    }

    /// Deletes the staging area.
    pub fn close(mut self) -> Result<()> {
        match self.path.take() {
            Some(path) => remove_if_present(&path),
            None => Ok(()),
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = remove_if_present(&path) {
                tracing::error!("Unable to delete staging directory: {}", e);
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| AddonError::staging(path, e))?;
    }
    Ok(())
}

/// Extracts every entry of a zip archive below `dest`. Entries that would
/// escape `dest` are rejected.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| AddonError::staging(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| AddonError::Extraction(format!("Failed to open archive {:?}: {}", archive, e)))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| AddonError::Extraction(format!("Failed to read archive entry: {}", e)))?;

        let relative = entry.enclosed_name().ok_or_else(|| {
            AddonError::Extraction(format!("archive entry '{}' has an unsafe path", entry.name()))
        })?;
        let outpath = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| AddonError::staging(&outpath, e))?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).map_err(|e| AddonError::staging(parent, e))?;
            }
            let mut outfile = File::create(&outpath).map_err(|e| AddonError::staging(&outpath, e))?;
            io::copy(&mut entry, &mut outfile).map_err(|e| AddonError::staging(&outpath, e))?;
        }
    }

    Ok(())
}
