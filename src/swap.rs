//! Moving staged add-ons into the live root, plus the lock that keeps two runs
//! from doing so at the same time.
//!
//! Each replacement is recorded in `.swap-journal.json` before the live
//! directory is touched: the live copy is renamed to `.{id}.old`, the staged
//! copy is renamed into place, then the backup is deleted. If the process dies
//! in between, [`recover`] puts the backup back (or discards it when the new
//! copy already landed) on the next run.

use crate::console::Console;
use crate::error::{AddonError, Result};
use crate::staging::StagingArea;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = ".scraperdepot.lock";
const JOURNAL_FILE_NAME: &str = ".swap-journal.json";

/// Exclusive hold on an add-ons root; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE_NAME);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(AddonError::Locked(path));
            }
            Err(e) => return Err(AddonError::io(format!("Failed to create lock file {:?}", path), e)),
        };

        let stamp = format!("{} {}\n", std::process::id(), chrono::Local::now().to_rfc3339());
        if let Err(e) = file.write_all(stamp.as_bytes()) {
            let _ = fs::remove_file(&path);
            return Err(AddonError::io(format!("Failed to write lock file {:?}", path), e));
        }

        Ok(Self { path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove lock file {:?}: {}", self.path, e);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct SwapJournal {
    pending: Vec<PendingSwap>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct PendingSwap {
    id: String,
    started: String,
}

impl SwapJournal {
    fn path(root: &Path) -> PathBuf {
        root.join(JOURNAL_FILE_NAME)
    }

    fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| AddonError::io(format!("Failed to read swap journal {:?}", path), e))?;
        serde_json::from_str(&contents)
            .map_err(|e| AddonError::Parse(format!("corrupt swap journal {:?}: {}", path, e)))
    }

    fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        if self.pending.is_empty() {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| AddonError::io(format!("Failed to remove swap journal {:?}", path), e))?;
            }
            return Ok(());
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AddonError::Parse(format!("unable to encode swap journal: {}", e)))?;
        let temp = root.join(format!("{}.tmp", JOURNAL_FILE_NAME));
        fs::write(&temp, content)
            .map_err(|e| AddonError::io(format!("Failed to write swap journal {:?}", temp), e))?;
        fs::rename(&temp, &path)
            .map_err(|e| AddonError::io(format!("Failed to write swap journal {:?}", path), e))
    }
}

fn backup_path(root: &Path, id: &str) -> PathBuf {
    root.join(format!(".{}.old", id))
}

fn remove_dir(path: &Path) -> Result<()> {
    fs::remove_dir_all(path).map_err(|e| AddonError::io(format!("Failed to remove directory: {:?}", path), e))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| AddonError::io(format!("Failed to move {:?} to {:?}", from, to), e))
}

/// Replaces live add-ons with every directory in `staging`. Returns how many
/// were installed or updated.
pub fn swap_into_live(root: &Path, staging: &StagingArea, console: &dyn Console) -> Result<usize> {
    let mut journal = SwapJournal::load(root)?;
    let mut count = 0;

    for id in staging.staged_ids()? {
        let live = root.join(&id);
        let backup = backup_path(root, &id);

        journal.pending.push(PendingSwap {
            id: id.clone(),
            started: chrono::Local::now().to_rfc3339(),
        });
        journal.save(root)?;

        if backup.exists() {
            remove_dir(&backup)?;
        }
        if live.exists() {
            rename(&live, &backup)?;
        }
        rename(&staging.path().join(&id), &live)?;
        if backup.exists() {
            remove_dir(&backup)?;
        }

        journal.pending.retain(|p| p.id != id);
        journal.save(root)?;

        console.info(&format!("Installed plugin '{}'", id));
        count += 1;
    }

    Ok(count)
}

/// Finishes or undoes swaps interrupted by a crash. Returns the number of
/// add-ons restored from their backup.
pub fn recover(root: &Path) -> Result<usize> {
    let journal = SwapJournal::load(root)?;
    let mut restored = 0;

    for pending in &journal.pending {
        let live = root.join(&pending.id);
        let backup = backup_path(root, &pending.id);

        if !backup.exists() {
            continue;
        }
        if live.exists() {
            tracing::info!("Discarding backup of '{}' left by an interrupted update", pending.id);
            remove_dir(&backup)?;
        } else {
            tracing::warn!(
                "Restoring '{}' after an update interrupted at {}",
                pending.id,
                pending.started
            );
            rename(&backup, &live)?;
            restored += 1;
        }
    }

    SwapJournal::default().save(root)?;
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<String>>);

    impl Console for Recorder {
        fn info(&self, message: &str) {
            self.0.borrow_mut().push(message.to_string());
        }
        fn error(&self, message: &str) {
            self.0.borrow_mut().push(message.to_string());
        }
    }

    #[test]
    fn lock_is_exclusive_and_released() {
        let tmp = TempDir::new().unwrap();
        let guard = LockGuard::acquire(tmp.path()).unwrap();
        let err = LockGuard::acquire(tmp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);
        drop(guard);
        assert!(LockGuard::acquire(tmp.path()).is_ok());
    }

    #[test]
    fn swap_replaces_live_directories() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a").join("old.txt"), "old").unwrap();

        let staging = StagingArea::create(root).unwrap();
        fs::create_dir_all(staging.path().join("a")).unwrap();
        fs::write(staging.path().join("a").join("new.txt"), "new").unwrap();
        fs::create_dir_all(staging.path().join("b")).unwrap();

        let console = Recorder::default();
        assert_eq!(swap_into_live(root, &staging, &console).unwrap(), 2);
        assert!(root.join("a").join("new.txt").exists());
        assert!(!root.join("a").join("old.txt").exists());
        assert!(root.join("b").is_dir());
        assert!(!backup_path(root, "a").exists());
        assert!(!root.join(JOURNAL_FILE_NAME).exists());
        assert_eq!(console.0.borrow().len(), 2);
    }

    #[test]
    fn recover_restores_missing_live_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(backup_path(root, "a")).unwrap();
        fs::create_dir_all(backup_path(root, "b")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        let journal = SwapJournal {
            pending: vec![
                PendingSwap { id: "a".into(), started: "t".into() },
                PendingSwap { id: "b".into(), started: "t".into() },
            ],
        };
        journal.save(root).unwrap();

        assert_eq!(recover(root).unwrap(), 1);
        assert!(root.join("a").is_dir());
        assert!(!backup_path(root, "a").exists());
        assert!(!backup_path(root, "b").exists());
        assert!(!root.join(JOURNAL_FILE_NAME).exists());
    }

    #[test]
    fn recover_without_journal_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(recover(tmp.path()).unwrap(), 0);
    }
}
