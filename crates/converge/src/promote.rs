//! Swapping a staging directory into place as the live root.
//!
//! Promotion is two renames: live to backup, then staging to live. Each
//! rename is atomic, the pair is not. If the second rename fails the backup
//! is renamed back; if that fails too the root is gone and a sentinel file
//! is written beside it so no later transaction touches it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem rename, split out so promotion failures can be exercised.
pub trait Renamer: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`std::fs::rename`]
#[derive(Debug, Default, Clone, Copy)]
pub struct StdRenamer;

impl Renamer for StdRenamer {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// Move `live` to `backup`, then `staging` to `live`.
///
/// Returns the backup path on success. On [`Error::BackupRename`] nothing
/// moved; on [`Error::PromotionRolledBack`] `live` holds the previous root
/// and `staging` is still in place; on [`Error::RootLost`] `live` is
/// missing and the previous root sits at `backup`.
pub fn promote(renamer: &dyn Renamer, live: &Path, staging: &Path, backup: &Path) -> Result<PathBuf> {
    renamer
        .rename(live, backup)
        .map_err(|source| Error::BackupRename {
            live: live.to_path_buf(),
            backup: backup.to_path_buf(),
            source,
        })?;

    if let Err(promote_err) = renamer.rename(staging, live) {
        log::warn!(
            "Promotion of {} failed ({}), restoring {}",
            staging.display(),
            promote_err,
            backup.display()
        );
        return match renamer.rename(backup, live) {
            Ok(()) => Err(Error::PromotionRolledBack {
                staging: staging.to_path_buf(),
                live: live.to_path_buf(),
                cause: promote_err,
            }),
            Err(rollback_err) => Err(Error::RootLost {
                live: live.to_path_buf(),
                backup: backup.to_path_buf(),
                promote: promote_err,
                rollback: rollback_err,
            }),
        };
    }

    Ok(backup.to_path_buf())
}

/// Contents of the sentinel left when a root is lost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalRecord {
    pub root: PathBuf,
    pub backup: Option<PathBuf>,
    pub staging: Option<PathBuf>,
    pub reason: String,
    pub recorded_at: String,
}

impl FatalRecord {
    pub fn new(root: &Path, reason: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            backup: None,
            staging: None,
            reason: reason.to_string(),
            recorded_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// Write the sentinel
    pub fn write(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body + "\n")?;
        log::error!("Recorded fatal state at {}", path.display());
        Ok(())
    }

    /// Read a sentinel if present.
    ///
    /// An unreadable sentinel still counts as fatal.
    pub fn read(path: &Path, root: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let parsed = fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok());
        Some(parsed.unwrap_or_else(|| {
            Self::new(root, &format!("unreadable fatal marker at {}", path.display()))
        }))
    }
}

/// Remove the sentinel after an operator has restored the root.
///
/// Refuses while the root is still missing. Returns whether a sentinel
/// was removed.
pub fn clear_fatal(path: &Path, root: &Path) -> Result<bool> {
    if !root.is_dir() {
        return Err(Error::RootNotFound(root.to_path_buf()));
    }
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path)?;
    log::info!("Cleared fatal marker {}", path.display());
    Ok(true)
}
