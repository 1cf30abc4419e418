//! Paths derived from a live configuration root.
//!
//! Everything a transaction creates lives beside the root, in the same
//! parent directory, so promotion is a rename within one filesystem:
//!
//! ```text
//! /home/chef/chef                                  live root
//! /home/chef/.chef.lock                            transaction lock
//! /home/chef/.chef.fatal                           set when the root was lost
//! /home/chef/.chef.staging-20240101-120000-000-ab12cd34ef56
//! /home/chef/chef.backup-20240101-120000-000       previous root
//! ```

use crate::fingerprint::{APPLIED_DIR, Fingerprint};
use chrono::{DateTime, Local};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Timestamp format for staging and backup names
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

#[derive(Debug, Clone)]
pub struct RootLayout {
    root: PathBuf,
    parent: PathBuf,
    name: String,
}

impl RootLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let parent = root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = root
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or("root")
            .to_string();
        Self { root, parent, name }
    }

    /// The live configuration root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn parent(&self) -> &Path {
        &self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn lock_path(&self) -> PathBuf {
        self.parent.join(format!(".{}.lock", self.name))
    }

    pub fn fatal_path(&self) -> PathBuf {
        self.parent.join(format!(".{}.fatal", self.name))
    }

    pub fn applied_dir(&self) -> PathBuf {
        self.root.join(APPLIED_DIR)
    }

    /// Unique staging directory for one transaction
    pub fn staging_path(&self, fp: &Fingerprint, now: DateTime<Local>) -> PathBuf {
        self.parent.join(format!(
            ".{}.staging-{}-{}",
            self.name,
            now.format(STAMP_FORMAT),
            fp.short()
        ))
    }

    fn backup_prefix(&self) -> String {
        format!("{}.backup-", self.name)
    }

    /// Backup location for the current root. Never an existing path.
    pub fn backup_path(&self, now: DateTime<Local>) -> PathBuf {
        let base = format!("{}{}", self.backup_prefix(), now.format(STAMP_FORMAT));
        let mut candidate = self.parent.join(&base);
        let mut n = 1;
        while candidate.symlink_metadata().is_ok() {
            candidate = self.parent.join(format!("{base}-{n}"));
            n += 1;
        }
        candidate
    }

    /// Existing backups, oldest first
    pub fn list_backups(&self) -> std::io::Result<Vec<PathBuf>> {
        self.list_with_prefix(&self.backup_prefix())
    }

    /// Staging directories left behind by interrupted transactions
    pub fn list_staging(&self) -> std::io::Result<Vec<PathBuf>> {
        self.list_with_prefix(&format!(".{}.staging-", self.name))
    }

    fn list_with_prefix(&self, prefix: &str) -> std::io::Result<Vec<PathBuf>> {
        if !self.parent.is_dir() {
            return Ok(Vec::new());
        }
        let mut found: Vec<PathBuf> = fs::read_dir(&self.parent)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(prefix))
            })
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        found.sort();
        Ok(found)
    }
}
