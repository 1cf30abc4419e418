//! Idempotency fingerprints and the applied-marker store

use crate::error::Result;
use crate::types::{ChangeRequest, Operation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under the configuration root holding one marker per applied fingerprint
pub const APPLIED_DIR: &str = "applied";

/// Deterministic identity of a requested change: blake3 of `{OPERATION}_{unit}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(operation: Operation, unit: &str) -> Self {
        let key = format!("{}_{}", operation.as_str(), unit);
        Self(blake3::hash(key.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for directory names and log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `applied/` marker set of one configuration root.
///
/// Presence of `applied/{fingerprint}` means the request was already
/// satisfied; the file body is the serialized request.
pub struct AppliedMarkers {
    dir: PathBuf,
}

impl AppliedMarkers {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(APPLIED_DIR),
        }
    }

    pub fn path_of(&self, fp: &Fingerprint) -> PathBuf {
        self.dir.join(fp.as_str())
    }

    pub fn exists(&self, fp: &Fingerprint) -> bool {
        self.path_of(fp).is_file()
    }

    /// Record `request` as applied
    pub fn write(&self, request: &ChangeRequest) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_of(&request.fingerprint());
        let body = serde_json::to_string_pretty(request)?;
        fs::write(&path, body + "\n")?;
        log::debug!("Recorded applied marker {}", path.display());
        Ok(path)
    }

    /// Forget a fingerprint. Returns whether a marker was removed.
    pub fn remove(&self, fp: &Fingerprint) -> Result<bool> {
        let path = self.path_of(fp);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        log::debug!("Removed applied marker {}", path.display());
        Ok(true)
    }

    /// Read back the request recorded for a fingerprint
    pub fn read(&self, fp: &Fingerprint) -> Result<Option<ChangeRequest>> {
        let path = self.path_of(fp);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// All recorded requests, sorted by operation then unit.
    ///
    /// Markers that don't parse are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ChangeRequest>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut requests = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(crate::Error::from)
                .and_then(|s| serde_json::from_str::<ChangeRequest>(&s).map_err(Into::into))
            {
                Ok(req) => requests.push(req),
                Err(e) => log::warn!("Skipping unreadable marker {}: {}", path.display(), e),
            }
        }
        requests.sort_by(|a, b| {
            (a.operation.as_str(), &a.unit).cmp(&(b.operation.as_str(), &b.unit))
        });
        Ok(requests)
    }
}
