//! The run list document (`solo.json`) kept at the configuration root.

use crate::error::{Error, Result};
use crate::runlist::RunList;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the run list document within a configuration root
pub const SOLO_JSON: &str = "solo.json";

/// `solo.json`: the run list plus whatever other attributes the
/// convergence tool reads from the same file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunListDocument {
    /// Entries the tool converges, in order
    #[serde(default)]
    pub run_list: RunList,

    /// Top-level keys other than `run_list`, preserved as-is
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl RunListDocument {
    /// Document path for a configuration root
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(SOLO_JSON)
    }

    /// Load the document from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::DocumentNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| Error::Document {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the document from a configuration root, or start an empty one
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = Self::path_in(dir);
        match Self::load(&path) {
            Err(Error::DocumentNotFound(_)) => {
                log::warn!("{} not found, starting from an empty run list", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write the document to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|source| Error::Document {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content + "\n")?;
        log::debug!("Saved run list ({} entries) to {}", self.run_list.len(), path.display());
        Ok(())
    }

    /// Write the document into a configuration root
    pub fn save_in(&self, dir: &Path) -> Result<()> {
        self.save(&Self::path_in(dir))
    }
}
