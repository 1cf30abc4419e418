//! Error types for run list operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while parsing, editing, or persisting a run list.
#[derive(Debug, Error)]
pub enum Error {
    /// A run list entry could not be parsed
    #[error("invalid run list entry: {entry:?}")]
    InvalidEntry {
        /// The raw entry text
        entry: String,
    },

    /// A unit name contains characters outside `[A-Za-z0-9_-]`
    #[error("invalid unit name: {0:?}")]
    InvalidUnit(String),

    /// A category other than `lib`, `default`, or `validate`
    #[error("unknown recipe category {category:?} in entry {entry:?}")]
    UnknownCategory {
        /// The offending category text
        category: String,
        /// The raw entry text
        entry: String,
    },

    /// A unit cannot be activated without its default recipe
    #[error("unit {unit} has no default recipe at {}", .path.display())]
    MissingDefaultRecipe {
        /// Unit being activated
        unit: String,
        /// Where the recipe was expected
        path: PathBuf,
    },

    /// Run list document not found
    #[error("run list document not found: {}", .0.display())]
    DocumentNotFound(PathBuf),

    /// Run list document is not valid JSON or has the wrong shape
    #[error("invalid run list document {}: {source}", .path.display())]
    Document {
        /// Document path
        path: PathBuf,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for run list operations
pub type Result<T> = std::result::Result<T, Error>;
