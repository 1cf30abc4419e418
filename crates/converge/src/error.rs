//! Error types for change transactions.
//!
//! Errors are categorized by the transaction phase that raised them, which
//! decides what the orchestrator does next: nothing was touched, staging is
//! discarded, the live root was restored, or the root needs an operator.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Phase-based classification of transaction failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request rejected before any filesystem mutation
    Validation,
    /// Failure while building or converging the staging copy
    Apply,
    /// Promotion failed but the live root is in place
    Promotion,
    /// The live root is missing; no further transactions are allowed
    Fatal,
}

impl ErrorKind {
    /// Get a short description of this error kind.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Invalid request",
            Self::Apply => "Apply failed",
            Self::Promotion => "Promotion failed",
            Self::Fatal => "Configuration root unrecoverable",
        }
    }
}

/// Errors raised while processing a change request.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request (missing unit, missing overlay, bad JSON)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Operation name other than ADD, REMOVE, or SYNCHRONIZE
    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    /// Run list parsing, editing, or persistence failed
    #[error(transparent)]
    RunList(#[from] runlist::Error),

    /// The live configuration root does not exist
    #[error("configuration root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// Copying a tree into staging failed
    #[error("failed to sync {} into {}: {message}", .source_dir.display(), .dest.display())]
    Sync {
        /// Tree being copied
        source_dir: PathBuf,
        /// Copy destination
        dest: PathBuf,
        /// Underlying cause
        message: String,
    },

    /// A command run through the privilege provider failed
    #[error("privileged command failed: {command}: {message}")]
    Privileged {
        /// Command line that was run
        command: String,
        /// stderr or provider error
        message: String,
    },

    /// The convergence tool could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The convergence tool exited non-zero
    #[error("convergence tool ({mode}) exited with {}", exit_description(.code))]
    ToolFailed {
        /// Tool mode (install, uninstall, sync)
        mode: String,
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },

    /// The convergence tool ran past its deadline and was killed
    #[error("convergence tool timed out after {0:?}")]
    ToolTimedOut(Duration),

    /// A progress pattern failed to compile
    #[error("invalid progress pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Applied-marker serialization failed
    #[error("failed to serialize applied marker: {0}")]
    Marker(#[from] serde_json::Error),

    /// Could not take the configuration root lock
    #[error("failed to lock {}: {source}", .path.display())]
    Lock {
        /// Lock file path
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// First promotion rename failed; nothing moved
    #[error("failed to move {} aside to {}: {source}", .live.display(), .backup.display())]
    BackupRename {
        /// Live root
        live: PathBuf,
        /// Intended backup location
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Second promotion rename failed; the backup was moved back
    #[error("failed to promote {} to {}: {cause}; previous configuration restored", .staging.display(), .live.display())]
    PromotionRolledBack {
        /// Staging directory that was not promoted
        staging: PathBuf,
        /// Live root, restored
        live: PathBuf,
        /// Rename error
        cause: std::io::Error,
    },

    /// Second promotion rename and the rollback both failed
    #[error("configuration root {} is missing: promotion failed ({promote}) and rollback from {} failed ({rollback})", .live.display(), .backup.display())]
    RootLost {
        /// Live root path, now empty
        live: PathBuf,
        /// Where the previous configuration sits
        backup: PathBuf,
        /// Promotion rename error
        promote: std::io::Error,
        /// Rollback rename error
        rollback: std::io::Error,
    },

    /// A previous transaction lost the root; operator repair required
    #[error("configuration root {} needs operator repair: {reason}", .root.display())]
    RootPoisoned {
        /// Live root path
        root: PathBuf,
        /// Recorded cause
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the phase-based kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::UnknownOperation(_) | Self::RootNotFound(_) => {
                ErrorKind::Validation
            }
            Self::RunList(runlist::Error::MissingDefaultRecipe { .. })
            | Self::RunList(runlist::Error::InvalidUnit(_)) => ErrorKind::Validation,
            Self::BackupRename { .. } | Self::PromotionRolledBack { .. } => ErrorKind::Promotion,
            Self::RootLost { .. } | Self::RootPoisoned { .. } => ErrorKind::Fatal,
            _ => ErrorKind::Apply,
        }
    }

    /// Whether the configuration root is left in an undefined state.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Shorthand for a request validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

/// Result type for change transactions
pub type Result<T> = std::result::Result<T, Error>;
