//! Core types for change requests and their outcomes

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Output;
use std::str::FromStr;

/// What a change request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Install a unit from an overlay and activate it in the run list
    Add,
    /// Uninstall a unit and drop it from the run list
    Remove,
    /// Re-converge against the existing run list
    Synchronize,
}

impl Operation {
    /// Wire name (`ADD`, `REMOVE`, `SYNCHRONIZE`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
            Self::Synchronize => "SYNCHRONIZE",
        }
    }

    /// Convergence tool mode for this operation
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Add => "install",
            Self::Remove => "uninstall",
            Self::Synchronize => "sync",
        }
    }

    /// Whether the request must name a unit
    pub fn requires_unit(&self) -> bool {
        !matches!(self, Self::Synchronize)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ADD" => Ok(Self::Add),
            "REMOVE" => Ok(Self::Remove),
            "SYNCHRONIZE" | "SYNC" => Ok(Self::Synchronize),
            _ => Err(Error::UnknownOperation(s.to_string())),
        }
    }
}

/// A single change request. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub operation: Operation,

    /// Unit (cookbook) name; may be empty for SYNCHRONIZE
    #[serde(default)]
    pub unit: String,

    /// Overlay tree to copy into the configuration root (ADD only)
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    /// Re-apply even if the fingerprint marker exists
    #[serde(default)]
    pub force_apply: bool,
}

impl ChangeRequest {
    /// ADD request for `unit` with its overlay at `source`
    pub fn add(unit: &str, source: impl Into<PathBuf>) -> Self {
        Self {
            operation: Operation::Add,
            unit: unit.to_string(),
            source_path: Some(source.into()),
            force_apply: false,
        }
    }

    /// REMOVE request for `unit`
    pub fn remove(unit: &str) -> Self {
        Self {
            operation: Operation::Remove,
            unit: unit.to_string(),
            source_path: None,
            force_apply: false,
        }
    }

    /// SYNCHRONIZE request, optionally scoped to a unit
    pub fn synchronize(unit: &str) -> Self {
        Self {
            operation: Operation::Synchronize,
            unit: unit.to_string(),
            source_path: None,
            force_apply: false,
        }
    }

    /// Builder-style force flag
    pub fn forced(mut self, force: bool) -> Self {
        self.force_apply = force;
        self
    }

    /// Parse a request from its JSON form.
    ///
    /// Unknown operations and malformed bodies are validation errors.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::invalid(e.to_string()))
    }

    /// Fingerprint of (operation, unit)
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.operation, &self.unit)
    }

    /// Check the request shape before anything is touched
    pub fn validate(&self) -> Result<()> {
        if self.operation.requires_unit() && self.unit.is_empty() {
            return Err(Error::invalid(format!("{} requires a unit", self.operation)));
        }
        if !self.unit.is_empty() {
            runlist::validate_unit_name(&self.unit)?;
        }
        if self.operation == Operation::Add {
            let source = self
                .source_path
                .as_ref()
                .ok_or_else(|| Error::invalid("ADD requires a source path"))?;
            if !source.is_dir() {
                return Err(Error::invalid(format!(
                    "source path is not a directory: {}",
                    source.display()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ChangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}", self.operation)?;
        } else {
            write!(f, "{} {}", self.operation, self.unit)?;
        }
        if self.force_apply {
            f.write_str(" (forced)")?;
        }
        Ok(())
    }
}

/// Terminal state of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    /// Fingerprint already applied; nothing touched
    Skipped,
    /// Staging promoted; fingerprint recorded
    Applied,
    /// Rejected before any mutation
    Rejected,
    /// Staging discarded; live root untouched
    Failed,
    /// Promotion failed and the previous root was restored
    RolledBack,
    /// Root is missing or poisoned; operator repair required
    Fatal,
}

impl FinalState {
    /// Whether the request is satisfied
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Skipped | Self::Applied)
    }
}

/// Result of [`crate::ChangeOrchestrator::apply`]. Failures are reported
/// here, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub result_text: String,
    pub error_text: Option<String>,
    pub state: FinalState,
    pub fingerprint: Option<Fingerprint>,
}

impl Outcome {
    pub(crate) fn success(state: FinalState, fingerprint: &Fingerprint, text: String) -> Self {
        Self {
            result_text: text,
            error_text: None,
            state,
            fingerprint: Some(fingerprint.clone()),
        }
    }

    /// Outcome for a failed request, classified by the error's kind
    pub fn failure(fingerprint: Option<&Fingerprint>, error: &Error) -> Self {
        let state = match error.kind() {
            crate::ErrorKind::Validation => FinalState::Rejected,
            crate::ErrorKind::Apply => FinalState::Failed,
            crate::ErrorKind::Promotion => match error {
                Error::PromotionRolledBack { .. } => FinalState::RolledBack,
                _ => FinalState::Failed,
            },
            crate::ErrorKind::Fatal => FinalState::Fatal,
        };
        Self {
            result_text: error.kind().description().to_string(),
            error_text: Some(error.to_string()),
            state,
            fingerprint: fingerprint.cloned(),
        }
    }

    /// Whether the request is satisfied
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

/// Output from a privileged command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}
