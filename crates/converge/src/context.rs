//! Provider traits for the orchestrator
//!
//! These traits let the converge crate run without depending on a specific
//! privilege mechanism or progress display.

use crate::progress::ProgressEvent;
use crate::types::CommandOutput;
use anyhow::Result;

/// Provider for elevated privilege operations
///
/// Implement this trait to provide sudo/admin capabilities.
/// The implementation handles privilege acquisition and release.
pub trait SudoProvider: Send + Sync {
    /// Run a command with elevated privileges
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a command and return just success/failure
    fn run_status(&self, cmd: &str, args: &[&str]) -> Result<bool> {
        Ok(self.run(cmd, args)?.success)
    }

    /// Prefix used to run an arbitrary program elevated, e.g. `["sudo", "-n"]`.
    ///
    /// Used for long-running commands whose output is streamed rather than
    /// captured.
    fn command_prefix(&self) -> Vec<String>;
}

/// Receiver for progress updates during a convergence run
pub trait StatusChannel: Send {
    /// Called once per progress milestone, in increasing percent order
    fn update(&mut self, event: &ProgressEvent);
}

/// Status channel that drops every update
pub struct NoStatus;

impl StatusChannel for NoStatus {
    fn update(&mut self, _event: &ProgressEvent) {}
}

/// Status channel that keeps every update, for callers that report the
/// history after the fact
#[derive(Debug, Default)]
pub struct RecordedStatus {
    pub events: Vec<ProgressEvent>,
}

impl RecordedStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percent values seen so far
    pub fn percents(&self) -> Vec<u8> {
        self.events.iter().map(|e| e.percent).collect()
    }
}

impl StatusChannel for RecordedStatus {
    fn update(&mut self, event: &ProgressEvent) {
        self.events.push(event.clone());
    }
}
