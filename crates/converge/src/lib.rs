//! # converge
//!
//! Staged, idempotent apply transactions for a convergence tool's
//! configuration root.
//!
//! Each [`ChangeRequest`] is applied by [`ChangeOrchestrator::apply`]:
//!
//! 1. **Fingerprint** - skip if `applied/{fingerprint}` exists and the
//!    request is not forced
//! 2. **Stage** - copy the live root into a sibling staging directory
//! 3. **Apply** - copy the unit overlay, run the tool, update the run list,
//!    all inside staging
//! 4. **Promote** - rename live to a backup, then staging to live; roll back
//!    if the second rename fails
//!
//! A failure before promotion discards staging and leaves the live root
//! byte-for-byte as it was.
//!
//! ## Example
//!
//! ```no_run
//! use converge::{ChangeOrchestrator, ChangeRequest, NoStatus, ToolConfig};
//!
//! let orchestrator = ChangeOrchestrator::new("/home/chef/chef", ToolConfig::default());
//! let outcome = orchestrator.apply(&ChangeRequest::add("app3", "/tmp/app3"), &mut NoStatus);
//! println!("{}", outcome.result_text);
//! ```

#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod fingerprint;
pub mod handler;
pub mod layout;
pub mod lock;
pub mod orchestrator;
pub mod process;
pub mod progress;
pub mod promote;
pub mod staging;
pub mod types;

pub use context::{NoStatus, RecordedStatus, StatusChannel, SudoProvider};
pub use error::{Error, ErrorKind, Result};
pub use fingerprint::{APPLIED_DIR, AppliedMarkers, Fingerprint};
pub use handler::{Dispatcher, Handler};
pub use layout::RootLayout;
pub use lock::RootLock;
pub use orchestrator::{
    ChangeOrchestrator, ENV_FINGERPRINT, ENV_LIVE_ROOT, OrchestratorConfig, ToolConfig,
};
pub use process::{ExitReport, Invocation, ProcessExecutor, SystemExecutor};
pub use progress::{COMPLETE_MARKER, ProgressEvent, ProgressTracker, START_PATTERN};
pub use promote::{FatalRecord, Renamer, StdRenamer, clear_fatal, promote};
pub use staging::StagingSynchronizer;
pub use types::{ChangeRequest, CommandOutput, FinalState, Operation, Outcome};
