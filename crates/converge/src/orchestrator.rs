//! The change transaction: fingerprint check, staging, convergence,
//! promotion.
//!
//! ```text
//! START -> FINGERPRINT_CHECK -> SKIPPED
//!                            -> STAGING -> APPLYING -> PROMOTING -> APPLIED
//!                                                              -> ROLLED_BACK
//!                                                              -> FATAL
//!                                                   -> DISCARDING -> FAILED
//! ```
//!
//! One transaction runs at a time per configuration root: an in-process
//! mutex serializes callers of one orchestrator and a lock file beside the
//! root serializes processes.

use crate::context::{StatusChannel, SudoProvider};
use crate::error::{Error, Result};
use crate::fingerprint::{AppliedMarkers, Fingerprint};
use crate::handler::Handler;
use crate::layout::RootLayout;
use crate::lock::RootLock;
use crate::process::{Invocation, ProcessExecutor, SystemExecutor};
use crate::progress::ProgressTracker;
use crate::promote::{FatalRecord, Renamer, StdRenamer, promote};
use crate::staging::StagingSynchronizer;
use crate::types::{ChangeRequest, FinalState, Operation, Outcome};
use chrono::Local;
use runlist::{Category, RunListDocument, recipe_exists, recipe_path};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Environment variable carrying the transaction fingerprint to the tool
pub const ENV_FINGERPRINT: &str = "STAGEHAND_FINGERPRINT";
/// Environment variable carrying the live root path to the tool
pub const ENV_LIVE_ROOT: &str = "STAGEHAND_LIVE_ROOT";

/// How to run the convergence tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Interpreter or binary, e.g. `bash`
    pub program: String,
    /// Entry script relative to the root, e.g. `install.sh`
    pub script: String,
    pub timeout: Option<Duration>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            script: "install.sh".to_string(),
            timeout: None,
        }
    }
}

/// Settings for one configuration root, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub config_root: PathBuf,
    /// Owner of the root; staged trees are chowned to this user when elevated
    pub exec_user: String,
    pub tool: ToolConfig,
}

/// Applies change requests to one configuration root
pub struct ChangeOrchestrator {
    layout: RootLayout,
    tool: ToolConfig,
    executor: Arc<dyn ProcessExecutor>,
    stager: StagingSynchronizer,
    elevation: Option<Arc<dyn SudoProvider>>,
    renamer: Arc<dyn Renamer>,
    /// Held for a whole transaction; `Some` once the root has been lost
    fatal: Mutex<Option<String>>,
}

impl ChangeOrchestrator {
    /// Orchestrator that runs the tool directly and copies in-process
    pub fn new(root: impl Into<PathBuf>, tool: ToolConfig) -> Self {
        Self {
            layout: RootLayout::new(root),
            tool,
            executor: Arc::new(SystemExecutor::new()),
            stager: StagingSynchronizer::unprivileged(),
            elevation: None,
            renamer: Arc::new(StdRenamer),
            fatal: Mutex::new(None),
        }
    }

    /// Orchestrator for a resolved config, elevated when `sudo` is given
    pub fn from_config(config: &OrchestratorConfig, sudo: Option<Arc<dyn SudoProvider>>) -> Self {
        let orchestrator = Self::new(&config.config_root, config.tool.clone());
        match sudo {
            Some(sudo) => orchestrator.with_elevation(sudo, &config.exec_user),
            None => orchestrator,
        }
    }

    /// Run the tool and all copies through `sudo`, owning results as `owner`
    pub fn with_elevation(mut self, sudo: Arc<dyn SudoProvider>, owner: &str) -> Self {
        self.stager = StagingSynchronizer::elevated(sudo.clone(), owner);
        self.elevation = Some(sudo);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_renamer(mut self, renamer: Arc<dyn Renamer>) -> Self {
        self.renamer = renamer;
        self
    }

    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    /// Run one transaction. Never panics or returns an error; every failure
    /// is reported in the outcome.
    pub fn apply(&self, request: &ChangeRequest, status: &mut dyn StatusChannel) -> Outcome {
        let fp = request.fingerprint();
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);

        log::info!("Applying {} [{}]", request, fp.short());
        match self.transact(request, &fp, &mut fatal, status) {
            Ok(outcome) => outcome,
            Err(err) => {
                match err.kind() {
                    crate::ErrorKind::Validation => {
                        log::warn!("Rejected {} [{}]: {}", request, fp.short(), err)
                    }
                    _ => log::error!("Failed {} [{}]: {}", request, fp.short(), err),
                }
                Outcome::failure(Some(&fp), &err)
            }
        }
    }

    /// Reason the root is refusing transactions, if any
    pub fn fatal_reason(&self) -> Option<String> {
        let held = self
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        held.or_else(|| {
            FatalRecord::read(&self.layout.fatal_path(), self.layout.root()).map(|r| r.reason)
        })
    }

    fn check_poisoned(&self, fatal: &mut Option<String>) -> Result<()> {
        if fatal.is_none()
            && let Some(record) = FatalRecord::read(&self.layout.fatal_path(), self.layout.root())
        {
            *fatal = Some(record.reason);
        }
        match fatal {
            Some(reason) => Err(Error::RootPoisoned {
                root: self.layout.root().to_path_buf(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn transact(
        &self,
        request: &ChangeRequest,
        fp: &Fingerprint,
        fatal: &mut Option<String>,
        status: &mut dyn StatusChannel,
    ) -> Result<Outcome> {
        self.check_poisoned(fatal)?;
        request.validate()?;

        let root = self.layout.root();
        if !self.layout.exists() {
            return Err(Error::RootNotFound(root.to_path_buf()));
        }
        let _lock = RootLock::acquire(&self.layout.lock_path())?;
        // The holder we waited on may have lost the root
        self.check_poisoned(fatal)?;
        if !self.layout.exists() {
            return Err(Error::RootNotFound(root.to_path_buf()));
        }

        if !request.force_apply && AppliedMarkers::new(root).exists(fp) {
            log::info!("{} already applied [{}], nothing to do", request, fp.short());
            return Ok(Outcome::success(
                FinalState::Skipped,
                fp,
                format!("{request} already applied"),
            ));
        }

        if let (Operation::Add, Some(source)) = (request.operation, &request.source_path)
            && !recipe_exists(source, &request.unit, Category::Default)
            && !recipe_exists(root, &request.unit, Category::Default)
        {
            return Err(runlist::Error::MissingDefaultRecipe {
                unit: request.unit.clone(),
                path: recipe_path(source, &request.unit, Category::Default),
            }
            .into());
        }

        let staging = self.layout.staging_path(fp, Local::now());
        log::debug!("Staging {} in {}", request, staging.display());
        if let Err(err) = self.build_staging(request, &staging, status) {
            log::error!(
                "Discarding staging {} for [{}]: {}",
                staging.display(),
                fp.short(),
                err
            );
            self.discard(&staging);
            return Err(err);
        }

        let backup = self.layout.backup_path(Local::now());
        match promote(self.renamer.as_ref(), root, &staging, &backup) {
            Ok(backup) => {
                log::info!(
                    "Promoted {} [{}], previous root kept at {}",
                    request,
                    fp.short(),
                    backup.display()
                );
                Ok(Outcome::success(
                    FinalState::Applied,
                    fp,
                    format!("{request} applied"),
                ))
            }
            Err(err) if err.is_fatal() => {
                log::error!(
                    "Configuration root {} lost while promoting {} [{}]: {}",
                    root.display(),
                    staging.display(),
                    fp.short(),
                    err
                );
                *fatal = Some(err.to_string());
                let mut record = FatalRecord::new(root, &err.to_string());
                record.backup = Some(backup);
                record.staging = Some(staging);
                if let Err(e) = record.write(&self.layout.fatal_path()) {
                    log::error!("Could not write fatal marker: {}", e);
                }
                Err(err)
            }
            Err(err) => {
                log::error!(
                    "Promotion of {} failed for [{}]: {}",
                    staging.display(),
                    fp.short(),
                    err
                );
                self.discard(&staging);
                Err(err)
            }
        }
    }

    fn discard(&self, staging: &Path) {
        if let Err(e) = self.stager.discard(staging) {
            log::warn!("Could not remove staging {}: {}", staging.display(), e);
        }
    }

    /// Copy the live root into `staging` and apply the request there
    fn build_staging(
        &self,
        request: &ChangeRequest,
        staging: &Path,
        status: &mut dyn StatusChannel,
    ) -> Result<()> {
        self.stager.sync(self.layout.root(), staging)?;
        let markers = AppliedMarkers::new(staging);
        let mut doc = RunListDocument::load_or_default(staging)?;
        let unit = request.unit.as_str();

        match request.operation {
            Operation::Add => {
                if let Some(source) = &request.source_path {
                    self.stager.sync(source, staging)?;
                }
                let mut planned = doc.run_list.clone();
                let inserted = planned.insert_app(unit, staging)?;
                let tracker = ProgressTracker::for_run_list(unit, &planned)?;
                self.converge(request, staging, tracker, status)?;

                log::info!(
                    "Inserted {} into run list",
                    inserted
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                doc.run_list = planned;
                doc.save_in(staging)?;
                markers.remove(&Fingerprint::of(Operation::Remove, unit))?;
            }
            Operation::Remove => {
                let tracker = ProgressTracker::for_run_list(unit, &doc.run_list)?;
                self.converge(request, staging, tracker, status)?;

                let removed = doc.run_list.remove_unit(unit);
                log::info!("Removed {} run list entries for {}", removed, unit);
                doc.save_in(staging)?;
                markers.remove(&Fingerprint::of(Operation::Add, unit))?;
            }
            Operation::Synchronize => {
                let tracker = ProgressTracker::for_run_list(unit, &doc.run_list)?;
                self.converge(request, staging, tracker, status)?;
            }
        }

        markers.write(request)?;
        Ok(())
    }

    fn invocation(&self, request: &ChangeRequest, staging: &Path) -> Invocation {
        let mut tool_args = vec![
            self.tool.program.clone(),
            self.tool.script.clone(),
            request.operation.mode().to_string(),
        ];
        if !request.unit.is_empty() {
            tool_args.push(request.unit.clone());
        }

        let mut command = self
            .elevation
            .as_ref()
            .map(|sudo| sudo.command_prefix())
            .unwrap_or_default();
        command.extend(tool_args);
        let program = command.remove(0);

        Invocation::new(program)
            .args(command)
            .cwd(staging)
            .env(ENV_FINGERPRINT, request.fingerprint().as_str())
            .env(ENV_LIVE_ROOT, self.layout.root().to_string_lossy())
            .timeout(self.tool.timeout)
    }

    /// Run the tool in `staging`, feeding its output to the tracker
    fn converge(
        &self,
        request: &ChangeRequest,
        staging: &Path,
        mut tracker: ProgressTracker,
        status: &mut dyn StatusChannel,
    ) -> Result<()> {
        let invocation = self.invocation(request, staging);
        let report = self.executor.run(&invocation, &mut |line| {
            log::trace!("tool: {}", line);
            tracker.observe_into(line, status);
        })?;

        if !report.success {
            return Err(Error::ToolFailed {
                mode: request.operation.mode().to_string(),
                code: report.code,
            });
        }
        Ok(())
    }
}

impl Handler<ChangeRequest> for ChangeOrchestrator {
    fn accepts(&self, _message: &ChangeRequest) -> bool {
        true
    }

    fn process(&self, message: &ChangeRequest, status: &mut dyn StatusChannel) -> Outcome {
        self.apply(message, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{NoStatus, RecordedStatus};
    use crate::process::ExitReport;
    use crate::promote::tests::FailingRenamer;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    /// Executor that replays fixed output and records what it was asked to run
    #[derive(Default)]
    struct ScriptedExecutor {
        lines: Vec<String>,
        exit: i32,
        delay: Duration,
        calls: Mutex<Vec<Invocation>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn ok() -> Self {
            Self::default()
        }

        fn exiting(code: i32) -> Self {
            Self {
                exit: code,
                ..Default::default()
            }
        }

        fn with_lines(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                ..Default::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ProcessExecutor for ScriptedExecutor {
        fn run(&self, invocation: &Invocation, on_line: &mut dyn FnMut(&str)) -> Result<ExitReport> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(invocation.clone());
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            for line in &self.lines {
                on_line(line);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ExitReport::from_code(self.exit))
        }
    }

    /// Runs copies for real as the current user and records every command;
    /// `chown` is only recorded.
    #[derive(Default)]
    struct LocalSudo {
        commands: Mutex<Vec<String>>,
    }

    impl SudoProvider for LocalSudo {
        fn run(&self, cmd: &str, args: &[&str]) -> anyhow::Result<crate::types::CommandOutput> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("{} {}", cmd, args.join(" ")));
            if cmd == "chown" {
                return Ok(crate::types::CommandOutput {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    success: true,
                });
            }
            Ok(std::process::Command::new(cmd).args(args).output()?.into())
        }

        fn command_prefix(&self) -> Vec<String> {
            vec!["sudo".into(), "-n".into()]
        }
    }

    struct Fixture {
        temp: TempDir,
        root: PathBuf,
        overlay: PathBuf,
    }

    fn recipe(dir: &Path, unit: &str, category: &str) {
        let path = dir
            .join("cookbooks")
            .join(unit)
            .join("recipes")
            .join(format!("{category}.rb"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, format!("# {unit}::{category}\n")).unwrap();
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("chef");
        fs::create_dir_all(&root).unwrap();
        recipe(&root, "app1", "lib");
        recipe(&root, "app1", "default");
        recipe(&root, "app1", "validate");
        recipe(&root, "app2", "default");
        fs::write(
            root.join("solo.json"),
            r#"{"run_list": ["app1::lib", "app1", "app2", "app1::validate"], "chef_user": "chef"}"#,
        )
        .unwrap();
        fs::write(root.join("install.sh"), "#!/bin/bash\n").unwrap();

        let overlay = temp.path().join("overlay");
        recipe(&overlay, "app3", "default");
        recipe(&overlay, "app3", "validate");

        Fixture {
            temp,
            root,
            overlay,
        }
    }

    fn orchestrator(fx: &Fixture, executor: Arc<ScriptedExecutor>) -> ChangeOrchestrator {
        ChangeOrchestrator::new(&fx.root, ToolConfig::default()).with_executor(executor)
    }

    fn run_list(root: &Path) -> Vec<String> {
        RunListDocument::load_or_default(root)
            .unwrap()
            .run_list
            .to_strings()
    }

    fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(dir)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                (
                    e.path().strip_prefix(dir).unwrap().to_path_buf(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    fn siblings(fx: &Fixture) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(fx.temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_add_promotes_staged_root() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone());

        let req = ChangeRequest::add("app3", &fx.overlay);
        let outcome = orch.apply(&req, &mut NoStatus);

        assert_eq!(outcome.state, FinalState::Applied, "{outcome:?}");
        assert!(outcome.error_text.is_none());
        assert_eq!(
            run_list(&fx.root),
            vec!["app1::lib", "app1", "app2", "app3", "app1::validate", "app3::validate"]
        );
        assert!(fx.root.join("cookbooks/app3/recipes/default.rb").is_file());
        assert!(AppliedMarkers::new(&fx.root).exists(&req.fingerprint()));

        let doc = RunListDocument::load_or_default(&fx.root).unwrap();
        assert_eq!(doc.attributes["chef_user"], "chef");

        let layout = orch.layout();
        assert_eq!(layout.list_backups().unwrap().len(), 1);
        assert!(layout.list_staging().unwrap().is_empty());

        let calls = exec.calls.lock().unwrap();
        assert_eq!(calls[0].program, "bash");
        assert_eq!(calls[0].args, vec!["install.sh", "install", "app3"]);
        let cwd = calls[0].cwd.as_ref().unwrap();
        assert!(
            cwd.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(".chef.staging-")
        );
        assert!(
            calls[0]
                .env
                .iter()
                .any(|(k, v)| k == ENV_FINGERPRINT && v == req.fingerprint().as_str())
        );
    }

    #[test]
    fn test_repeat_request_is_a_noop() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone());
        let req = ChangeRequest::add("app3", &fx.overlay);

        assert_eq!(orch.apply(&req, &mut NoStatus).state, FinalState::Applied);
        let after_first = snapshot(&fx.root);

        let second = orch.apply(&req, &mut NoStatus);
        assert_eq!(second.state, FinalState::Skipped);
        assert!(second.is_success());
        assert_eq!(exec.call_count(), 1);
        assert_eq!(snapshot(&fx.root), after_first);
        assert_eq!(orch.layout().list_backups().unwrap().len(), 1);
    }

    #[test]
    fn test_force_reapplies() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone());
        let req = ChangeRequest::add("app3", &fx.overlay);

        orch.apply(&req, &mut NoStatus);
        let forced = orch.apply(&req.clone().forced(true), &mut NoStatus);
        assert_eq!(forced.state, FinalState::Applied);
        assert_eq!(exec.call_count(), 2);
        assert_eq!(
            run_list(&fx.root),
            vec!["app1::lib", "app1", "app2", "app3", "app1::validate", "app3::validate"]
        );
    }

    #[test]
    fn test_remove_drops_every_entry_of_the_unit() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone());

        let outcome = orch.apply(&ChangeRequest::remove("app1"), &mut NoStatus);
        assert_eq!(outcome.state, FinalState::Applied);
        assert_eq!(run_list(&fx.root), vec!["app2"]);
        assert_eq!(
            exec.calls.lock().unwrap()[0].args,
            vec!["install.sh", "uninstall", "app1"]
        );
    }

    #[test]
    fn test_tool_failure_leaves_live_root_untouched() {
        let fx = fixture();
        let before = snapshot(&fx.root);
        let names_before = siblings(&fx);
        let orch = orchestrator(&fx, Arc::new(ScriptedExecutor::exiting(2)));

        let req = ChangeRequest::add("app3", &fx.overlay);
        let outcome = orch.apply(&req, &mut NoStatus);

        assert_eq!(outcome.state, FinalState::Failed);
        assert!(outcome.error_text.unwrap().contains("status 2"));
        assert_eq!(snapshot(&fx.root), before);
        assert!(orch.layout().list_staging().unwrap().is_empty());
        assert!(orch.layout().list_backups().unwrap().is_empty());
        // only the lock file is new
        let mut expected = names_before;
        expected.push(".chef.lock".to_string());
        expected.sort();
        assert_eq!(siblings(&fx), expected);

        // still available, and the failed request was not recorded
        let retry = orchestrator(&fx, Arc::new(ScriptedExecutor::ok())).apply(&req, &mut NoStatus);
        assert_eq!(retry.state, FinalState::Applied);
    }

    #[test]
    fn test_validation_rejects_before_mutation() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone());
        let before = snapshot(&fx.root);

        let missing_unit = orch.apply(&ChangeRequest::remove(""), &mut NoStatus);
        assert_eq!(missing_unit.state, FinalState::Rejected);

        let empty_overlay = fx.temp.path().join("empty");
        fs::create_dir(&empty_overlay).unwrap();
        let no_default = orch.apply(&ChangeRequest::add("app9", &empty_overlay), &mut NoStatus);
        assert_eq!(no_default.state, FinalState::Rejected);
        assert!(no_default.error_text.unwrap().contains("default recipe"));

        assert_eq!(exec.call_count(), 0);
        assert_eq!(snapshot(&fx.root), before);
        assert!(orch.layout().list_staging().unwrap().is_empty());
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let fx = fixture();
        let orch = ChangeOrchestrator::new(fx.temp.path().join("nope"), ToolConfig::default())
            .with_executor(Arc::new(ScriptedExecutor::ok()));
        let outcome = orch.apply(&ChangeRequest::synchronize(""), &mut NoStatus);
        assert_eq!(outcome.state, FinalState::Rejected);
        assert!(outcome.error_text.unwrap().contains("not found"));
    }

    #[test]
    fn test_backup_rename_failure_keeps_root() {
        let fx = fixture();
        let before = snapshot(&fx.root);
        let orch = orchestrator(&fx, Arc::new(ScriptedExecutor::ok()))
            .with_renamer(Arc::new(FailingRenamer::failing(&[1])));

        let outcome = orch.apply(&ChangeRequest::add("app3", &fx.overlay), &mut NoStatus);
        assert_eq!(outcome.state, FinalState::Failed);
        assert_eq!(snapshot(&fx.root), before);
        assert!(orch.layout().list_staging().unwrap().is_empty());
        assert!(orch.fatal_reason().is_none());
    }

    #[test]
    fn test_promotion_failure_rolls_back() {
        let fx = fixture();
        let before = snapshot(&fx.root);
        let orch = orchestrator(&fx, Arc::new(ScriptedExecutor::ok()))
            .with_renamer(Arc::new(FailingRenamer::failing(&[2])));

        let outcome = orch.apply(&ChangeRequest::add("app3", &fx.overlay), &mut NoStatus);
        assert_eq!(outcome.state, FinalState::RolledBack);
        assert!(outcome.error_text.unwrap().contains("restored"));
        assert_eq!(snapshot(&fx.root), before);
        assert!(orch.layout().list_staging().unwrap().is_empty());
        assert!(orch.layout().list_backups().unwrap().is_empty());
        assert!(orch.fatal_reason().is_none());
    }

    #[test]
    fn test_lost_root_refuses_further_transactions() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone())
            .with_renamer(Arc::new(FailingRenamer::failing(&[2, 3])));

        let outcome = orch.apply(&ChangeRequest::add("app3", &fx.overlay), &mut NoStatus);
        assert_eq!(outcome.state, FinalState::Fatal);
        assert!(!fx.root.exists());
        assert!(orch.layout().fatal_path().exists());
        assert!(orch.fatal_reason().is_some());

        let refused = orch.apply(&ChangeRequest::synchronize(""), &mut NoStatus);
        assert_eq!(refused.state, FinalState::Fatal);
        assert_eq!(exec.call_count(), 1);

        // the sentinel outlives the instance, even once the root is back
        let backup = orch.layout().list_backups().unwrap().remove(0);
        fs::rename(&backup, &fx.root).unwrap();
        let fresh = orchestrator(&fx, exec.clone());
        let refused = fresh.apply(&ChangeRequest::synchronize(""), &mut NoStatus);
        assert_eq!(refused.state, FinalState::Fatal);
        assert_eq!(exec.call_count(), 1);

        crate::promote::clear_fatal(&fresh.layout().fatal_path(), &fx.root).unwrap();
        let fresh = orchestrator(&fx, exec.clone());
        let ok = fresh.apply(&ChangeRequest::synchronize(""), &mut NoStatus);
        assert_eq!(ok.state, FinalState::Applied);
    }

    #[test]
    fn test_waiter_sees_root_lost_while_it_was_blocked() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = Arc::new(orchestrator(&fx, exec.clone()));
        let held = RootLock::acquire(&orch.layout().lock_path()).unwrap();

        let waiter = {
            let orch = Arc::clone(&orch);
            thread::spawn(move || orch.apply(&ChangeRequest::remove("app2"), &mut NoStatus))
        };
        thread::sleep(Duration::from_millis(200));

        // another process loses the root while holding the lock
        let lost = fx.temp.path().join("chef.backup-lost");
        fs::rename(&fx.root, &lost).unwrap();
        FatalRecord::new(&fx.root, "second rename failed")
            .write(&orch.layout().fatal_path())
            .unwrap();
        drop(held);

        let outcome = waiter.join().unwrap();
        assert_eq!(outcome.state, FinalState::Fatal);
        assert_eq!(exec.call_count(), 0);
        assert!(orch.layout().list_staging().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_elevated_run_goes_through_sudo() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let sudo = Arc::new(LocalSudo::default());
        let orch = orchestrator(&fx, exec.clone()).with_elevation(sudo.clone(), "chef");

        let outcome = orch.apply(&ChangeRequest::add("app3", &fx.overlay), &mut NoStatus);
        assert_eq!(outcome.state, FinalState::Applied, "{:?}", outcome.error_text);

        let calls = exec.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "sudo");
        assert_eq!(calls[0].args, vec!["-n", "bash", "install.sh", "install", "app3"]);

        let commands = sudo.commands.lock().unwrap();
        assert!(commands.iter().any(|c| c.starts_with("cp -a ")));
        assert_eq!(
            commands.iter().filter(|c| c.starts_with("chown -R chef ")).count(),
            2
        );
        assert!(fx.root.join("cookbooks/app3/recipes/default.rb").exists());
    }

    #[test]
    fn test_progress_reported_during_run() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::with_lines(&[
            "Starting Chef Infra Client, version 18.2.7",
            "  * file[/etc/app1] action create (app1::default line 3)",
            "  * package[app2] action install (app2::default line 1)",
            "  * template[/etc/app3] action create (app3::default line 7)",
            "  * execute[check] action run (app1::validate line 2)",
            "  * execute[check] action run (app3::validate line 2)",
            "Chef Infra Client Run complete in 3.2 seconds",
        ]));
        let orch = orchestrator(&fx, exec);
        let mut status = RecordedStatus::new();

        let outcome = orch.apply(&ChangeRequest::add("app3", &fx.overlay), &mut status);
        assert_eq!(outcome.state, FinalState::Applied);
        assert_eq!(status.percents(), vec![1, 16, 32, 48, 64, 80, 100]);
        assert!(status.events.iter().all(|e| e.unit == "app3"));
    }

    #[test]
    fn test_synchronize_keeps_run_list() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone());
        let before = run_list(&fx.root);

        let outcome = orch.apply(&ChangeRequest::synchronize(""), &mut NoStatus);
        assert_eq!(outcome.state, FinalState::Applied);
        assert_eq!(run_list(&fx.root), before);
        assert_eq!(exec.calls.lock().unwrap()[0].args, vec!["install.sh", "sync"]);
    }

    #[test]
    fn test_add_remove_add_cycle() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor::ok());
        let orch = orchestrator(&fx, exec.clone());
        let add = ChangeRequest::add("app3", &fx.overlay);

        assert!(orch.apply(&add, &mut NoStatus).is_success());
        assert!(orch.apply(&ChangeRequest::remove("app3"), &mut NoStatus).is_success());
        assert!(!run_list(&fx.root).iter().any(|e| e.starts_with("app3")));

        let again = orch.apply(&add, &mut NoStatus);
        assert_eq!(again.state, FinalState::Applied);
        assert_eq!(exec.call_count(), 3);
        assert!(run_list(&fx.root).contains(&"app3".to_string()));
    }

    #[test]
    fn test_handler_accepts_every_request() {
        let fx = fixture();
        let orch = orchestrator(&fx, Arc::new(ScriptedExecutor::ok()));
        let handler: &dyn Handler<ChangeRequest> = &orch;
        let req = ChangeRequest::remove("app2");
        assert!(handler.accepts(&req));
        assert_eq!(handler.process(&req, &mut NoStatus).state, FinalState::Applied);
    }

    #[test]
    fn test_concurrent_requests_are_serialized() {
        let fx = fixture();
        let exec = Arc::new(ScriptedExecutor {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let orch = Arc::new(orchestrator(&fx, exec.clone()));

        let handles: Vec<_> = ["app1", "app2"]
            .into_iter()
            .map(|unit| {
                let orch = Arc::clone(&orch);
                thread::spawn(move || orch.apply(&ChangeRequest::remove(unit), &mut NoStatus))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().state, FinalState::Applied);
        }

        assert_eq!(exec.call_count(), 2);
        assert_eq!(exec.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(run_list(&fx.root).is_empty());
        assert_eq!(orch.layout().list_backups().unwrap().len(), 2);
    }
}
