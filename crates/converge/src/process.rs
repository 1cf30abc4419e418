//! Running the convergence tool and streaming its output

use crate::error::{Error, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// How long a timed-out tool gets to exit after SIGTERM before SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(2);

/// One external command to run
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Kill the process if it runs longer than this
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line for log messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
    pub success: bool,
}

impl ExitReport {
    pub fn from_code(code: i32) -> Self {
        Self {
            code: Some(code),
            success: code == 0,
        }
    }
}

/// Runs a command, handing each output line to `on_line` as it arrives.
///
/// stdout and stderr are merged; lines from one stream keep their order.
pub trait ProcessExecutor: Send + Sync {
    fn run(&self, invocation: &Invocation, on_line: &mut dyn FnMut(&str)) -> Result<ExitReport>;
}

/// Executor backed by `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

fn pump<R: Read + Send + 'static>(reader: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

impl ProcessExecutor for SystemExecutor {
    fn run(&self, invocation: &Invocation, on_line: &mut dyn FnMut(&str)) -> Result<ExitReport> {
        log::debug!("Running: {}", invocation.display());

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        // Own process group, so a timeout reaches everything the tool starts
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(pump(stderr, tx.clone()));
        }
        drop(tx);

        let deadline = invocation.timeout.map(|t| Instant::now() + t);
        loop {
            let next = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(remaining) {
                        Ok(line) => Some(line),
                        Err(mpsc::RecvTimeoutError::Disconnected) => None,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            log::warn!("Killing {} after timeout", invocation.program);
                            terminate(&mut child);
                            return Err(Error::ToolTimedOut(invocation.timeout.unwrap_or_default()));
                        }
                    }
                }
                None => rx.recv().ok(),
            };
            match next {
                Some(line) => on_line(&line),
                None => break,
            }
        }

        for reader in readers {
            let _ = reader.join();
        }

        // Output is closed; the remaining wait is bounded by process exit.
        let status = child.wait()?;
        let report = ExitReport {
            code: status.code(),
            success: status.success(),
        };
        log::debug!("{} exited with {:?}", invocation.program, report.code);
        Ok(report)
    }
}

/// Stop the child and every process in its group.
///
/// SIGTERM goes first so `sudo` can relay it to a tool it runs as another
/// user; SIGKILL follows for whatever is left after the grace period.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        let _ = child.wait();
        return;
    };

    // SAFETY: killpg only sends a signal; the group was created for this
    // child by `process_group(0)` and the leader is not yet reaped.
    unsafe {
        libc::killpg(pgid, libc::SIGTERM);
    }
    let deadline = Instant::now() + TERM_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    // SAFETY: as above. Members that outlived the leader keep the group id
    // alive; an empty group just yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn test_streams_lines_in_order() {
        let mut lines = Vec::new();
        let report = SystemExecutor::new()
            .run(&sh("echo one; echo two; echo three"), &mut |l| {
                lines.push(l.to_string())
            })
            .unwrap();
        assert!(report.success);
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_merges_stderr() {
        let mut lines = Vec::new();
        SystemExecutor::new()
            .run(&sh("echo out; echo err 1>&2"), &mut |l| lines.push(l.to_string()))
            .unwrap();
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[test]
    fn test_nonzero_exit() {
        let report = SystemExecutor::new().run(&sh("exit 3"), &mut |_| {}).unwrap();
        assert_eq!(report, ExitReport::from_code(3));
    }

    #[test]
    fn test_env_and_cwd() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut lines = Vec::new();
        let inv = sh("echo $STAGE_TEST; pwd")
            .env("STAGE_TEST", "hello")
            .cwd(temp.path());
        SystemExecutor::new()
            .run(&inv, &mut |l| lines.push(l.to_string()))
            .unwrap();
        assert_eq!(lines[0], "hello");
        let cwd = std::fs::canonicalize(temp.path()).unwrap();
        assert_eq!(std::fs::canonicalize(&lines[1]).unwrap(), cwd);
    }

    #[test]
    fn test_missing_program() {
        let err = SystemExecutor::new()
            .run(&Invocation::new("/nonexistent/tool"), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_timeout_kills_child() {
        let inv = sh("echo started; exec sleep 30").timeout(Some(Duration::from_millis(300)));
        let mut lines = Vec::new();
        let started = Instant::now();
        let err = SystemExecutor::new()
            .run(&inv, &mut |l| lines.push(l.to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::ToolTimedOut(_)));
        assert_eq!(lines, vec!["started"]);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_kills_background_descendants() {
        let temp = tempfile::TempDir::new().unwrap();
        let flag = temp.path().join("FLAG");
        let inv = sh("(sleep 1; touch FLAG) & echo started; wait")
            .cwd(temp.path())
            .timeout(Some(Duration::from_millis(200)));

        let err = SystemExecutor::new().run(&inv, &mut |_| {}).unwrap_err();
        assert!(matches!(err, Error::ToolTimedOut(_)));

        thread::sleep(Duration::from_millis(1500));
        assert!(!flag.exists(), "background job outlived the timeout");
    }
}
