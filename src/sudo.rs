//! Scoped sudo context
//!
//! Elevation is acquired once per command, before the transaction starts,
//! and released when the context drops. Long runs use `sudo -n` so a
//! timestamp that expires mid-run fails fast instead of prompting.

use anyhow::{Context, Result, bail};
use converge::{CommandOutput, SudoProvider};
use std::process::{Command, Output, Stdio};

/// Scoped sudo context - automatically invalidates on drop
pub struct SudoContext {
    validated: bool,
    /// Already root: run commands directly
    direct: bool,
}

impl SudoContext {
    /// Acquire sudo privileges, prompting with a reason if a terminal is attached
    pub fn acquire(reason: &str) -> Result<Self> {
        if is_root() {
            return Ok(Self {
                validated: true,
                direct: true,
            });
        }
        if Self::is_valid() {
            return Ok(Self {
                validated: true,
                direct: false,
            });
        }

        eprintln!();
        eprintln!("  Sudo required: {}", reason);
        eprintln!();

        // Validate sudo (will prompt for password)
        let status = Command::new("sudo")
            .args(["-v"])
            .status()
            .context("Failed to execute sudo")?;

        if !status.success() {
            bail!("Failed to acquire sudo privileges");
        }

        Ok(Self {
            validated: true,
            direct: false,
        })
    }

    /// Acquire without prompting; fails unless sudo works non-interactively
    pub fn non_interactive() -> Result<Self> {
        if is_root() {
            return Ok(Self {
                validated: true,
                direct: true,
            });
        }
        if !Self::is_valid() {
            bail!("sudo requires a password; configure NOPASSWD or run as root");
        }
        Ok(Self {
            validated: true,
            direct: false,
        })
    }

    /// Check if sudo is currently valid (without prompting)
    pub fn is_valid() -> bool {
        Command::new("sudo")
            .args(["-n", "true"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn run_internal(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        if !self.validated {
            bail!("Sudo context not validated");
        }

        let mut command = if self.direct {
            Command::new(cmd)
        } else {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(cmd);
            c
        };

        command
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))
    }
}

impl SudoProvider for SudoContext {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run_internal(cmd, args)?;
        Ok(output.into())
    }

    fn command_prefix(&self) -> Vec<String> {
        if self.direct {
            Vec::new()
        } else {
            vec!["sudo".to_string(), "-n".to_string()]
        }
    }
}

impl Drop for SudoContext {
    fn drop(&mut self) {
        if !self.direct {
            // Invalidate sudo timestamp to release privileges
            let _ = Command::new("sudo")
                .args(["-k"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_context_has_no_prefix() {
        let ctx = SudoContext {
            validated: true,
            direct: true,
        };
        assert!(ctx.command_prefix().is_empty());
        let out = ctx.run("true", &[]).unwrap();
        assert!(out.success);
    }

    #[test]
    fn test_sudo_prefix_is_non_interactive() {
        let ctx = SudoContext {
            validated: true,
            direct: false,
        };
        assert_eq!(ctx.command_prefix(), vec!["sudo", "-n"]);
        std::mem::forget(ctx);
    }

    #[test]
    fn test_unvalidated_context_refuses() {
        let ctx = SudoContext {
            validated: false,
            direct: true,
        };
        assert!(ctx.run("true", &[]).is_err());
    }
}
