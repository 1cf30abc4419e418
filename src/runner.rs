//! Probing host programs for `doctor`

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Locate `program` the way the tool invocation will: paths are taken as
/// given, bare names are searched on `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

/// First line `program --version` prints, from stdout or stderr
pub fn version_line(program: &str) -> Result<String> {
    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to execute {program} --version"))?;
    if !output.status.success() {
        bail!("{program} --version exited with {}", output.status);
    }
    let text = if output.stdout.is_empty() {
        output.stderr
    } else {
        output.stdout
    };
    Ok(String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_find_program() {
        assert!(find_program("sh").is_some());
        assert_eq!(find_program("/bin/sh"), Some(PathBuf::from("/bin/sh")));
        assert!(find_program("definitely-not-a-command-stagehand").is_none());
        assert!(find_program("/nonexistent/bin/tool").is_none());
    }

    #[test]
    fn test_version_line() {
        assert!(version_line("/nonexistent/bin/tool").is_err());
        assert!(version_line("false").is_err());
    }
}
