//! Copying trees into a staging directory

use crate::context::SudoProvider;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Recursive copy of a directory's contents, plus an ownership fix when
/// running elevated.
///
/// With a [`SudoProvider`] the copy runs as `cp -a` and is followed by
/// `chown -R {owner}`; either failing is an error, since a root with the
/// wrong owner must not be used. Without one the copy is done in-process.
#[derive(Clone, Default)]
pub struct StagingSynchronizer {
    elevation: Option<Arc<dyn SudoProvider>>,
    owner: Option<String>,
}

impl StagingSynchronizer {
    /// In-process copies as the current user
    pub fn unprivileged() -> Self {
        Self::default()
    }

    /// Copies through `sudo`, chowning results to `owner`
    pub fn elevated(provider: Arc<dyn SudoProvider>, owner: &str) -> Self {
        Self {
            elevation: Some(provider),
            owner: Some(owner.to_string()),
        }
    }

    pub fn is_elevated(&self) -> bool {
        self.elevation.is_some()
    }

    /// Copy the contents of `source` (not the directory itself) into `dest`
    pub fn sync(&self, source: &Path, dest: &Path) -> Result<()> {
        if !source.is_dir() {
            return Err(sync_error(source, dest, "source is not a directory"));
        }
        log::debug!("Syncing {} -> {}", source.display(), dest.display());

        match &self.elevation {
            Some(sudo) => {
                let dest_str = dest.to_string_lossy();
                let contents = format!("{}/.", source.to_string_lossy());
                privileged(sudo.as_ref(), "mkdir", &["-p", &dest_str])?;
                privileged(sudo.as_ref(), "cp", &["-a", &contents, &dest_str])?;
                if let Some(owner) = &self.owner {
                    privileged(sudo.as_ref(), "chown", &["-R", owner, &dest_str])?;
                }
                Ok(())
            }
            None => copy_tree(source, dest).map_err(|e| sync_error(source, dest, &e.to_string())),
        }
    }

    /// Remove a staging directory
    pub fn discard(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        log::debug!("Discarding {}", dir.display());
        match &self.elevation {
            Some(sudo) => privileged(sudo.as_ref(), "rm", &["-rf", &dir.to_string_lossy()]),
            None => Ok(fs::remove_dir_all(dir)?),
        }
    }
}

fn sync_error(source: &Path, dest: &Path, message: &str) -> Error {
    Error::Sync {
        source_dir: source.to_path_buf(),
        dest: dest.to_path_buf(),
        message: message.to_string(),
    }
}

fn privileged(sudo: &dyn SudoProvider, cmd: &str, args: &[&str]) -> Result<()> {
    let command = format!("{} {}", cmd, args.join(" "));
    let output = sudo.run(cmd, args).map_err(|e| Error::Privileged {
        command: command.clone(),
        message: e.to_string(),
    })?;
    if !output.success {
        return Err(Error::Privileged {
            command,
            message: output.stderr_str().trim().to_string(),
        });
    }
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            symlink(&link, &target)?;
        } else {
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    let resolved = target.parent().map_or_else(|| link.to_path_buf(), |p| p.join(link));
    fs::copy(resolved, target).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CommandOutput;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSudo {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl SudoProvider for RecordingSudo {
        fn run(&self, cmd: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", cmd, args.join(" ")));
            let success = self.fail_on != Some(cmd);
            Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: if success { Vec::new() } else { b"denied\n".to_vec() },
                success,
            })
        }

        fn command_prefix(&self) -> Vec<String> {
            vec!["sudo".into(), "-n".into()]
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unprivileged_copy_merges_contents() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        fs::create_dir_all(src.join("cookbooks/app3/recipes")).unwrap();
        fs::write(src.join("cookbooks/app3/recipes/default.rb"), "# app3").unwrap();
        fs::write(src.join("solo.json"), "{}").unwrap();
        std::os::unix::fs::symlink("solo.json", src.join("link.json")).unwrap();

        fs::create_dir_all(dest.join("cookbooks/app1")).unwrap();
        fs::write(dest.join("cookbooks/app1/keep"), "x").unwrap();

        StagingSynchronizer::unprivileged().sync(&src, &dest).unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("cookbooks/app3/recipes/default.rb")).unwrap(),
            "# app3"
        );
        assert!(dest.join("cookbooks/app1/keep").exists());
        assert_eq!(
            fs::read_link(dest.join("link.json")).unwrap(),
            Path::new("solo.json")
        );
        assert!(!dest.join("src").exists());
    }

    #[test]
    fn test_missing_source_is_error() {
        let temp = TempDir::new().unwrap();
        let err = StagingSynchronizer::unprivileged()
            .sync(&temp.path().join("nope"), &temp.path().join("dest"))
            .unwrap_err();
        assert!(matches!(err, Error::Sync { .. }));
    }

    #[test]
    fn test_elevated_copy_chowns() {
        let temp = TempDir::new().unwrap();
        let sudo = Arc::new(RecordingSudo::default());
        let stager = StagingSynchronizer::elevated(sudo.clone(), "chef");
        stager.sync(temp.path(), Path::new("/srv/stage")).unwrap();

        let calls = sudo.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], "mkdir -p /srv/stage");
        assert!(calls[1].starts_with("cp -a ") && calls[1].ends_with("/. /srv/stage"));
        assert_eq!(calls[2], "chown -R chef /srv/stage");
    }

    #[test]
    fn test_elevated_chown_failure_is_error() {
        let temp = TempDir::new().unwrap();
        let sudo = Arc::new(RecordingSudo {
            fail_on: Some("chown"),
            ..Default::default()
        });
        let err = StagingSynchronizer::elevated(sudo, "chef")
            .sync(temp.path(), Path::new("/srv/stage"))
            .unwrap_err();
        match err {
            Error::Privileged { command, message } => {
                assert!(command.starts_with("chown"));
                assert_eq!(message, "denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_discard() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("stage");
        fs::create_dir_all(dir.join("a/b")).unwrap();
        let stager = StagingSynchronizer::unprivileged();
        stager.discard(&dir).unwrap();
        assert!(!dir.exists());
        stager.discard(&dir).unwrap();
    }
}
