//! Centralized path resolution for stagehand
//!
//! # Environment Variables
//!
//! - `STAGEHAND_CONFIG_DIR` - Override config directory
//! - `STAGEHAND_CONFIG_ROOT` - Override the configuration root being managed
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `STAGEHAND_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/stagehand` (if set)
//! 3. `~/.config/stagehand`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "STAGEHAND_CONFIG_DIR";

/// Environment variable for configuration root override
pub const ENV_CONFIG_ROOT: &str = "STAGEHAND_CONFIG_ROOT";

/// Get the stagehand config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join("stagehand");
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join("stagehand");
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Path of the agent config file
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Configuration root from the environment, if set
pub fn config_root_override() -> Option<PathBuf> {
    std::env::var(ENV_CONFIG_ROOT)
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| expand(&s))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// This function uses unsafe env::set_var/remove_var which can cause issues
    /// if other threads read environment variables concurrently.
    /// Only use in single-threaded test contexts.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        with_env_var(ENV_CONFIG_DIR, "/custom/stagehand", || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/stagehand"));
            assert_eq!(
                config_file().unwrap(),
                PathBuf::from("/custom/stagehand/config.toml")
            );
        });
    }

    #[test]
    fn test_config_root_override() {
        with_env_var(ENV_CONFIG_ROOT, "/srv/chef-root-test", || {
            assert_eq!(
                config_root_override(),
                Some(PathBuf::from("/srv/chef-root-test"))
            );
        });
        with_env_var(ENV_CONFIG_ROOT, "", || {
            assert_eq!(config_root_override(), None);
        });
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/chef");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("chef"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_54321/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_54321/file"));
    }
}
