//! Agent configuration and host facts
//!
//! Both are resolved once in `main` and passed down as plain values; nothing
//! here is looked up lazily later.

use anyhow::{Context, Result, bail};
use converge::{OrchestratorConfig, ToolConfig};
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, CString};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Default file naming the user the convergence tool runs as
pub const DEFAULT_EXEC_USER_FILE: &str = "/etc/chef-user";

/// Directory under the execution user's home holding the configuration root
pub const DEFAULT_ROOT_NAME: &str = "chef";

/// `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub tool: ToolSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Configuration root; defaults to `<exec user home>/chef`
    pub config_root: Option<String>,

    /// Execution user; read from `exec_user_file` when unset
    pub exec_user: Option<String>,

    pub exec_user_file: String,

    /// Run the tool and copies through sudo
    pub elevate: bool,

    /// File receiving the JSON progress history of the current run
    pub status_file: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            config_root: None,
            exec_user: None,
            exec_user_file: DEFAULT_EXEC_USER_FILE.to_string(),
            elevate: true,
            status_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSection {
    pub program: String,
    pub script: String,
    pub timeout_secs: Option<u64>,
}

impl Default for ToolSection {
    fn default() -> Self {
        let tool = ToolConfig::default();
        Self {
            program: tool.program,
            script: tool.script,
            timeout_secs: None,
        }
    }
}

impl ToolSection {
    pub fn to_tool_config(&self) -> ToolConfig {
        ToolConfig {
            program: self.program.clone(),
            script: self.script.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl AgentConfig {
    /// Load from the standard location; a missing file gives defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn status_file(&self) -> Option<PathBuf> {
        self.agent.status_file.as_deref().map(paths::expand)
    }
}

/// Facts about the host, resolved at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    pub exec_user: String,
    pub exec_home: PathBuf,
    pub config_root: PathBuf,
    pub elevate: bool,
}

impl HostFacts {
    /// Resolve the execution user, their home, and the configuration root.
    ///
    /// `root_override` (from the command line or environment) beats the
    /// config file, which beats `<home>/chef`.
    pub fn resolve(config: &AgentConfig, root_override: Option<PathBuf>) -> Result<Self> {
        let exec_user = match &config.agent.exec_user {
            Some(user) => user.clone(),
            None => read_exec_user(Path::new(&config.agent.exec_user_file))?,
        };
        let exec_home = home_of(&exec_user)?;

        let config_root = root_override
            .or_else(paths::config_root_override)
            .or_else(|| config.agent.config_root.as_deref().map(paths::expand))
            .unwrap_or_else(|| exec_home.join(DEFAULT_ROOT_NAME));

        log::debug!(
            "Host facts: user={} home={} root={}",
            exec_user,
            exec_home.display(),
            config_root.display()
        );

        Ok(Self {
            exec_user,
            exec_home,
            config_root,
            elevate: config.agent.elevate,
        })
    }

    pub fn orchestrator_config(&self, config: &AgentConfig) -> OrchestratorConfig {
        OrchestratorConfig {
            config_root: self.config_root.clone(),
            exec_user: self.exec_user.clone(),
            tool: config.tool.to_tool_config(),
        }
    }
}

/// First non-empty line of the user file
fn read_exec_user(path: &Path) -> Result<String> {
    if !path.exists() {
        // Fall back to whoever is running us
        if let Ok(user) = std::env::var("USER")
            && !user.is_empty()
        {
            log::debug!("{} not found, using $USER={}", path.display(), user);
            return Ok(user);
        }
        bail!(
            "No execution user: {} does not exist and $USER is unset",
            path.display()
        );
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .with_context(|| format!("{} is empty", path.display()))
}

/// Home directory of a user from the password database
#[cfg(unix)]
pub fn home_of(user: &str) -> Result<PathBuf> {
    let c_user = CString::new(user).context("Invalid user name")?;

    // SAFETY: getpwnam returns a pointer into static storage or null; the
    // home string is copied out before any other passwd call.
    let home = unsafe {
        let pw = libc::getpwnam(c_user.as_ptr());
        if pw.is_null() || (*pw).pw_dir.is_null() {
            None
        } else {
            Some(CStr::from_ptr((*pw).pw_dir).to_string_lossy().into_owned())
        }
    };

    home.map(PathBuf::from)
        .with_context(|| format!("Unknown user: {user}"))
}

#[cfg(not(unix))]
pub fn home_of(_user: &str) -> Result<PathBuf> {
    dirs::home_dir().context("Could not determine home directory")
}
