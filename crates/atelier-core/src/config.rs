//! Runtime and per-project configuration
//!
//! The runtime configuration is a camelCase JSON document. Every field has a
//! default so a missing file, or a partial one, is valid. Per-project agent
//! launch settings live in `<project>/.atelier/agent.json`.

use crate::error::{Error, Result};
use crate::types::ProcessSpec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable that overrides the runtime config location
pub const CONFIG_ENV_VAR: &str = "ATELIER_CONFIG";

/// Per-project agent config, relative to the project directory
pub const PROJECT_AGENT_CONFIG: &str = ".atelier/agent.json";

/// How to launch an agent executable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentLaunchConfig {
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overlaid on top of the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentLaunchConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Load the project's agent config, if the project has one.
    ///
    /// A relative executable is rewritten to an absolute path rooted at
    /// `project_dir`.
    pub fn load_for_project(project_dir: &Path) -> Result<Option<Self>> {
        let path = project_dir.join(PROJECT_AGENT_CONFIG);
        if !path.is_file() {
            debug!("No project agent config at {:?}", path);
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|e| {
            Error::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;

        if config.executable.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{}: executable must not be empty",
                path.display()
            )));
        }

        config.executable = config
            .resolve_executable(project_dir)
            .to_string_lossy()
            .to_string();
        Ok(Some(config))
    }

    /// Resolve the executable against the project directory
    pub fn resolve_executable(&self, project_dir: &Path) -> PathBuf {
        let exe = Path::new(&self.executable);
        if exe.is_absolute() {
            exe.to_path_buf()
        } else {
            project_dir.join(exe)
        }
    }
}

/// Backend command used by the command tool client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCommandConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Runtime-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub max_calls_per_turn: u32,
    pub stop_grace_ms: u64,
    pub send_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    /// Capacity of each worker's stderr ring buffer
    pub stderr_lines: usize,
    pub default_provider: String,
    /// Default launch config per provider name
    pub providers: HashMap<String, AgentLaunchConfig>,
    /// Auxiliary workers, in start order
    pub processes: Vec<ProcessSpec>,
    pub adapter_source: Option<PathBuf>,
    pub catalog_cache: Option<PathBuf>,
    pub tool_command: Option<ToolCommandConfig>,
    pub audit_log: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_calls_per_turn: 8,
            stop_grace_ms: 3000,
            send_timeout_ms: 10_000,
            tool_timeout_ms: 60_000,
            stderr_lines: 50,
            default_provider: "cli".to_string(),
            providers: HashMap::new(),
            processes: Vec::new(),
            adapter_source: None,
            catalog_cache: None,
            tool_command: None,
            audit_log: None,
        }
    }
}

impl RuntimeConfig {
    /// Default config location under the user's config directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("atelier").join("runtime.json"))
    }

    /// Pick the config path: explicit, then `ATELIER_CONFIG`, then the default
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
            .or_else(Self::default_path)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No runtime config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        info!("Loaded runtime config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_calls_per_turn == 0 {
            return Err(Error::InvalidConfig(
                "maxCallsPerTurn must be at least 1".to_string(),
            ));
        }
        if self.stderr_lines == 0 {
            return Err(Error::InvalidConfig(
                "stderrLines must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.processes {
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate process name: {}",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}
