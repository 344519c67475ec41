//! Session and runner status types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A live agent session for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub project_id: String,
    pub session_id: String,
    /// Name of the provider driving this session
    pub provider: String,
    /// Opaque context handed to the provider at start
    pub context_pack: serde_json::Value,
    pub working_directory: PathBuf,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub fn new(
        project_id: impl Into<String>,
        provider: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        context_pack: serde_json::Value,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
            provider: provider.into(),
            context_pack,
            working_directory: working_directory.into(),
            started_at: chrono::Utc::now(),
        }
    }
}

/// Lifecycle phase of an agent runner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    /// No provider process
    #[default]
    Idle,
    /// Provider process is being launched
    Starting,
    /// Provider process is up and accepting messages
    Running,
    /// Provider process is shutting down
    Stopping,
}

/// Snapshot of an agent runner, readable without blocking
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStatus {
    pub phase: RunnerPhase,
    pub running: bool,
    pub pid: Option<u32>,
    pub working_directory: Option<PathBuf>,
    pub session_id: Option<String>,
    pub provider: Option<String>,
}

/// Status reported by a provider implementation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub working_directory: Option<PathBuf>,
}

/// Acknowledgment returned once a user message has been flushed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    pub session_id: String,
    pub correlation_id: String,
}
