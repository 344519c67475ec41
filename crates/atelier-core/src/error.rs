//! Error types for Atelier Core

use thiserror::Error;

/// Main error type for Atelier operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Catalog build failed: {0}")]
    CatalogBuildFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Agent session errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Project directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Agent process not running: {0}")]
    ProcessNotRunning(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Failed to start agent: {0}")]
    StartFailed(String),

    #[error("Failed to stop agent: {0}")]
    StopFailed(String),
}

/// Auxiliary worker process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process '{name}' failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    #[error("Process '{name}' failed to stop: {reason}")]
    StopFailed { name: String, reason: String },
}

/// Tool-call errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool call rejected: {0}")]
    Rejected(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
}

impl Error {
    /// Shorthand for the timeout condition every bounded wait fails with
    pub fn timeout(what: impl Into<String>) -> Self {
        Error::Timeout(what.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_start_failed_names_process() {
        let err = Error::Process(ProcessError::StartFailed {
            name: "unity_bridge".to_string(),
            reason: "exited with status 1".to_string(),
        });
        assert!(err.to_string().contains("unity_bridge"));
    }

    #[test]
    fn test_timeout_helper() {
        let err = Error::timeout("wait_tool_result");
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timed out: wait_tool_result");
    }

    #[test]
    fn test_error_serializes_as_string() {
        let err = Error::Agent(AgentError::DirectoryNotFound("/nope".to_string()));
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Agent error: Project directory not found: /nope\"");
    }
}
