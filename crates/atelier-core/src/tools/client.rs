//! Tool-execution backends

use crate::config::ToolCommandConfig;
use crate::error::{Error, Result, ToolError};
use crate::types::{ToolRequest, ToolResponse};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Executes validated tool calls on behalf of an agent
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolExecutionClient: Send + Sync {
    async fn execute(&self, request: ToolRequest) -> Result<ToolResponse>;
}

/// Runs one command per tool call.
///
/// The request is written to the command's stdin as a single JSON line and
/// the last non-empty stdout line is read back as the [`ToolResponse`].
pub struct CommandToolClient {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandToolClient {
    pub fn new(config: &ToolCommandConfig, timeout: Duration) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout,
        }
    }
}

#[async_trait]
impl ToolExecutionClient for CommandToolClient {
    async fn execute(&self, request: ToolRequest) -> Result<ToolResponse> {
        debug!(
            "Executing tool {} via {} (correlation {})",
            request.tool_name, self.command, request.correlation_id
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::ExecutionFailed(format!("failed to spawn {}: {}", self.command, e))
            })?;

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        if let Some(mut stdin) = child.stdin.take() {
            // A command may answer without reading its input
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                debug!("Tool command closed stdin early: {}", e);
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::timeout(format!("tool {}", request.tool_name)))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last = stdout.lines().rev().find(|l| !l.trim().is_empty());

        match last.map(serde_json::from_str::<ToolResponse>) {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(ToolError::ExecutionFailed(format!("malformed tool response: {}", e)).into()),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("Tool command produced no response ({}): {}", output.status, stderr.trim());
                Err(ToolError::ExecutionFailed(format!(
                    "no response from tool command ({})",
                    output.status
                ))
                .into())
            }
        }
    }
}

/// Backend used when no tool command is configured
pub struct UnconfiguredToolClient;

#[async_trait]
impl ToolExecutionClient for UnconfiguredToolClient {
    async fn execute(&self, request: ToolRequest) -> Result<ToolResponse> {
        Err(ToolError::ExecutionFailed(format!(
            "no tool backend configured for {}",
            request.tool_name
        ))
        .into())
    }
}
