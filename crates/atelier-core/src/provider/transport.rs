//! Line transport over an agent process's stdin/stdout/stderr

use super::classify::classify_line;
use crate::error::{AgentError, Error, Result};
use crate::process::{next_line_lossy, StderrRing};
use crate::types::ProviderEvent;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Transport layer for one agent process.
///
/// Writes go through a single lock so outbound lines are totally ordered
/// and never interleave. Output is classified in emission order by one
/// reader task per stream.
pub struct Transport {
    stdin: Mutex<Option<ChildStdin>>,
    /// Cleared once stdout reaches EOF or fails
    open: Arc<AtomicBool>,
    stdout_task: Mutex<Option<JoinHandle<()>>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Spawn the agent process and start its readers
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
        events: broadcast::Sender<ProviderEvent>,
        stderr_tail: Arc<StderrRing>,
    ) -> Result<(Self, Child)> {
        debug!("Spawning agent: {} {:?} (cwd: {:?})", command, args, cwd);

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Agent(AgentError::StartFailed(format!(
                    "Failed to spawn agent process '{}': {}",
                    command, e
                )))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| capture_failed("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| capture_failed("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| capture_failed("stderr"))?;

        let open = Arc::new(AtomicBool::new(true));
        let stdout_task = tokio::spawn(Self::read_stdout_task(
            stdout,
            events.clone(),
            Arc::clone(&open),
        ));
        // Drain stderr so the agent can't deadlock on a full pipe.
        let stderr_task = tokio::spawn(Self::read_stderr_task(stderr, events, stderr_tail));

        Ok((
            Self {
                stdin: Mutex::new(Some(stdin)),
                open,
                stdout_task: Mutex::new(Some(stdout_task)),
                stderr_task: Mutex::new(Some(stderr_task)),
            },
            child,
        ))
    }

    /// Whether the agent's stdout is still open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Shared handle to the liveness flag
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    /// Write one line and flush it
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::Agent(AgentError::ProcessNotRunning("stdin closed".to_string())))?;

        trace!("Sending to stdin: {}", line);
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close stdin, which many agents treat as a request to exit
    pub async fn close_stdin(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!("Error closing agent stdin: {}", e);
            }
        }
    }

    /// Wait for the readers to flush remaining output.
    ///
    /// Readers still blocked after `timeout` are aborted.
    pub async fn drain(&self, timeout: Duration) {
        for slot in [&self.stdout_task, &self.stderr_task] {
            let Some(mut task) = slot.lock().await.take() else {
                continue;
            };
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                debug!("Agent output drain timed out, aborting reader");
                task.abort();
            }
        }
    }

    /// Background task to read and classify stdout lines
    async fn read_stdout_task(
        stdout: ChildStdout,
        events: broadcast::Sender<ProviderEvent>,
        open: Arc<AtomicBool>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();

        loop {
            match next_line_lossy(&mut reader, &mut buf).await {
                Ok(None) => {
                    debug!("Agent stdout closed");
                    break;
                }
                Ok(Some(line)) => {
                    trace!("Agent stdout: {}", line);
                    if let Some(event) = classify_line(&line) {
                        if events.send(event).is_err() {
                            trace!("No subscribers for agent event");
                        }
                    }
                }
                Err(e) => {
                    error!("Error reading agent stdout: {}", e);
                    break;
                }
            }
        }
        open.store(false, Ordering::Release);
    }

    /// Background task to surface stderr as non-fatal error events
    async fn read_stderr_task(
        stderr: ChildStderr,
        events: broadcast::Sender<ProviderEvent>,
        tail: Arc<StderrRing>,
    ) {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();

        loop {
            match next_line_lossy(&mut reader, &mut buf).await {
                Ok(None) => {
                    debug!("Agent stderr closed");
                    break;
                }
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        // Agents often log here; never fatal.
                        warn!("Agent stderr: {}", trimmed);
                        tail.push(trimmed);
                        let _ = events.send(ProviderEvent::error(trimmed));
                    }
                }
                Err(e) => {
                    error!("Error reading agent stderr: {}", e);
                    break;
                }
            }
        }
    }
}

fn capture_failed(stream: &str) -> Error {
    Error::Agent(AgentError::StartFailed(format!(
        "Failed to capture {}",
        stream
    )))
}
