//! A single supervised auxiliary worker process

use super::lines::next_line_lossy;
use super::ring::StderrRing;
use super::terminate::terminate_child;
use crate::error::{Error, ProcessError, Result};
use crate::types::{ProcessSpec, ProcessStatus};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Environment variable carrying the project id into workers
pub const PROJECT_ID_ENV: &str = "ATELIER_PROJECT_ID";

/// How long stop() waits for output readers after the child is gone
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Anything the process manager can start, stop and report on
#[async_trait]
pub trait SupervisedProcess: Send + Sync {
    fn name(&self) -> &str;

    /// Start unless already running
    async fn start(&self, project_id: &str) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn is_running(&self) -> bool;

    async fn status(&self) -> ProcessStatus;
}

struct RunningChild {
    child: Child,
    pid: Option<u32>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// An OS process launched from a [`ProcessSpec`]
pub struct ManagedProcess {
    spec: ProcessSpec,
    grace: Duration,
    stderr: Arc<StderrRing>,
    running: Mutex<Option<RunningChild>>,
}

impl ManagedProcess {
    pub fn new(spec: ProcessSpec, stderr_lines: usize, grace: Duration) -> Self {
        Self {
            spec,
            grace,
            stderr: Arc::new(StderrRing::new(stderr_lines)),
            running: Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Recent stderr lines of this worker
    pub fn stderr(&self) -> &StderrRing {
        &self.stderr
    }

    fn command(&self, project_id: &str) -> Command {
        let mut cmd = Command::new(&self.spec.command);
        cmd.args(
            self.spec
                .args
                .iter()
                .map(|a| a.replace("{project_id}", project_id)),
        )
        .envs(&self.spec.env)
        .env(PROJECT_ID_ENV, project_id)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        if let Some(dir) = &self.spec.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn start_failed(&self, reason: impl Into<String>) -> Error {
        Error::Process(ProcessError::StartFailed {
            name: self.spec.name.clone(),
            reason: reason.into(),
        })
    }

    async fn read_stdout_task(name: String, stdout: ChildStdout) {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            match next_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => debug!("[{}] {}", name, line),
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading stdout of {}: {}", name, e);
                    break;
                }
            }
        }
    }

    async fn read_stderr_task(name: String, stderr: ChildStderr, ring: Arc<StderrRing>) {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            match next_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        debug!("[{}] stderr: {}", name, trimmed);
                        ring.push(trimmed);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading stderr of {}: {}", name, e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl SupervisedProcess for ManagedProcess {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn start(&self, project_id: &str) -> Result<()> {
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_mut() {
            if matches!(current.child.try_wait(), Ok(None)) {
                debug!("{} already running (pid {:?})", self.spec.name, current.pid);
                return Ok(());
            }
        }
        *running = None;

        info!("Starting {} ({})", self.spec.name, self.spec.command);

        let mut child = self
            .command(project_id)
            .spawn()
            .map_err(|e| self.start_failed(format!("spawn {}: {}", self.spec.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.start_failed("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.start_failed("failed to capture stderr"))?;

        let stdout_task = tokio::spawn(Self::read_stdout_task(self.spec.name.clone(), stdout));
        let stderr_task = tokio::spawn(Self::read_stderr_task(
            self.spec.name.clone(),
            stderr,
            Arc::clone(&self.stderr),
        ));

        if self.spec.ready_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.spec.ready_delay_ms)).await;

            if let Ok(Some(status)) = child.try_wait() {
                let _ = tokio::time::timeout(DRAIN_TIMEOUT, stderr_task).await;
                stdout_task.abort();
                let tail = self.stderr.joined();
                return Err(self.start_failed(if tail.is_empty() {
                    format!("exited during startup ({})", status)
                } else {
                    format!("exited during startup ({}): {}", status, tail)
                }));
            }
        }

        let pid = child.id();
        info!("{} started (pid {:?})", self.spec.name, pid);

        *running = Some(RunningChild {
            child,
            pid,
            stdout_task,
            stderr_task,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(mut current) = self.running.lock().await.take() else {
            debug!("{} not running, nothing to stop", self.spec.name);
            return Ok(());
        };

        info!("Stopping {} (pid {:?})", self.spec.name, current.pid);

        let result = terminate_child(&mut current.child, &self.spec.name, self.grace).await;

        for task in [current.stdout_task, current.stderr_task] {
            if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                debug!("{} output drain timed out", self.spec.name);
            }
        }

        result.map_err(|e| {
            Error::Process(ProcessError::StopFailed {
                name: self.spec.name.clone(),
                reason: e.to_string(),
            })
        })?;

        info!("{} stopped", self.spec.name);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        let mut running = self.running.lock().await;
        match running.as_mut() {
            Some(current) => matches!(current.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn status(&self) -> ProcessStatus {
        let mut running = self.running.lock().await;
        let (alive, pid) = match running.as_mut() {
            Some(current) => {
                let alive = matches!(current.child.try_wait(), Ok(None));
                (alive, if alive { current.pid } else { None })
            }
            None => (false, None),
        };

        ProcessStatus {
            name: self.spec.name.clone(),
            running: alive,
            pid,
            last_stderr: self.stderr.joined(),
        }
    }
}
