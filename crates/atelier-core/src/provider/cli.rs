//! Reference provider: an agent CLI speaking JSON lines over stdio

use super::traits::{Provider, ProviderFactory, ProviderOptions};
use super::transport::Transport;
use crate::config::AgentLaunchConfig;
use crate::error::{AgentError, Error, Result};
use crate::process::{terminate_child, StderrRing, PROJECT_ID_ENV};
use crate::types::{OutboundMessage, ProviderEvent, ProviderStatus, Session};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// Environment variables exported to every agent process
pub const SESSION_ID_ENV: &str = "ATELIER_SESSION_ID";
pub const CONTEXT_PACK_ENV: &str = "ATELIER_CONTEXT_PACK";

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

struct RunningAgent {
    transport: Arc<Transport>,
    child: Child,
}

/// Launches an executable in the project directory and classifies its
/// output line by line
pub struct CliProvider {
    name: String,
    launch: AgentLaunchConfig,
    options: ProviderOptions,
    events: broadcast::Sender<ProviderEvent>,
    stderr_tail: Arc<StderrRing>,
    running: Mutex<Option<RunningAgent>>,
    status: parking_lot::Mutex<ProviderStatus>,
    /// Stdout liveness of the current agent, readable without awaiting
    open: parking_lot::Mutex<Option<Arc<AtomicBool>>>,
}

impl CliProvider {
    pub fn new(name: impl Into<String>, launch: AgentLaunchConfig, options: ProviderOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_buffer.max(1));
        Self {
            name: name.into(),
            stderr_tail: Arc::new(StderrRing::new(options.stderr_lines)),
            launch,
            options,
            events,
            running: Mutex::new(None),
            status: parking_lot::Mutex::new(ProviderStatus::default()),
            open: parking_lot::Mutex::new(None),
        }
    }

    pub fn launch(&self) -> &AgentLaunchConfig {
        &self.launch
    }

    /// Recent stderr output of the agent
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lines()
    }

    async fn transport(&self) -> Result<Arc<Transport>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.transport))
            .ok_or_else(|| Error::Agent(AgentError::ProcessNotRunning(self.name.clone())))
    }
}

#[async_trait]
impl Provider for CliProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self, session: &Session) -> Result<ProviderStatus> {
        let mut running = self.running.lock().await;

        if let Some(agent) = running.as_mut() {
            if matches!(agent.child.try_wait(), Ok(None)) {
                debug!("Agent {} already running", self.name);
                return Ok(self.status());
            }
        }
        *running = None;

        info!(
            "Starting agent {} for project {} ({})",
            self.name, session.project_id, self.launch.executable
        );

        let mut env = self.launch.env.clone();
        env.insert(SESSION_ID_ENV.to_string(), session.session_id.clone());
        env.insert(PROJECT_ID_ENV.to_string(), session.project_id.clone());
        if !session.context_pack.is_null() {
            env.insert(CONTEXT_PACK_ENV.to_string(), session.context_pack.to_string());
        }

        self.stderr_tail.clear();
        let (transport, child) = Transport::spawn(
            &self.launch.executable,
            &self.launch.args,
            &env,
            &session.working_directory,
            self.events.clone(),
            Arc::clone(&self.stderr_tail),
        )
        .await?;

        let status = ProviderStatus {
            running: true,
            pid: child.id(),
            working_directory: Some(session.working_directory.clone()),
        };
        *self.status.lock() = status.clone();
        *self.open.lock() = Some(transport.open_flag());
        *running = Some(RunningAgent {
            transport: Arc::new(transport),
            child,
        });

        info!("Agent {} started (pid {:?})", self.name, status.pid);
        Ok(status)
    }

    async fn stop(&self) -> Result<ProviderStatus> {
        let Some(mut agent) = self.running.lock().await.take() else {
            return Ok(self.status());
        };

        info!("Stopping agent {} (pid {:?})", self.name, agent.child.id());

        agent.transport.close_stdin().await;
        let result = terminate_child(&mut agent.child, &self.name, self.options.stop_grace).await;
        agent.transport.drain(DRAIN_TIMEOUT).await;

        let tail = self.stderr_tail.lines();
        if !tail.is_empty() {
            debug!("Agent {} stderr tail:\n{}", self.name, tail.join("\n"));
        }

        *self.status.lock() = ProviderStatus::default();
        *self.open.lock() = None;

        result.map_err(|e| {
            Error::Agent(AgentError::StopFailed(format!("{}: {}", self.name, e)))
        })?;
        Ok(self.status())
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let line = message.to_line()?;
        self.transport().await?.write_line(&line).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn status(&self) -> ProviderStatus {
        // An agent whose stdout hit EOF has exited or can no longer talk
        let exited = self
            .open
            .lock()
            .as_ref()
            .is_some_and(|open| !open.load(Ordering::Acquire));
        if exited {
            return ProviderStatus::default();
        }
        self.status.lock().clone()
    }

    async fn is_alive(&self) -> bool {
        match self.running.lock().await.as_mut() {
            Some(agent) => matches!(agent.child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// Factory registered for command-line providers
#[derive(Debug, Default, Clone, Copy)]
pub struct CliProviderFactory;

impl ProviderFactory for CliProviderFactory {
    fn create(
        &self,
        name: &str,
        launch: AgentLaunchConfig,
        options: &ProviderOptions,
    ) -> Result<Arc<dyn Provider>> {
        Ok(Arc::new(CliProvider::new(name, launch, options.clone())))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::UserMessage;

    fn sh_provider(script: &str) -> CliProvider {
        let launch = AgentLaunchConfig::new("/bin/sh").with_args(vec!["-c".into(), script.into()]);
        CliProvider::new("cli", launch, ProviderOptions::default())
    }

    fn session(dir: &std::path::Path) -> Session {
        Session::new("demo", "cli", dir, serde_json::json!({"scene": "main"}))
    }

    async fn next_event(rx: &mut broadcast::Receiver<ProviderEvent>) -> ProviderEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event timeout")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_runs_in_project_directory_with_session_env() {
        let dir = tempfile::tempdir().unwrap();
        let provider = sh_provider("pwd; echo \"$ATELIER_PROJECT_ID $ATELIER_CONTEXT_PACK\"; cat");
        let mut rx = provider.subscribe();

        let status = provider.start(&session(dir.path())).await.unwrap();
        assert!(status.running);
        assert!(status.pid.is_some());

        let cwd = match next_event(&mut rx).await {
            ProviderEvent::Token { content } => content,
            other => panic!("Expected token, got {:?}", other),
        };
        assert_eq!(
            std::fs::canonicalize(cwd).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
        assert_eq!(
            next_event(&mut rx).await,
            ProviderEvent::token(r#"demo {"scene":"main"}"#)
        );

        let stopped = provider.stop().await.unwrap();
        assert!(!stopped.running);
        assert!(!provider.is_alive().await);
    }

    #[tokio::test]
    async fn test_send_writes_json_line() {
        let dir = tempfile::tempdir().unwrap();
        let provider = sh_provider("while IFS= read -r l; do echo \"echo:$l\"; done");
        let mut rx = provider.subscribe();
        provider.start(&session(dir.path())).await.unwrap();

        let message = OutboundMessage::UserMessage(UserMessage {
            correlation_id: "c1".into(),
            content: "hi".into(),
        });
        provider.send(&message).await.unwrap();

        match next_event(&mut rx).await {
            ProviderEvent::Token { content } => {
                let json = content.strip_prefix("echo:").unwrap();
                let parsed: OutboundMessage = serde_json::from_str(json).unwrap();
                assert_eq!(parsed, message);
            }
            other => panic!("Expected token, got {:?}", other),
        }

        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_when_stopped_fails() {
        let provider = sh_provider("cat");
        let message = OutboundMessage::UserMessage(UserMessage {
            correlation_id: "c1".into(),
            content: "hi".into(),
        });
        let err = provider.send(&message).await.unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::ProcessNotRunning(_))));
    }

    #[tokio::test]
    async fn test_status_reflects_exited_agent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = sh_provider("exit 0");
        let started = provider.start(&session(dir.path())).await.unwrap();
        assert!(started.running);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while provider.status().running && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let status = provider.status();
        assert!(!status.running);
        assert_eq!(status.pid, None);
        assert!(!provider.is_alive().await);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let provider = sh_provider("cat");
        let first = provider.start(&session(dir.path())).await.unwrap();
        let second = provider.start(&session(dir.path())).await.unwrap();
        assert_eq!(first.pid, second.pid);
        provider.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_escalates_for_stubborn_agent() {
        let dir = tempfile::tempdir().unwrap();
        let launch = AgentLaunchConfig::new("/bin/sh")
            .with_args(vec!["-c".into(), "trap '' TERM; while true; do sleep 1; done".into()]);
        let options = ProviderOptions {
            stop_grace: Duration::from_millis(200),
            ..Default::default()
        };
        let provider = CliProvider::new("stubborn", launch, options);
        provider.start(&session(dir.path())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        provider.stop().await.unwrap();
        assert!(!provider.is_alive().await);
    }
}
