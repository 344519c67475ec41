//! Agent runner - one supervised agent session per project
//!
//! The runner owns the provider's stdio for the lifetime of a session and
//! drives the tool-call protocol from a single dispatch task, so provider
//! output is handled strictly in emission order.

use super::protocol::{CallContext, ToolCallProtocol, TurnTracker};
use super::waiters::WaiterTable;
use crate::error::{AgentError, Error, Result};
use crate::provider::{Provider, ProviderRegistry};
use crate::types::{
    OutboundMessage, ProviderEvent, RunnerNotification, RunnerPhase, RunnerStatus, SendAck,
    Session, ToolResult, UserMessage,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const NOTIFICATION_BUFFER: usize = 1024;

struct ActiveSession {
    session: Session,
    provider: Arc<dyn Provider>,
    dispatch: JoinHandle<()>,
}

/// Session lifecycle and tool-call protocol for one project
pub struct AgentRunner {
    project_id: String,
    registry: Arc<ProviderRegistry>,
    protocol: Arc<ToolCallProtocol>,
    send_timeout: Duration,
    active: Mutex<Option<ActiveSession>>,
    status: parking_lot::Mutex<RunnerStatus>,
    /// Provider of the live session, for lock-free liveness checks
    provider: parking_lot::Mutex<Option<Arc<dyn Provider>>>,
    turns: Arc<TurnTracker>,
    waiters: Arc<WaiterTable>,
    notifications: broadcast::Sender<RunnerNotification>,
}

impl AgentRunner {
    pub fn new(
        project_id: impl Into<String>,
        registry: Arc<ProviderRegistry>,
        protocol: Arc<ToolCallProtocol>,
        send_timeout: Duration,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            project_id: project_id.into(),
            registry,
            protocol,
            send_timeout,
            active: Mutex::new(None),
            status: parking_lot::Mutex::new(RunnerStatus::default()),
            provider: parking_lot::Mutex::new(None),
            turns: Arc::new(TurnTracker::new()),
            waiters: Arc::new(WaiterTable::new()),
            notifications,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Start a session in `project_dir`.
    ///
    /// Returns the current status unchanged if a session is already live.
    pub async fn start(
        &self,
        project_dir: &Path,
        provider: Option<&str>,
        context_pack: serde_json::Value,
    ) -> Result<RunnerStatus> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.provider.is_alive().await {
                debug!("Agent for {} already running", self.project_id);
                return Ok(self.status());
            }
        }
        if let Some(stale) = active.take() {
            *self.provider.lock() = None;
            warn!("Agent for {} exited, starting a new session", self.project_id);
            stale.dispatch.abort();
            if let Err(e) = stale.provider.stop().await {
                debug!("Cleanup of exited agent failed: {}", e);
            }
        }

        if !project_dir.is_dir() {
            return Err(Error::Agent(AgentError::DirectoryNotFound(
                project_dir.display().to_string(),
            )));
        }

        self.set_phase(RunnerPhase::Starting);
        match self.launch(project_dir, provider, context_pack).await {
            Ok(session) => {
                *self.provider.lock() = Some(Arc::clone(&session.provider));
                *active = Some(session);
                Ok(self.status())
            }
            Err(e) => {
                error!("Failed to start agent for {}: {}", self.project_id, e);
                *self.status.lock() = RunnerStatus::default();
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        project_dir: &Path,
        provider: Option<&str>,
        context_pack: serde_json::Value,
    ) -> Result<ActiveSession> {
        let resolved = self.registry.resolve(provider, project_dir)?;
        let session = Session::new(&self.project_id, &resolved.name, project_dir, context_pack);

        // Subscribe first so no early output is missed
        let events = resolved.provider.subscribe();
        let provider_status = resolved.provider.start(&session).await?;

        self.turns.clear();
        let dispatcher = Dispatcher {
            ctx: CallContext {
                project_id: self.project_id.clone(),
                session_id: session.session_id.clone(),
            },
            provider: Arc::clone(&resolved.provider),
            protocol: Arc::clone(&self.protocol),
            turns: Arc::clone(&self.turns),
            waiters: Arc::clone(&self.waiters),
            notifications: self.notifications.clone(),
        };
        let dispatch = tokio::spawn(dispatcher.run(events));

        *self.status.lock() = RunnerStatus {
            phase: RunnerPhase::Running,
            running: true,
            pid: provider_status.pid,
            working_directory: Some(session.working_directory.clone()),
            session_id: Some(session.session_id.clone()),
            provider: Some(resolved.name.clone()),
        };

        info!(
            "Agent session {} started for {} with provider {} (pid {:?})",
            session.session_id, self.project_id, resolved.name, provider_status.pid
        );

        Ok(ActiveSession {
            session,
            provider: resolved.provider,
            dispatch,
        })
    }

    /// Stop the session, if any, and return the resulting status
    pub async fn stop(&self) -> Result<RunnerStatus> {
        let mut active = self.active.lock().await;
        let Some(current) = active.take() else {
            return Ok(self.status());
        };

        self.set_phase(RunnerPhase::Stopping);
        *self.provider.lock() = None;
        info!("Stopping agent session {}", current.session.session_id);

        let result = current.provider.stop().await;
        current.dispatch.abort();
        self.waiters.clear();
        self.turns.clear();

        let _ = self.notifications.send(RunnerNotification::Stopped {
            session_id: current.session.session_id.clone(),
        });
        *self.status.lock() = RunnerStatus::default();

        result?;
        Ok(self.status())
    }

    /// Send a user message; returns once it has been written and flushed
    pub async fn send(
        &self,
        text: &str,
        correlation_id: &str,
        timeout_override: Option<Duration>,
    ) -> Result<SendAck> {
        let (provider, session_id) = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(current) => (
                    Arc::clone(&current.provider),
                    current.session.session_id.clone(),
                ),
                None => {
                    return Err(Error::Agent(AgentError::ProcessNotRunning(
                        self.project_id.clone(),
                    )))
                }
            }
        };

        self.turns.begin(correlation_id);
        let message = OutboundMessage::UserMessage(UserMessage {
            correlation_id: correlation_id.to_string(),
            content: text.to_string(),
        });

        let timeout = timeout_override.unwrap_or(self.send_timeout);
        tokio::time::timeout(timeout, provider.send(&message))
            .await
            .map_err(|_| Error::timeout(format!("send to agent for {}", self.project_id)))??;

        debug!("Sent user message {} to {}", correlation_id, self.project_id);
        Ok(SendAck {
            session_id,
            correlation_id: correlation_id.to_string(),
        })
    }

    /// Current status snapshot, without blocking.
    ///
    /// A session whose agent has exited on its own is reported as idle.
    pub fn status(&self) -> RunnerStatus {
        let mut status = self.status.lock();
        if status.phase == RunnerPhase::Running {
            let alive = self
                .provider
                .lock()
                .as_ref()
                .is_some_and(|provider| provider.status().running);
            if !alive {
                warn!(
                    "Agent for {} exited (session {:?})",
                    self.project_id, status.session_id
                );
                *status = RunnerStatus::default();
            }
        }
        status.clone()
    }

    /// Wait for the result of one tool call
    pub async fn wait_tool_result(
        &self,
        tool_name: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<ToolResult> {
        self.waiters.wait(tool_name, correlation_id, timeout).await
    }

    /// Receive every provider event and tool result of this runner
    pub fn subscribe(&self) -> broadcast::Receiver<RunnerNotification> {
        self.notifications.subscribe()
    }

    fn set_phase(&self, phase: RunnerPhase) {
        self.status.lock().phase = phase;
    }
}

struct Dispatcher {
    ctx: CallContext,
    provider: Arc<dyn Provider>,
    protocol: Arc<ToolCallProtocol>,
    turns: Arc<TurnTracker>,
    waiters: Arc<WaiterTable>,
    notifications: broadcast::Sender<RunnerNotification>,
}

impl Dispatcher {
    async fn run(self, mut events: broadcast::Receiver<ProviderEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Dispatcher for session {} lagged, {} events dropped",
                        self.ctx.session_id, skipped
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Dispatch loop for session {} ended", self.ctx.session_id);
    }

    async fn handle(&self, event: ProviderEvent) {
        let _ = self.notifications.send(RunnerNotification::Event {
            session_id: self.ctx.session_id.clone(),
            event: event.clone(),
        });

        match event {
            ProviderEvent::ToolCall(call) => {
                debug!("Tool call {} ({:?})", call.name, call.correlation_id);
                let result = self.protocol.handle_call(&self.ctx, &self.turns, &call).await;

                if let Err(e) = self
                    .provider
                    .send(&OutboundMessage::ToolResult(result.clone()))
                    .await
                {
                    warn!("Failed to deliver result of {} to agent: {}", call.name, e);
                }

                self.waiters.notify(&result);
                let _ = self.notifications.send(RunnerNotification::ToolResult {
                    session_id: self.ctx.session_id.clone(),
                    result,
                });
            }
            ProviderEvent::Final { .. } => {
                if let Some(turn) = self.turns.finish_latest() {
                    debug!("Turn {} finished", turn);
                }
            }
            ProviderEvent::Token { content } => trace!("Agent token: {}", content),
            ProviderEvent::Error { message } => debug!("Agent error output: {}", message),
        }
    }
}
