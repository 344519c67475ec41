//! Core provider traits
//!
//! - `Provider` - one external agent-CLI implementation driving a session
//! - `ProviderFactory` - builds providers for the name-keyed registry

use crate::config::AgentLaunchConfig;
use crate::error::Result;
use crate::types::{OutboundMessage, ProviderEvent, ProviderStatus, Session};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Settings shared by every provider the registry creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Grace period between graceful and forceful termination
    pub stop_grace: Duration,
    /// Number of stderr lines kept for diagnostics
    pub stderr_lines: usize,
    /// Broadcast capacity for provider events
    pub event_buffer: usize,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(3),
            stderr_lines: 50,
            event_buffer: 1024,
        }
    }
}

/// A pluggable agent backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name of this provider
    fn name(&self) -> &str;

    /// Launch the agent for `session`; a no-op if already running
    async fn start(&self, session: &Session) -> Result<ProviderStatus>;

    /// Terminate the agent, gracefully first
    async fn stop(&self) -> Result<ProviderStatus>;

    /// Write one message into the agent's input, returning once flushed
    async fn send(&self, message: &OutboundMessage) -> Result<()>;

    /// Subscribe to normalized output events.
    ///
    /// Subscribe before `start` to observe every event.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Last known status, without blocking
    fn status(&self) -> ProviderStatus;

    /// Whether the agent process is still alive
    async fn is_alive(&self) -> bool;
}

/// Creates providers of one kind
pub trait ProviderFactory: Send + Sync {
    fn create(
        &self,
        name: &str,
        launch: AgentLaunchConfig,
        options: &ProviderOptions,
    ) -> Result<Arc<dyn Provider>>;
}
