//! Runtime orchestrator
//!
//! `AgentRuntime` wires the provider registry, tool-call protocol and worker
//! fleet together and keeps one [`AgentRunner`] per project id. Build it
//! once and share it behind an `Arc`.

use crate::config::RuntimeConfig;
use crate::error::{AgentError, Error, Result};
use crate::process::{ProcessManager, StopReport};
use crate::provider::ProviderRegistry;
use crate::runner::{AgentRunner, ToolCallProtocol};
use crate::tools::{
    AuditSink, CommandToolClient, JsonlAuditSink, NullAuditSink, ToolCatalogBuilder,
    ToolExecutionClient, UnconfiguredToolClient,
};
use crate::types::{
    ProcessStatus, RunnerNotification, RunnerStatus, SendAck, ToolCatalog, ToolResult,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct AgentRuntime {
    config: RuntimeConfig,
    registry: Arc<ProviderRegistry>,
    protocol: Arc<ToolCallProtocol>,
    fleet: ProcessManager,
    runners: RwLock<HashMap<String, Arc<AgentRunner>>>,
}

impl AgentRuntime {
    /// Build every collaborator from the runtime configuration
    pub fn from_config(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let client: Arc<dyn ToolExecutionClient> = match &config.tool_command {
            Some(command) => Arc::new(CommandToolClient::new(command, config.tool_timeout())),
            None => Arc::new(UnconfiguredToolClient),
        };
        let audit: Arc<dyn AuditSink> = match &config.audit_log {
            Some(path) => Arc::new(JsonlAuditSink::new(path)),
            None => Arc::new(NullAuditSink),
        };

        let mut protocol = ToolCallProtocol::new(client, audit)
            .with_max_calls_per_turn(config.max_calls_per_turn)
            .with_tool_timeout(config.tool_timeout());
        match &config.adapter_source {
            Some(source) => {
                let mut builder = ToolCatalogBuilder::new(source);
                if let Some(cache) = &config.catalog_cache {
                    builder = builder.with_cache_file(cache);
                }
                protocol = protocol.with_catalog(Arc::new(builder));
            }
            None => warn!("No adapter source configured, all tool calls will be rejected"),
        }

        let fleet = ProcessManager::from_specs(
            &config.processes,
            config.stderr_lines,
            config.stop_grace(),
        )?;
        let registry = ProviderRegistry::from_config(&config);

        Ok(Self::with_parts(config, registry, protocol, fleet))
    }

    /// Assemble a runtime from prebuilt parts
    pub fn with_parts(
        config: RuntimeConfig,
        registry: ProviderRegistry,
        protocol: ToolCallProtocol,
        fleet: ProcessManager,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            protocol: Arc::new(protocol),
            fleet,
            runners: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Runner for `project_id`, created on first use
    pub fn runner(&self, project_id: &str) -> Arc<AgentRunner> {
        if let Some(runner) = self.runners.read().get(project_id) {
            return Arc::clone(runner);
        }
        let mut runners = self.runners.write();
        Arc::clone(runners.entry(project_id.to_string()).or_insert_with(|| {
            Arc::new(AgentRunner::new(
                project_id,
                Arc::clone(&self.registry),
                Arc::clone(&self.protocol),
                self.config.send_timeout(),
            ))
        }))
    }

    fn existing(&self, project_id: &str) -> Result<Arc<AgentRunner>> {
        self.runners
            .read()
            .get(project_id)
            .cloned()
            .ok_or_else(|| Error::Agent(AgentError::ProcessNotRunning(project_id.to_string())))
    }

    pub async fn start_session(
        &self,
        project_id: &str,
        project_dir: &Path,
        provider: Option<&str>,
        context_pack: serde_json::Value,
    ) -> Result<RunnerStatus> {
        self.runner(project_id)
            .start(project_dir, provider, context_pack)
            .await
    }

    pub async fn stop_session(&self, project_id: &str) -> Result<RunnerStatus> {
        let runner = self.runners.read().get(project_id).cloned();
        match runner {
            Some(runner) => runner.stop().await,
            None => Ok(RunnerStatus::default()),
        }
    }

    pub async fn send(
        &self,
        project_id: &str,
        text: &str,
        correlation_id: &str,
        timeout_override: Option<Duration>,
    ) -> Result<SendAck> {
        self.existing(project_id)?
            .send(text, correlation_id, timeout_override)
            .await
    }

    pub fn session_status(&self, project_id: &str) -> RunnerStatus {
        self.runners
            .read()
            .get(project_id)
            .map(|runner| runner.status())
            .unwrap_or_default()
    }

    pub async fn wait_tool_result(
        &self,
        project_id: &str,
        tool_name: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<ToolResult> {
        self.existing(project_id)?
            .wait_tool_result(tool_name, correlation_id, timeout)
            .await
    }

    pub fn subscribe(&self, project_id: &str) -> broadcast::Receiver<RunnerNotification> {
        self.runner(project_id).subscribe()
    }

    /// Current tool catalog, if an adapter source is configured
    pub fn tool_catalog(&self) -> Result<Option<Arc<ToolCatalog>>> {
        self.protocol
            .catalog()
            .map(|builder| builder.get_cached())
            .transpose()
    }

    /// Start the auxiliary workers in declared order
    pub async fn start_fleet(&self, project_id: &str) -> Result<()> {
        self.fleet.start_sequence(project_id).await
    }

    /// Stop the auxiliary workers in reverse order
    pub async fn stop_fleet(&self) -> StopReport {
        self.fleet.stop_all().await
    }

    pub async fn fleet_status(&self) -> Vec<ProcessStatus> {
        self.fleet.status().await
    }

    /// Stop every session, then the fleet
    pub async fn shutdown(&self) -> StopReport {
        let runners: Vec<Arc<AgentRunner>> = self.runners.read().values().cloned().collect();
        info!("Shutting down {} session(s)", runners.len());

        for runner in runners {
            if let Err(e) = runner.stop().await {
                warn!("Failed to stop session for {}: {}", runner.project_id(), e);
            }
        }

        let report = self.stop_fleet().await;
        if !report.is_clean() {
            warn!("Fleet shutdown had {} failure(s)", report.failures.len());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentLaunchConfig;
    use crate::types::{ProcessSpec, RunnerPhase};

    #[test]
    fn test_from_default_config() {
        let runtime = AgentRuntime::from_config(RuntimeConfig::default()).unwrap();
        assert_eq!(runtime.config().max_calls_per_turn, 8);
        assert_eq!(runtime.registry().names(), vec!["cli"]);
        assert!(runtime.tool_catalog().unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RuntimeConfig {
            max_calls_per_turn: 0,
            ..Default::default()
        };
        assert!(matches!(
            AgentRuntime::from_config(config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_runner_shared_per_project() {
        let runtime = AgentRuntime::from_config(RuntimeConfig::default()).unwrap();
        let a = runtime.runner("p1");
        let b = runtime.runner("p1");
        let c = runtime.runner("p2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let runtime = AgentRuntime::from_config(RuntimeConfig::default()).unwrap();

        let err = runtime.send("nope", "hi", "c1", None).await.unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::ProcessNotRunning(_))));

        let status = runtime.stop_session("nope").await.unwrap();
        assert_eq!(status.phase, RunnerPhase::Idle);
        assert!(!runtime.session_status("nope").running);
    }

    #[test]
    fn test_tool_catalog_from_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("adapter.py");
        std::fs::write(&source, "@tool\ndef ping():\n    \"\"\"Ping.\"\"\"\n").unwrap();

        let config = RuntimeConfig {
            adapter_source: Some(source),
            ..Default::default()
        };
        let runtime = AgentRuntime::from_config(config).unwrap();
        let catalog = runtime.tool_catalog().unwrap().unwrap();
        assert_eq!(catalog.names(), vec!["ping"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_and_fleet_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.providers.insert(
            "cli".to_string(),
            AgentLaunchConfig::new("/bin/sh")
                .with_args(vec!["-c".into(), "while read -r line; do :; done".into()]),
        );
        config.processes = vec![
            ProcessSpec::new("engine", "sleep").with_args(vec!["30".into()]),
            ProcessSpec::new("bridge", "sleep").with_args(vec!["30".into()]),
        ];
        let runtime = AgentRuntime::from_config(config).unwrap();

        runtime.start_fleet("p1").await.unwrap();
        assert!(runtime.fleet_status().await.iter().all(|s| s.running));

        let status = runtime
            .start_session("p1", dir.path(), None, serde_json::json!(null))
            .await
            .unwrap();
        assert!(status.running);
        assert_eq!(runtime.session_status("p1").pid, status.pid);

        let ack = runtime.send("p1", "hello", "c1", None).await.unwrap();
        assert_eq!(Some(ack.session_id), status.session_id);

        let report = runtime.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(report.stopped, vec!["bridge", "engine"]);
        assert!(!runtime.session_status("p1").running);
        assert!(runtime.fleet_status().await.iter().all(|s| !s.running));
    }
}
