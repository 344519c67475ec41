//! Tool-call protocol: turn accounting, validation, dispatch and audit

use crate::error::{Error, ToolError};
use crate::tools::{validate_args, AuditSink, ToolCatalogBuilder, ToolExecutionClient};
use crate::types::{AuditRecord, ToolCall, ToolRequest, ToolResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Turn used for tool calls that arrive before any user message
pub const ANONYMOUS_TURN: &str = "anonymous";

/// Error text of a tool call over the per-turn limit
pub const MAX_CALLS_EXCEEDED: &str = "maxCallsPerTurn exceeded";

#[derive(Default)]
struct TurnState {
    calls: HashMap<String, u32>,
    latest: Option<String>,
}

/// Per-turn tool-call counters of one session
#[derive(Default)]
pub struct TurnTracker {
    state: Mutex<TurnState>,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a turn for a user message just sent, dropping earlier turns
    pub fn begin(&self, correlation_id: &str) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.calls.insert(correlation_id.to_string(), 0);
        state.latest = Some(correlation_id.to_string());
    }

    /// Turn a tool call belongs to.
    ///
    /// An id naming an open turn wins; otherwise the call counts against
    /// the most recent turn, and with no turn at all against its own id or
    /// the anonymous turn.
    pub fn resolve(&self, correlation_id: Option<&str>) -> String {
        let state = self.state.lock();
        match correlation_id {
            Some(id) if state.calls.contains_key(id) => id.to_string(),
            other => state
                .latest
                .clone()
                .or_else(|| other.map(str::to_string))
                .unwrap_or_else(|| ANONYMOUS_TURN.to_string()),
        }
    }

    /// Count one call against `turn`; false once `max` is reached.
    ///
    /// Only the latest turn and one implicit turn are retained.
    pub fn record_call(&self, turn: &str, max: u32) -> bool {
        let mut state = self.state.lock();
        if !state.calls.contains_key(turn) {
            let TurnState { calls, latest } = &mut *state;
            calls.retain(|id, _| latest.as_deref() == Some(id.as_str()));
        }
        let calls = state.calls.entry(turn.to_string()).or_insert(0);
        if *calls >= max {
            return false;
        }
        *calls += 1;
        true
    }

    pub fn calls(&self, turn: &str) -> u32 {
        self.state.lock().calls.get(turn).copied().unwrap_or(0)
    }

    /// Number of turns currently holding a counter
    pub fn open_turns(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Close the most recent turn, discarding its counter
    pub fn finish_latest(&self) -> Option<String> {
        let mut state = self.state.lock();
        let turn = state.latest.take()?;
        state.calls.remove(&turn);
        Some(turn)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.latest = None;
    }
}

/// Identity of the session a call is made in
#[derive(Debug, Clone)]
pub struct CallContext {
    pub project_id: String,
    pub session_id: String,
}

/// Validates tool calls against the catalog and runs them on the backend
pub struct ToolCallProtocol {
    catalog: Option<Arc<ToolCatalogBuilder>>,
    client: Arc<dyn ToolExecutionClient>,
    audit: Arc<dyn AuditSink>,
    max_calls_per_turn: u32,
    tool_timeout: Duration,
}

impl ToolCallProtocol {
    pub fn new(client: Arc<dyn ToolExecutionClient>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            catalog: None,
            client,
            audit,
            max_calls_per_turn: 8,
            tool_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<ToolCatalogBuilder>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_max_calls_per_turn(mut self, max: u32) -> Self {
        self.max_calls_per_turn = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> Option<&Arc<ToolCatalogBuilder>> {
        self.catalog.as_ref()
    }

    /// Run one tool call to completion; always yields exactly one result
    pub async fn handle_call(
        &self,
        ctx: &CallContext,
        turns: &TurnTracker,
        call: &ToolCall,
    ) -> ToolResult {
        let turn = turns.resolve(call.correlation_id.as_deref());
        let correlation_id = call.correlation_id.clone().unwrap_or_else(|| turn.clone());
        let args = match &call.args {
            Value::Null => Value::Object(Default::default()),
            args => args.clone(),
        };

        if !turns.record_call(&turn, self.max_calls_per_turn) {
            warn!(
                "Tool call {} over the limit of {} for turn {}",
                call.name, self.max_calls_per_turn, turn
            );
            return ToolResult::failure(&call.name, correlation_id, MAX_CALLS_EXCEEDED);
        }

        if let Err(reason) = self.check(&call.name, &args) {
            debug!("Rejected tool call {}: {}", call.name, reason);
            let error = ToolError::Rejected(reason).to_string();
            return ToolResult::failure(&call.name, correlation_id, error);
        }

        let request = ToolRequest {
            project_id: ctx.project_id.clone(),
            tool_name: call.name.clone(),
            args: args.clone(),
            correlation_id: correlation_id.clone(),
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.tool_timeout, self.client.execute(request)).await {
            Ok(Ok(response)) if response.ok => ToolResult::success(
                &call.name,
                &correlation_id,
                response.result.unwrap_or(Value::Null),
            ),
            Ok(Ok(response)) => ToolResult::failure(
                &call.name,
                &correlation_id,
                response.error.unwrap_or_else(|| "tool reported failure".to_string()),
            ),
            Ok(Err(e)) => ToolResult::failure(&call.name, &correlation_id, e.to_string()),
            Err(_) => ToolResult::failure(
                &call.name,
                &correlation_id,
                Error::timeout(format!("tool {}", call.name)).to_string(),
            ),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(
            "Tool {} ({}) finished in {}ms, ok={}",
            call.name, correlation_id, duration_ms, result.ok
        );

        let record = AuditRecord {
            timestamp: chrono::Utc::now(),
            project_id: ctx.project_id.clone(),
            session_id: ctx.session_id.clone(),
            correlation_id,
            tool_name: call.name.clone(),
            args,
            ok: result.ok,
            error: result.error.clone(),
            duration_ms,
        };
        if let Err(e) = self.audit.record(record).await {
            warn!("Failed to audit tool call {}: {}", call.name, e);
        }

        result
    }

    fn check(&self, name: &str, args: &Value) -> std::result::Result<(), String> {
        let Some(builder) = &self.catalog else {
            return Err(format!("unknown tool '{}'", name));
        };
        let catalog = builder.get_cached().map_err(|e| e.to_string())?;
        let spec = catalog
            .get(name)
            .ok_or_else(|| format!("unknown tool '{}'", name))?;
        validate_args(&spec.parameters, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{MockAuditSink, MockToolExecutionClient, NullAuditSink};
    use crate::types::ToolResponse;
    use serde_json::json;

    const ADAPTER: &str = r#"
@mcp.tool()
def move(x: float, y: float, label: str = ""):
    """Move the selection."""
"#;

    fn ctx() -> CallContext {
        CallContext {
            project_id: "p1".to_string(),
            session_id: "s1".to_string(),
        }
    }

    fn call(args: Value, correlation_id: &str) -> ToolCall {
        ToolCall {
            name: "move".to_string(),
            args,
            correlation_id: Some(correlation_id.to_string()),
        }
    }

    fn protocol(client: MockToolExecutionClient, dir: &tempfile::TempDir) -> ToolCallProtocol {
        let source = dir.path().join("adapter.py");
        std::fs::write(&source, ADAPTER).unwrap();
        ToolCallProtocol::new(Arc::new(client), Arc::new(NullAuditSink))
            .with_catalog(Arc::new(ToolCatalogBuilder::new(source)))
    }

    #[test]
    fn test_turn_resolution() {
        let turns = TurnTracker::new();
        assert_eq!(turns.resolve(None), ANONYMOUS_TURN);
        assert_eq!(turns.resolve(Some("call-9")), "call-9");

        turns.begin("c1");
        assert_eq!(turns.resolve(Some("c1")), "c1");
        assert_eq!(turns.resolve(Some("call-9")), "c1");
        assert_eq!(turns.resolve(None), "c1");

        assert_eq!(turns.finish_latest(), Some("c1".to_string()));
        assert_eq!(turns.calls("c1"), 0);
    }

    #[test]
    fn test_begin_drops_previous_turn() {
        let turns = TurnTracker::new();
        turns.begin("c1");
        assert!(turns.record_call("c1", 8));

        turns.begin("c2");
        assert_eq!(turns.calls("c1"), 0);
        assert_eq!(turns.resolve(Some("c1")), "c2");
        assert_eq!(turns.open_turns(), 1);
    }

    #[test]
    fn test_turn_counters_stay_bounded() {
        let turns = TurnTracker::new();
        for i in 0..1000 {
            let id = format!("c{}", i);
            turns.begin(&id);
            let turn = turns.resolve(Some(&id));
            assert!(turns.record_call(&turn, 8));
        }
        assert_eq!(turns.open_turns(), 1);

        // Calls minting their own ids with no user message in flight
        turns.clear();
        for i in 0..1000 {
            let turn = turns.resolve(Some(&format!("call-{}", i)));
            turns.record_call(&turn, 8);
        }
        assert!(turns.open_turns() <= 2);
    }

    #[test]
    fn test_record_call_bounded() {
        let turns = TurnTracker::new();
        turns.begin("c1");
        assert!(turns.record_call("c1", 2));
        assert!(turns.record_call("c1", 2));
        assert!(!turns.record_call("c1", 2));
        assert_eq!(turns.calls("c1"), 2);
    }

    #[tokio::test]
    async fn test_successful_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockToolExecutionClient::new();
        client
            .expect_execute()
            .withf(|req| req.tool_name == "move" && req.project_id == "p1" && req.correlation_id == "c1")
            .times(1)
            .returning(|_| Ok(ToolResponse::ok(json!({"moved": true}))));

        let turns = TurnTracker::new();
        turns.begin("c1");
        let result = protocol(client, &dir)
            .handle_call(&ctx(), &turns, &call(json!({"x": 1.0, "y": 2}), "c1"))
            .await;

        assert!(result.ok);
        assert_eq!(result.correlation_id, "c1");
        assert_eq!(result.result, Some(json!({"moved": true})));
    }

    #[tokio::test]
    async fn test_missing_required_rejected_locally() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockToolExecutionClient::new();
        client.expect_execute().never();

        let turns = TurnTracker::new();
        let result = protocol(client, &dir)
            .handle_call(&ctx(), &turns, &call(json!({"x": 1.0}), "c1"))
            .await;

        assert!(!result.ok);
        assert!(result.error.unwrap().contains("missing required parameter 'y'"));
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockToolExecutionClient::new();
        client.expect_execute().never();

        let mut unknown = call(json!({}), "c1");
        unknown.name = "delete_everything".to_string();
        let result = protocol(client, &dir)
            .handle_call(&ctx(), &TurnTracker::new(), &unknown)
            .await;

        assert!(!result.ok);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_limit_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockToolExecutionClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_| Ok(ToolResponse::ok(json!(null))));

        let protocol = protocol(client, &dir).with_max_calls_per_turn(1);
        let turns = TurnTracker::new();
        turns.begin("c1");
        let args = json!({"x": 1, "y": 2});

        let first = protocol.handle_call(&ctx(), &turns, &call(args.clone(), "c1")).await;
        let second = protocol.handle_call(&ctx(), &turns, &call(args, "c1")).await;

        assert!(first.ok);
        assert!(!second.ok);
        assert!(second.error.unwrap().contains("maxCallsPerTurn"));
    }

    #[tokio::test]
    async fn test_backend_failure_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockToolExecutionClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_| Ok(ToolResponse::err("bridge offline")));

        let turns = TurnTracker::new();
        let args = json!({"x": 1, "y": 2});
        let result = protocol(client, &dir)
            .handle_call(&ctx(), &turns, &call(args.clone(), "c1"))
            .await;
        assert_eq!(result.error.as_deref(), Some("bridge offline"));

        struct Slow;
        #[async_trait::async_trait]
        impl ToolExecutionClient for Slow {
            async fn execute(&self, _request: ToolRequest) -> crate::error::Result<ToolResponse> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(ToolResponse::ok(json!(null)))
            }
        }

        let source = dir.path().join("adapter.py");
        let slow = ToolCallProtocol::new(Arc::new(Slow), Arc::new(NullAuditSink))
            .with_catalog(Arc::new(ToolCatalogBuilder::new(source)))
            .with_tool_timeout(Duration::from_millis(100));
        let result = slow.handle_call(&ctx(), &turns, &call(args, "c2")).await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_audit_failure_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = MockToolExecutionClient::new();
        client
            .expect_execute()
            .returning(|_| Ok(ToolResponse::ok(json!(1))));
        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|record| record.tool_name == "move" && record.ok)
            .times(1)
            .returning(|_| Err(Error::Internal("disk full".to_string())));

        let source = dir.path().join("adapter.py");
        std::fs::write(&source, ADAPTER).unwrap();
        let protocol = ToolCallProtocol::new(Arc::new(client), Arc::new(audit))
            .with_catalog(Arc::new(ToolCatalogBuilder::new(source)));

        let result = protocol
            .handle_call(&ctx(), &TurnTracker::new(), &call(json!({"x": 1, "y": 2}), "c1"))
            .await;
        assert!(result.ok);
    }
}
