//! Correlation-indexed waiters for tool results

use crate::error::{Error, Result};
use crate::types::ToolResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

type Key = (String, String);

/// Pending `wait_tool_result` calls keyed by (tool name, correlation id).
///
/// Every waiter owns its own entry; the dispatcher removes and signals all
/// waiters of a key at once, and a waiter that times out removes itself.
#[derive(Default)]
pub struct WaiterTable {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<Key, Vec<(u64, oneshot::Sender<ToolResult>)>>>,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the result of `tool_name` under `correlation_id`
    pub async fn wait(
        &self,
        tool_name: &str,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<ToolResult> {
        let key = (tool_name.to_string(), correlation_id.to_string());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(key.clone()).or_default().push((id, tx));

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(Error::Internal(format!(
                "waiter for {} dropped",
                tool_name
            ))),
            Err(_) => {
                self.remove(&key, id);
                Err(Error::timeout(format!(
                    "tool result {} ({})",
                    tool_name, correlation_id
                )))
            }
        }
    }

    /// Deliver `result` to every waiter on its key; returns how many matched
    pub fn notify(&self, result: &ToolResult) -> usize {
        let key = (result.name.clone(), result.correlation_id.clone());
        let Some(waiters) = self.waiters.lock().remove(&key) else {
            return 0;
        };
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(result.clone());
        }
        count
    }

    /// Number of outstanding waiters
    pub fn pending(&self) -> usize {
        self.waiters.lock().values().map(Vec::len).sum()
    }

    /// Drop every waiter; their waits fail immediately
    pub fn clear(&self) {
        self.waiters.lock().clear();
    }

    fn remove(&self, key: &Key, id: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(entries) = waiters.get_mut(key) {
            entries.retain(|(entry, _)| *entry != id);
            if entries.is_empty() {
                waiters.remove(key);
            }
        }
    }
}
