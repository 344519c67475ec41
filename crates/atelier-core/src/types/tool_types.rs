//! Tool schema, execution and audit types

use serde::{Deserialize, Serialize};

/// Schema of one exposed tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the arguments
    pub parameters: serde_json::Value,
    pub examples: Vec<String>,
}

/// All tools exposed by an adapter, keyed by the adapter's content hash
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCatalog {
    pub hash: String,
    pub tools: Vec<ToolSpec>,
}

impl ToolCatalog {
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Request sent to the tool-execution backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    pub project_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub correlation_id: String,
}

/// Response from the tool-execution backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// One line of the append-only tool-call audit trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub project_id: String,
    pub session_id: String,
    pub correlation_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub ok: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
