//! Provider events and the messages written back into a provider

use serde::{Deserialize, Serialize};

/// A tool invocation requested by the agent process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Normalized event produced from a provider's output stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Token { content: String },
    ToolCall(ToolCall),
    Final { content: String },
    Error { message: String },
}

impl ProviderEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Outcome of one tool call, delivered back to the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub name: String,
    pub correlation_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(
        name: impl Into<String>,
        correlation_id: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            correlation_id: correlation_id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(
        name: impl Into<String>,
        correlation_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            correlation_id: correlation_id.into(),
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// A user message addressed to the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub correlation_id: String,
    pub content: String,
}

/// Anything written into a provider's input, one JSON line each
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    UserMessage(UserMessage),
    ToolResult(ToolResult),
}

impl OutboundMessage {
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Notification re-published by an agent runner to its subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunnerNotification {
    Event {
        session_id: String,
        event: ProviderEvent,
    },
    ToolResult {
        session_id: String,
        result: ToolResult,
    },
    Stopped {
        session_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_wire_format() {
        let msg = OutboundMessage::ToolResult(ToolResult::success(
            "scene.create",
            "c-1",
            json!({"id": 7}),
        ));
        let value: serde_json::Value = serde_json::from_str(&msg.to_line().unwrap()).unwrap();

        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["correlationId"], "c-1");
        assert_eq!(value["ok"], true);
        assert_eq!(value["result"]["id"], 7);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_user_message_wire_format() {
        let msg = OutboundMessage::UserMessage(UserMessage {
            correlation_id: "c-2".to_string(),
            content: "hello".to_string(),
        });
        let line = msg.to_line().unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "user_message");
        assert_eq!(value["content"], "hello");
    }
}
