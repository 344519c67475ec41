//! Classification of raw agent output lines into provider events

use crate::types::{ProviderEvent, ToolCall};
use serde_json::{Map, Value};

/// Classify one stdout line.
///
/// Total: anything that is not a recognizable tool call or final reply
/// becomes a token carrying the raw text. Blank lines yield `None`.
pub fn classify_line(line: &str) -> Option<ProviderEvent> {
    let raw = line.trim_end_matches(['\r', '\n']);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(event) = classify_object(&obj) {
                return Some(event);
            }
        }
    }

    Some(ProviderEvent::token(raw))
}

fn classify_object(obj: &Map<String, Value>) -> Option<ProviderEvent> {
    if let Some(Value::Object(call)) = obj.get("tool_call") {
        let name = call.get("name").and_then(Value::as_str)?;
        let args = call
            .get("args")
            .or_else(|| call.get("arguments"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let correlation_id = correlation_of(call).or_else(|| correlation_of(obj));

        return Some(ProviderEvent::ToolCall(ToolCall {
            name: name.to_string(),
            args,
            correlation_id,
        }));
    }

    if let Some(Value::String(content)) = obj.get("final") {
        return Some(ProviderEvent::Final {
            content: content.clone(),
        });
    }

    None
}

fn correlation_of(obj: &Map<String, Value>) -> Option<String> {
    obj.get("correlationId")
        .or_else(|| obj.get("correlation_id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_tool_call_line() {
        let event =
            classify_line(r#"{"tool_call": {"name": "create_object", "args": {"name": "cube"}}}"#)
                .unwrap();

        assert_eq!(
            event,
            ProviderEvent::ToolCall(ToolCall {
                name: "create_object".to_string(),
                args: json!({"name": "cube"}),
                correlation_id: None,
            })
        );
    }

    #[test]
    fn test_tool_call_correlation_and_default_args() {
        let event = classify_line(r#"{"correlationId": "t-9", "tool_call": {"name": "ping"}}"#);

        match event {
            Some(ProviderEvent::ToolCall(call)) => {
                assert_eq!(call.args, json!({}));
                assert_eq!(call.correlation_id.as_deref(), Some("t-9"));
            }
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_final_line() {
        assert_eq!(
            classify_line(r#"{"final": "done"}"#),
            Some(ProviderEvent::Final {
                content: "done".to_string()
            })
        );
    }

    #[test]
    fn test_plain_text_is_token() {
        assert_eq!(
            classify_line("Thinking about the scene...\n"),
            Some(ProviderEvent::token("Thinking about the scene..."))
        );
    }

    #[test]
    fn test_malformed_json_falls_back_to_token() {
        let line = r#"{"tool_call": {"name": "x""#;
        assert_eq!(classify_line(line), Some(ProviderEvent::token(line)));
    }

    #[test]
    fn test_json_without_tool_call_is_token() {
        let line = r#"{"tool_call": "not an object", "other": 1}"#;
        assert_eq!(classify_line(line), Some(ProviderEvent::token(line)));

        let line = r#"[1, 2, 3]"#;
        assert_eq!(classify_line(line), Some(ProviderEvent::token(line)));
    }

    #[test]
    fn test_tool_call_without_name_is_token() {
        let line = r#"{"tool_call": {"args": {}}}"#;
        assert_eq!(classify_line(line), Some(ProviderEvent::token(line)));
    }

    #[test]
    fn test_blank_lines_ignored() {
        assert_eq!(classify_line(""), None);
        assert_eq!(classify_line("   \r\n"), None);
    }
}
