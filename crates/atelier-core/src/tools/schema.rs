//! Argument validation against a tool's parameter schema
//!
//! Only the subset of JSON schema the adapter parser emits is checked:
//! `required`, per-property `type` (single or list) and
//! `additionalProperties: false`.

use serde_json::{Map, Value};

/// Check `args` against `schema`, returning a human-readable reason on failure
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let empty = Map::new();
    let args = match args {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(format!(
                "arguments must be a JSON object, got {}",
                type_name(other)
            ))
        }
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(format!("missing required parameter '{}'", name));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in args {
        match properties.and_then(|p| p.get(key)) {
            Some(property) => check_type(key, property, value)?,
            None if closed => return Err(format!("unexpected parameter '{}'", key)),
            None => {}
        }
    }

    Ok(())
}

fn check_type(key: &str, property: &Value, value: &Value) -> Result<(), String> {
    let allowed: Vec<&str> = match property.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };

    if allowed.iter().any(|t| matches_type(t, value)) {
        Ok(())
    } else {
        Err(format!(
            "parameter '{}' expected {}, got {}",
            key,
            allowed.join(" | "),
            type_name(value)
        ))
    }
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
                "scale": {"type": ["number", "null"]},
            },
            "required": ["name"],
            "additionalProperties": false,
        })
    }

    #[test]
    fn test_valid_args() {
        assert!(validate_args(&schema(), &json!({"name": "cube"})).is_ok());
        assert!(validate_args(&schema(), &json!({"name": "cube", "count": 3, "scale": 1.5})).is_ok());
        assert!(validate_args(&schema(), &json!({"name": "cube", "scale": null})).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate_args(&schema(), &json!({"count": 1})).unwrap_err();
        assert!(err.contains("missing required parameter 'name'"));

        let err = validate_args(&schema(), &Value::Null).unwrap_err();
        assert!(err.contains("'name'"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_args(&schema(), &json!({"name": "cube", "count": 1.5})).unwrap_err();
        assert_eq!(err, "parameter 'count' expected integer, got number");
    }

    #[test]
    fn test_unexpected_parameter() {
        let err = validate_args(&schema(), &json!({"name": "cube", "color": "red"})).unwrap_err();
        assert!(err.contains("unexpected parameter 'color'"));

        let mut open = schema();
        open["additionalProperties"] = json!(true);
        assert!(validate_args(&open, &json!({"name": "cube", "color": "red"})).is_ok());
    }

    #[test]
    fn test_non_object_args() {
        assert!(validate_args(&schema(), &json!([1, 2])).is_err());
    }
}
