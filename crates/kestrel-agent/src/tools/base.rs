//! Tool trait — the interface every agent tool implements.
//!
//! The loop discovers tools by `name()`, advertises their schemas via
//! `to_definition()`, and dispatches calls through the registry. Handlers
//! never raise across the registry boundary; failures become `Error: …`
//! strings the model can read and recover from.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use kestrel_core::types::ToolDefinition;

/// Argument object passed to tool handlers.
pub type ToolParams = HashMap<String, Value>;

// ─────────────────────────────────────────────
// Tool trait
// ─────────────────────────────────────────────

/// Every agent tool implements this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls this tool by. Names are stable
    /// identifiers; renaming breaks recall from stored history.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters:
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute with validated arguments. May read loop-injected implicit
    /// fields (`_session_key`, `_channel`, ...) and must tolerate their
    /// absence.
    async fn execute(&self, params: ToolParams) -> anyhow::Result<String>;

    /// The definition sent to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

// ─────────────────────────────────────────────
// Param helpers
// ─────────────────────────────────────────────

/// Extract a required string param.
pub fn require_string(params: &ToolParams, key: &str) -> anyhow::Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {key}"))
}

pub fn optional_string(params: &ToolParams, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(String::from)
}

pub fn optional_i64(params: &ToolParams, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Optional boolean, `false` when absent.
pub fn optional_bool(params: &ToolParams, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

// ─────────────────────────────────────────────
// Schema validation
// ─────────────────────────────────────────────

/// Validate `params` against a tool's JSON schema.
///
/// Checks required fields and primitive types for declared properties.
/// Loop-injected implicit fields (`_`-prefixed) and undeclared extras pass
/// through untouched — tools strip what they consume.
pub fn validate_params(schema: &Value, params: &ToolParams) -> Result<(), String> {
    let properties = schema.get("properties").and_then(|p| p.as_object());

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if !params.contains_key(name) {
                return Err(format!("missing required parameter '{name}'"));
            }
        }
    }

    let Some(properties) = properties else {
        return Ok(());
    };

    for (key, value) in params {
        if key.starts_with('_') {
            continue;
        }
        let Some(spec) = properties.get(key) else {
            continue;
        };
        let Some(expected) = spec.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(format!("parameter '{key}' should be of type {expected}"));
        }
    }

    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "limit": {"type": "integer"},
                "force": {"type": "boolean"}
            },
            "required": ["location"]
        })
    }

    fn params(pairs: &[(&str, Value)]) -> ToolParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_require_string() {
        let p = params(&[("path", json!("/tmp/x"))]);
        assert_eq!(require_string(&p, "path").unwrap(), "/tmp/x");
        assert!(require_string(&p, "missing").is_err());

        let p = params(&[("path", json!(42))]);
        assert!(require_string(&p, "path").is_err());
    }

    #[test]
    fn test_optional_helpers() {
        let p = params(&[("n", json!(5)), ("b", json!(true)), ("s", json!("x"))]);
        assert_eq!(optional_i64(&p, "n"), Some(5));
        assert!(optional_bool(&p, "b"));
        assert!(!optional_bool(&p, "absent"));
        assert_eq!(optional_string(&p, "s").as_deref(), Some("x"));
    }

    #[test]
    fn test_validate_ok() {
        let p = params(&[("location", json!("Cilacap")), ("limit", json!(3))]);
        assert!(validate_params(&schema(), &p).is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let p = params(&[("limit", json!(3))]);
        let err = validate_params(&schema(), &p).unwrap_err();
        assert!(err.contains("location"));
    }

    #[test]
    fn test_validate_wrong_type() {
        let p = params(&[("location", json!("x")), ("limit", json!("three"))]);
        let err = validate_params(&schema(), &p).unwrap_err();
        assert!(err.contains("limit"));
        assert!(err.contains("integer"));
    }

    #[test]
    fn test_validate_ignores_implicit_and_extras() {
        let p = params(&[
            ("location", json!("x")),
            ("_session_key", json!(123)),
            ("context_text", json!("raw text")),
        ]);
        assert!(validate_params(&schema(), &p).is_ok());
    }

    #[tokio::test]
    async fn test_default_definition() {
        struct Dummy;

        #[async_trait]
        impl Tool for Dummy {
            fn name(&self) -> &str {
                "dummy"
            }
            fn description(&self) -> &str {
                "A test tool"
            }
            fn parameters(&self) -> Value {
                json!({"type": "object", "properties": {}, "required": []})
            }
            async fn execute(&self, _params: ToolParams) -> anyhow::Result<String> {
                Ok("ok".into())
            }
        }

        let def = Dummy.to_definition();
        assert_eq!(def.function.name, "dummy");
        assert_eq!(def.tool_type, "function");
    }
}
