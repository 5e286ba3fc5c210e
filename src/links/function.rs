//! `function` link handler (spec.md §4.4).
//!
//! Inline `code` runs inside a sandboxed [`rhai::Engine`] with every module
//! disabled except a small arithmetic/collection/random whitelist (spec.md
//! §9: "whitelist of name bindings is mandatory"). `language` selects a
//! syntax profile — a textual rewrite applied before the same engine
//! evaluates the result, rather than hosting two real interpreters; see
//! DESIGN.md for that Open Question resolution.

use super::{HandlerError, LinkContext};
use crate::value::{LinkOutput, Value};
use async_trait::async_trait;
use indexmap::IndexMap;
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value as JsonValue;

/// The distinguished function name that signals "terminate this recipe"
/// (spec.md §4.4).
pub const TERMINATE_FUNCTION: &str = "__terminate_recipe__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyntaxProfile {
    Rhai,
    PythonLike,
    JavaScriptLike,
}

impl SyntaxProfile {
    fn from_language(language: Option<&str>) -> Self {
        match language {
            Some("python-like") => SyntaxProfile::PythonLike,
            Some("javascript-like") => SyntaxProfile::JavaScriptLike,
            _ => SyntaxProfile::Rhai,
        }
    }

    /// Rewrite source written in the declared profile into Rhai's own
    /// syntax. Intentionally shallow — covers the common shapes
    /// (`def`/function declarations, `:`-terminated blocks) rather than
    /// attempting a full grammar translation.
    fn rewrite(self, source: &str) -> String {
        match self {
            SyntaxProfile::Rhai => source.to_string(),
            SyntaxProfile::PythonLike => source
                .replace("def ", "fn ")
                .lines()
                .map(|line| {
                    let trimmed = line.trim_end();
                    if let Some(stripped) = trimmed.strip_suffix(':') {
                        format!("{stripped} {{")
                    } else {
                        line.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
            SyntaxProfile::JavaScriptLike => source.replace("function ", "fn ").replace("const ", "let "),
        }
    }
}

fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new_raw();
    engine
        .register_fn("abs", |x: i64| x.abs())
        .register_fn("abs", |x: f64| x.abs())
        .register_fn("min", |a: i64, b: i64| a.min(b))
        .register_fn("max", |a: i64, b: i64| a.max(b))
        .register_fn("len", |s: &str| s.len() as i64)
        .register_fn("upper", |s: &str| s.to_uppercase())
        .register_fn("lower", |s: &str| s.to_lowercase())
        .register_fn("random_int", |lo: i64, hi: i64| {
            if hi <= lo {
                lo
            } else {
                lo + (rand_u64() % (hi - lo) as u64) as i64
            }
        });
    engine.set_max_operations(200_000);
    engine.set_max_expr_depth(64, 64);
    engine.set_max_string_size(64 * 1024);
    engine.set_max_array_size(10_000);
    engine
}

/// Minimal non-cryptographic generator (time-seeded) so the sandbox can
/// offer `random_int` without depending on a `rand` crate entry point the
/// sandbox whitelist would otherwise have to vet.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(3_037_000_493)
}

#[derive(Default)]
pub struct FunctionLinkHandler;

#[async_trait]
impl super::LinkHandler for FunctionLinkHandler {
    async fn execute(
        &self,
        config: &JsonValue,
        ctx: &LinkContext<'_>,
    ) -> Result<LinkOutput, HandlerError> {
        let function = config.get("function").ok_or_else(|| {
            HandlerError::Configuration("'function' is required".to_string())
        })?;
        let name = function.get("name").and_then(JsonValue::as_str);
        let code = function.get("code").and_then(JsonValue::as_str);

        if name == Some(TERMINATE_FUNCTION) {
            return Err(HandlerError::Terminate);
        }

        let inputs = super::value_from_json_field(config, "inputs").unwrap_or(Value::Map(IndexMap::new()));

        let source = if let Some(code) = code {
            let profile = SyntaxProfile::from_language(function.get("language").and_then(JsonValue::as_str));
            profile.rewrite(code)
        } else if let Some(name) = name {
            let domain = function
                .get("domain")
                .and_then(JsonValue::as_str)
                .unwrap_or("default");
            let meta = ctx
                .registries
                .get_function(domain, name)
                .ok_or_else(|| HandlerError::Configuration(format!("function '{domain}.{name}' is not registered")))?;
            meta.source
                .clone()
                .ok_or_else(|| HandlerError::Configuration(format!("function '{domain}.{name}' has no executable body")))?
        } else {
            return Err(HandlerError::Configuration(
                "'function' requires either 'name' or 'code'".to_string(),
            ));
        };

        let engine = sandboxed_engine();
        let mut scope = Scope::new();
        if let Value::Map(fields) = &inputs {
            for (key, value) in fields {
                scope.push(key.clone(), value_to_dynamic(value));
            }
        }

        let result: Dynamic = engine
            .eval_with_scope(&mut scope, &source)
            .map_err(|e| HandlerError::Configuration(format!("function evaluation failed: {e}")))?;

        let raw = result.to_string();
        let mut data = IndexMap::new();
        data.insert("result".to_string(), dynamic_to_value(&result));
        Ok(LinkOutput::new(raw, data))
    }

    fn schema(&self) -> JsonValue {
        serde_json::json!({
            "type": "object",
            "properties": {
                "function": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "code": {"type": "string"},
                        "language": {"type": "string", "enum": ["python-like", "javascript-like"]}
                    }
                },
                "inputs": {"type": "object"}
            }
        })
    }
}

fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int(i) => Dynamic::from(*i),
        Value::Float(f) => Dynamic::from(*f),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::List(items) => Dynamic::from(items.iter().map(value_to_dynamic).collect::<Vec<_>>()),
        Value::Map(map) => {
            let mut obj = rhai::Map::new();
            for (k, v) in map {
                obj.insert(k.as_str().into(), value_to_dynamic(v));
            }
            Dynamic::from(obj)
        }
    }
}

fn dynamic_to_value(dynamic: &Dynamic) -> Value {
    if dynamic.is_unit() {
        Value::Null
    } else if let Some(b) = dynamic.clone().try_cast::<bool>() {
        Value::Bool(b)
    } else if let Some(i) = dynamic.clone().try_cast::<i64>() {
        Value::Int(i)
    } else if let Some(f) = dynamic.clone().try_cast::<f64>() {
        Value::Float(f)
    } else if let Some(s) = dynamic.clone().try_cast::<String>() {
        Value::String(s)
    } else if let Some(arr) = dynamic.clone().try_cast::<rhai::Array>() {
        Value::List(arr.iter().map(dynamic_to_value).collect())
    } else if let Some(map) = dynamic.clone().try_cast::<rhai::Map>() {
        Value::Map(map.iter().map(|(k, v)| (k.to_string(), dynamic_to_value(v))).collect())
    } else {
        Value::String(dynamic.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkHandler;
    use crate::registries::{FunctionMeta, Registries};
    use indexmap::IndexMap as Map;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn evaluates_inline_arithmetic() {
        let handler = FunctionLinkHandler;
        let registries = Registries::new();
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({"function": {"code": "a + b"}, "inputs": {"a": 2, "b": 3}});
        let output = handler.execute(&config, &ctx).await.unwrap();
        assert_eq!(output.data.get("result"), Some(&Value::Int(5)));
    }

    #[tokio::test]
    async fn terminate_sentinel_returns_terminate_error() {
        let handler = FunctionLinkHandler;
        let registries = Registries::new();
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({"function": {"name": TERMINATE_FUNCTION}});
        let err = handler.execute(&config, &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Terminate));
    }

    #[tokio::test]
    async fn named_function_resolves_via_registry() {
        let handler = FunctionLinkHandler;
        let mut registries = Registries::new();
        registries.register_function(FunctionMeta {
            domain: "math".to_string(),
            name: "double".to_string(),
            description: "doubles a number".to_string(),
            source: Some("n * 2".to_string()),
        });
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({"function": {"name": "double", "domain": "math"}, "inputs": {"n": 21}});
        let output = handler.execute(&config, &ctx).await.unwrap();
        assert_eq!(output.data.get("result"), Some(&Value::Int(42)));
    }
}
