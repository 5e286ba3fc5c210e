//! The typed value model that flows through the execution context.
//!
//! Runtime reflection in the original system (duck-typed dicts) becomes a
//! tagged variant here: [`Value`] is walked by key/index during template
//! resolution and is what a [`LinkOutput`]'s `data` map is built from.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically-typed value produced or consumed by a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Walk a dotted path (`a.b.c`) through nested maps, returning `None`
    /// if any segment is missing or not a map.
    pub fn walk(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            match current {
                Value::Map(map) => current = map.get(*segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// True/yes/1/positive-integer truthiness used by `condition` evaluation.
    pub fn is_truthy_token(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i > 0,
            Value::Float(f) => *f > 0.0,
            Value::String(s) => {
                let normalized = s.trim().to_ascii_lowercase();
                matches!(normalized.as_str(), "true" | "yes" | "1")
                    || normalized.parse::<i64>().is_ok_and(|n| n > 0)
            }
            Value::Null => false,
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Canonical textual form used when a placeholder is embedded inside a
    /// larger string, or when a non-string value must be rendered as text.
    pub fn render_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::List(_) | Value::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_text())
    }
}

/// One role/content turn in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// The `{raw, data}` pair every link handler returns (spec.md §3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkOutput {
    pub raw: String,
    pub data: IndexMap<String, Value>,
    /// Best-effort JSON parse of `data.raw_content`, when present.
    /// See SPEC_FULL.md §3 (grounded on `core/executor.py::build_context`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_raw: Option<Value>,
}

impl LinkOutput {
    pub fn new(raw: impl Into<String>, data: IndexMap<String, Value>) -> Self {
        let raw = raw.into();
        let parsed_raw = data
            .get("raw_content")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
            .map(Value::from_json);
        Self {
            raw,
            data,
            parsed_raw,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut data = IndexMap::new();
        data.insert("error".to_string(), Value::String(message.into()));
        Self {
            raw: String::new(),
            data,
            parsed_raw: None,
        }
    }

    /// Convert to a `Value::Map` with `raw`/`data` keys, for placeholder
    /// resolution (`<name>_output.data.field`, `<name>_output.raw`).
    pub fn as_context_value(&self) -> Value {
        let mut map = IndexMap::new();
        map.insert("raw".to_string(), Value::String(self.raw.clone()));
        map.insert("data".to_string(), Value::Map(self.data.clone()));
        if let Some(parsed) = &self.parsed_raw {
            map.insert("parsed_raw".to_string(), parsed.clone());
        }
        Value::Map(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_nested_path() {
        let mut inner = IndexMap::new();
        inner.insert("answer".to_string(), Value::String("Paris".to_string()));
        let mut outer = IndexMap::new();
        outer.insert("data".to_string(), Value::Map(inner));
        let root = Value::Map(outer);

        assert_eq!(
            root.walk(&["data", "answer"]),
            Some(&Value::String("Paris".to_string()))
        );
        assert_eq!(root.walk(&["data", "missing"]), None);
    }

    #[test]
    fn truthy_tokens() {
        assert!(Value::String("yes".into()).is_truthy_token());
        assert!(Value::String("1".into()).is_truthy_token());
        assert!(!Value::String("".into()).is_truthy_token());
        assert!(!Value::Bool(false).is_truthy_token());
        assert!(Value::Int(3).is_truthy_token());
    }

    #[test]
    fn parsed_raw_extracted_from_raw_content() {
        let mut data = IndexMap::new();
        data.insert(
            "raw_content".to_string(),
            Value::String(r#"{"n": 3}"#.to_string()),
        );
        let output = LinkOutput::new("text", data);
        assert!(output.parsed_raw.is_some());
    }
}
