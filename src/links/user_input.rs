//! `user_input` link handler (spec.md §4.4).
//!
//! Reads each declared field from stdin in declaration order, re-prompting
//! on validation failure. Stdin access is behind the [`InputSource`] trait
//! so tests can drive it with a canned transcript instead of a real
//! terminal.

use super::{HandlerError, LinkContext};
use crate::value::{LinkOutput, Value};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FieldType {
    String,
    Number,
    Boolean,
    Select,
    Multiselect,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldSpec {
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_field_type")]
    r#type: FieldType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<JsonValue>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

fn default_field_type() -> FieldType {
    FieldType::String
}

/// Line-oriented read/write seam for the field prompt loop.
pub trait InputSource: Send + Sync {
    fn prompt(&self, text: &str) -> io::Result<()>;
    fn read_line(&self) -> io::Result<String>;
}

/// Real terminal: writes prompts to stdout, reads lines from stdin.
pub struct TerminalInput;

impl InputSource for TerminalInput {
    fn prompt(&self, text: &str) -> io::Result<()> {
        print!("{text}");
        io::stdout().flush()
    }

    fn read_line(&self) -> io::Result<String> {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }
}

/// Fixed transcript source for tests: each call to `read_line` returns the
/// next queued line.
pub struct ScriptedInput {
    lines: Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedInput {
    pub fn new(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
        }
    }
}

impl InputSource for ScriptedInput {
    fn prompt(&self, _text: &str) -> io::Result<()> {
        Ok(())
    }

    fn read_line(&self) -> io::Result<String> {
        Ok(self.lines.lock().unwrap().pop_front().unwrap_or_default())
    }
}

pub struct UserInputLinkHandler {
    source: Box<dyn InputSource>,
}

impl Default for UserInputLinkHandler {
    fn default() -> Self {
        Self {
            source: Box::new(TerminalInput),
        }
    }
}

impl UserInputLinkHandler {
    pub fn with_source(source: Box<dyn InputSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl super::LinkHandler for UserInputLinkHandler {
    async fn execute(
        &self,
        config: &JsonValue,
        _ctx: &LinkContext<'_>,
    ) -> Result<LinkOutput, HandlerError> {
        let inputs: IndexMap<String, FieldSpec> = config
            .get("inputs")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| HandlerError::Configuration(format!("invalid 'inputs': {e}")))?
            .unwrap_or_default();

        let mut data = IndexMap::new();
        for (field_name, spec) in &inputs {
            let value = self.prompt_until_valid(field_name, spec)?;
            data.insert(field_name.clone(), value);
        }

        let raw = serde_json::to_string(&data.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<serde_json::Map<_, _>>())
            .unwrap_or_default();
        Ok(LinkOutput::new(raw, data))
    }

    fn schema(&self) -> JsonValue {
        serde_json::json!({
            "type": "object",
            "properties": {
                "inputs": {"type": "object"},
                "template": {"type": "string"},
                "default_values": {"type": "object"}
            }
        })
    }
}

impl UserInputLinkHandler {
    fn prompt_until_valid(&self, name: &str, spec: &FieldSpec) -> Result<Value, HandlerError> {
        loop {
            let label = spec.description.clone().unwrap_or_else(|| name.to_string());
            self.source
                .prompt(&format!("{label}: "))
                .map_err(|e| HandlerError::Io(e.to_string()))?;
            let line = self.source.read_line().map_err(|e| HandlerError::Io(e.to_string()))?;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                if let Some(default) = &spec.default {
                    return Ok(Value::from_json(default.clone()));
                }
                if spec.required {
                    eprintln!("'{name}' is required");
                    continue;
                }
                return Ok(Value::Null);
            }

            match self.coerce(trimmed, spec) {
                Some(value) => return Ok(value),
                None => {
                    eprintln!("invalid value for '{name}'");
                    continue;
                }
            }
        }
    }

    fn coerce(&self, trimmed: &str, spec: &FieldSpec) -> Option<Value> {
        match spec.r#type {
            FieldType::String => Some(Value::String(trimmed.to_string())),
            FieldType::Number => {
                let n: f64 = trimmed.parse().ok()?;
                if let Some(min) = spec.min {
                    if n < min {
                        return None;
                    }
                }
                if let Some(max) = spec.max {
                    if n > max {
                        return None;
                    }
                }
                if n.fract() == 0.0 {
                    Some(Value::Int(n as i64))
                } else {
                    Some(Value::Float(n))
                }
            }
            FieldType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "n" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            FieldType::Select => {
                if spec.options.iter().any(|o| o == trimmed) {
                    Some(Value::String(trimmed.to_string()))
                } else {
                    None
                }
            }
            FieldType::Multiselect => {
                let chosen: Vec<&str> = trimmed.split(',').map(str::trim).collect();
                if chosen.iter().all(|c| spec.options.iter().any(|o| o == c)) {
                    Some(Value::List(chosen.into_iter().map(|c| Value::String(c.to_string())).collect()))
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkHandler;
    use crate::registries::Registries;
    use indexmap::IndexMap as Map;
    use serde_json::json;
    use tokio::sync::Mutex as TokioMutex;

    #[tokio::test]
    async fn reads_each_field_in_order() {
        let handler = UserInputLinkHandler::with_source(Box::new(ScriptedInput::new(["Ada", "32"])));
        let registries = Registries::new();
        let conversations = TokioMutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({
            "inputs": {
                "name": {"type": "string", "required": true},
                "age": {"type": "number", "required": true}
            }
        });
        let output = handler.execute(&config, &ctx).await.unwrap();
        assert_eq!(output.data.get("name"), Some(&Value::String("Ada".to_string())));
        assert_eq!(output.data.get("age"), Some(&Value::Int(32)));
    }

    #[tokio::test]
    async fn reprompts_on_invalid_then_accepts() {
        let handler = UserInputLinkHandler::with_source(Box::new(ScriptedInput::new(["not-a-number", "7"])));
        let registries = Registries::new();
        let conversations = TokioMutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({"inputs": {"count": {"type": "number", "required": true}}});
        let output = handler.execute(&config, &ctx).await.unwrap();
        assert_eq!(output.data.get("count"), Some(&Value::Int(7)));
    }

    #[tokio::test]
    async fn empty_optional_field_defaults_to_null() {
        let handler = UserInputLinkHandler::with_source(Box::new(ScriptedInput::new([""])));
        let registries = Registries::new();
        let conversations = TokioMutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({"inputs": {"nickname": {"type": "string", "required": false}}});
        let output = handler.execute(&config, &ctx).await.unwrap();
        assert_eq!(output.data.get("nickname"), Some(&Value::Null));
    }
}
