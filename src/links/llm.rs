//! `llm` link handler (spec.md §4.4).
//!
//! The concrete language-model SDK is explicitly out of scope
//! (SPEC_FULL.md §1); only the [`LlmClient`] trait plus one reference
//! implementation against an OpenAI-compatible chat-completions endpoint
//! ship here.

use super::{HandlerError, LinkContext};
use crate::registries::TemplateKind;
use crate::shaper::Restater;
use crate::template;
use crate::value::{LinkOutput, Message, Value};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use std::env;
use std::sync::Arc;

/// The "no grouping" conversation sentinel (spec.md §3.2).
pub const NO_CONVERSATION: &str = "none";

/// Conversation history is pruned to this many turns plus the system turn
/// (spec.md §4.4), the constant ported verbatim from `core/executor.py`.
pub const MAX_CONVERSATION_LENGTH: usize = 15;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String, HandlerError>;
}

/// Reference client calling an OpenAI-compatible `/chat/completions`
/// endpoint. Credentials are read lazily, at call time, so that a missing
/// key fails loudly at the first link that needs it rather than at
/// startup (spec.md §6.4).
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for HttpLlmClient {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: env::var("LLM_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String, HandlerError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| HandlerError::Configuration("OPENAI_API_KEY is not set".to_string()))?;

        let payload = json!({
            "model": model,
            "messages": messages.iter().map(|m| json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HandlerError::Io(format!("LLM request failed: {e}")))?;

        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| HandlerError::Io(format!("LLM response was not JSON: {e}")))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HandlerError::Io("LLM response missing choices[0].message.content".to_string()))
    }
}

/// Shared step-8 collaborator (spec.md §4.5): issues the single
/// schema-guided secondary call at temperature 0. Owned by the executor
/// rather than by any one handler, since output shaping applies uniformly
/// across link types.
pub struct LlmRestater {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmRestater {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Restater for LlmRestater {
    async fn restate(&self, text: &str, schema: &JsonValue) -> Option<String> {
        let prompt = format!(
            "populate this schema from this text; return only JSON\nschema: {schema}\ntext: {text}"
        );
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt,
        }];
        self.client.chat(&self.model, &messages, 0.0, None).await.ok()
    }
}

pub struct LlmLinkHandler {
    client: Arc<dyn LlmClient>,
}

impl Default for LlmLinkHandler {
    fn default() -> Self {
        Self {
            client: Arc::new(HttpLlmClient::default()),
        }
    }
}

impl LlmLinkHandler {
    pub fn with_client(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// Exposes the configured provider so the executor can build the
    /// shared [`LlmRestater`] used for step-8 shaping (spec.md §4.5)
    /// without every handler wiring its own.
    pub fn client(&self) -> Arc<dyn LlmClient> {
        self.client.clone()
    }
}

#[async_trait]
impl super::LinkHandler for LlmLinkHandler {
    async fn execute(
        &self,
        config: &JsonValue,
        ctx: &LinkContext<'_>,
    ) -> Result<LinkOutput, HandlerError> {
        let has_prompt = config.get("prompt").and_then(JsonValue::as_str).is_some();
        let has_template = config.get("template").is_some();
        if has_prompt == has_template {
            return Err(HandlerError::Configuration(
                "exactly one of 'prompt' or 'template' must be present".to_string(),
            ));
        }

        let user_turn = if has_prompt {
            config["prompt"].as_str().unwrap_or_default().to_string()
        } else {
            self.render_template(config, ctx)?
        };

        let model = config
            .get("model")
            .and_then(JsonValue::as_str)
            .unwrap_or("gpt-4o-mini")
            .to_string();
        let temperature = config.get("temperature").and_then(JsonValue::as_f64).unwrap_or(0.7);
        let max_tokens = config
            .get("max_tokens")
            .and_then(JsonValue::as_u64)
            .map(|n| n as u32);
        let conversation_id = config
            .get("conversation")
            .and_then(JsonValue::as_str)
            .unwrap_or(NO_CONVERSATION)
            .to_string();
        let system = config.get("system").and_then(JsonValue::as_str).map(str::to_string);

        let messages = if conversation_id == NO_CONVERSATION {
            let mut messages = Vec::new();
            if let Some(system) = &system {
                messages.push(Message {
                    role: "system".to_string(),
                    content: system.clone(),
                });
            }
            messages.push(Message {
                role: "user".to_string(),
                content: user_turn.clone(),
            });
            messages
        } else {
            self.append_to_conversation(ctx, &conversation_id, &system, &user_turn).await
        };

        let raw = self
            .client
            .chat(&model, &messages, temperature, max_tokens)
            .await?;

        if conversation_id != NO_CONVERSATION {
            let mut conversations = ctx.conversations.lock().await;
            if let Some(history) = conversations.get_mut(&conversation_id) {
                history.push(Message {
                    role: "assistant".to_string(),
                    content: raw.clone(),
                });
                prune_history(history);
            }
        }

        // Output shaping against a declared `output_schema` is a common
        // field the executor applies uniformly after any handler returns
        // (spec.md §4.6 step 4d-e); this handler only ever returns raw
        // conversational text plus an empty `data` map.
        Ok(LinkOutput::new(raw, IndexMap::new()))
    }

    fn schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string"},
                "template": {"type": "object"},
                "model": {"type": "string"},
                "temperature": {"type": "number"},
                "max_tokens": {"type": "integer"},
                "conversation": {"type": "string"},
                "system": {"type": "string"}
            }
        })
    }
}

impl LlmLinkHandler {
    /// Resolve `template.inputs` against the execution context, then hand
    /// the template file and that resolved mapping to `handlebars` (spec.md
    /// §4.3's kept dependency), mirroring the original's
    /// `format_template_with_params(template_content, resolved_inputs)`.
    fn render_template(&self, config: &JsonValue, ctx: &LinkContext<'_>) -> Result<String, HandlerError> {
        let template_ref = config["template"]
            .get("name")
            .or_else(|| config["template"].get("ref"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| HandlerError::Configuration("template.name is required".to_string()))?;

        let path = ctx
            .registries
            .resolve_template(TemplateKind::Text, template_ref)
            .ok_or_else(|| HandlerError::Configuration(format!("template '{template_ref}' not found")))?;

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| HandlerError::Configuration(format!("failed to read template {}: {e}", path.display())))?;

        let resolved_inputs = self.resolve_template_inputs(config, ctx.context);

        let engine = handlebars::Handlebars::new();
        engine
            .render_template(&contents, &resolved_inputs)
            .map_err(|e| HandlerError::Configuration(format!("template '{template_ref}' failed to render: {e}")))
    }

    /// Each `template.inputs` value may itself be a `{{ dotted.path }}`
    /// placeholder into the execution context; resolve those first so the
    /// handlebars pass only ever sees concrete values, never engine syntax.
    fn resolve_template_inputs(&self, config: &JsonValue, context: &Value) -> JsonValue {
        let inputs = config["template"].get("inputs").and_then(JsonValue::as_object);
        let Some(inputs) = inputs else {
            return json!({});
        };

        let resolved = inputs
            .iter()
            .map(|(key, value)| {
                let resolved_value = match value.as_str() {
                    Some(s) => {
                        let rendered = template::render(s, context);
                        rendered.typed.map(|v| v.to_json()).unwrap_or(JsonValue::String(rendered.text))
                    }
                    None => value.clone(),
                };
                (key.clone(), resolved_value)
            })
            .collect();
        JsonValue::Object(resolved)
    }

    async fn append_to_conversation(
        &self,
        ctx: &LinkContext<'_>,
        conversation_id: &str,
        system: &Option<String>,
        user_turn: &str,
    ) -> Vec<Message> {
        let mut conversations = ctx.conversations.lock().await;
        let history = conversations.entry(conversation_id.to_string()).or_insert_with(|| {
            let mut initial = Vec::new();
            if let Some(system) = system {
                initial.push(Message {
                    role: "system".to_string(),
                    content: system.clone(),
                });
            }
            initial
        });
        history.push(Message {
            role: "user".to_string(),
            content: user_turn.to_string(),
        });
        prune_history(history);
        history.clone()
    }
}

/// Prune to the most recent `MAX_CONVERSATION_LENGTH` turns plus the
/// system turn, if one is present at index 0 (spec.md §4.4).
fn prune_history(history: &mut Vec<Message>) {
    let has_system = history.first().is_some_and(|m| m.role == "system");
    let budget = MAX_CONVERSATION_LENGTH + usize::from(has_system);
    if history.len() <= budget {
        return;
    }
    let overflow = history.len() - budget;
    if has_system {
        history.remove(1);
        if overflow > 1 {
            history.drain(1..1 + (overflow - 1));
        }
    } else {
        history.drain(0..overflow);
    }
}

#[allow(dead_code)]
pub(crate) fn noop_value(v: &Value) -> &Value {
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkHandler;
    use crate::registries::Registries;
    use indexmap::IndexMap as Map;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex;

    struct StubClient {
        reply: StdMutex<String>,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[Message],
            _temperature: f64,
            _max_tokens: Option<u32>,
        ) -> Result<String, HandlerError> {
            Ok(self.reply.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn requires_exactly_one_of_prompt_or_template() {
        let handler = LlmLinkHandler::with_client(Arc::new(StubClient {
            reply: StdMutex::new("hi".to_string()),
        }));
        let registries = Registries::new();
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let err = handler.execute(&json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, HandlerError::Configuration(_)));
    }

    #[tokio::test]
    async fn prompt_returns_provider_text_as_raw() {
        let handler = LlmLinkHandler::with_client(Arc::new(StubClient {
            reply: StdMutex::new(r#"{"answer": "Paris"}"#.to_string()),
        }));
        let registries = Registries::new();
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({"prompt": "capital of France?"});
        let output = handler.execute(&config, &ctx).await.unwrap();
        assert_eq!(output.raw, r#"{"answer": "Paris"}"#);
    }

    #[test]
    fn prune_keeps_system_turn() {
        let mut history = vec![Message {
            role: "system".to_string(),
            content: "sys".to_string(),
        }];
        for i in 0..20 {
            history.push(Message {
                role: "user".to_string(),
                content: i.to_string(),
            });
        }
        prune_history(&mut history);
        assert_eq!(history[0].role, "system");
        assert!(history.len() <= MAX_CONVERSATION_LENGTH + 1);
    }

    #[tokio::test]
    async fn template_inputs_are_resolved_then_rendered_with_handlebars() {
        let dir = tempfile::tempdir().unwrap();
        let domain_dir = dir.path().join("greetings");
        std::fs::create_dir_all(&domain_dir).unwrap();
        std::fs::write(domain_dir.join("hello.txt"), "Hello {{name}}, you asked about {{topic}}.").unwrap();

        let mut registries = Registries::new();
        registries.register_template_directory(crate::registries::TemplateKind::Text, dir.path().to_path_buf());

        let mut root = Map::new();
        let mut ask_output = Map::new();
        ask_output.insert("data".to_string(), {
            let mut data = Map::new();
            data.insert("name".to_string(), Value::String("Ada".to_string()));
            Value::Map(data)
        });
        root.insert("Ask_output".to_string(), Value::Map(ask_output));
        let context = Value::Map(root);

        let handler = LlmLinkHandler::with_client(Arc::new(StubClient {
            reply: StdMutex::new("irrelevant".to_string()),
        }));
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &context,
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let config = json!({
            "template": {
                "name": "greetings.hello",
                "inputs": {
                    "name": "{{ Ask_output.data.name }}",
                    "topic": "rust"
                }
            }
        });

        let rendered = handler.render_template(&config, &ctx).unwrap();
        assert_eq!(rendered, "Hello Ada, you asked about rust.");
    }
}
