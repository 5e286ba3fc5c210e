//! Scripted `user_input` feeding an `llm` link (spec.md §8, scenario 1):
//! the LLM's prompt is rendered from the answered field, so the stub's
//! captured request proves the placeholder actually resolved.

use async_trait::async_trait;
use recipe_engine::config::RecipeEngineConfig;
use recipe_engine::links::llm::LlmClient;
use recipe_engine::links::user_input::{ScriptedInput, UserInputLinkHandler};
use recipe_engine::links::HandlerError;
use recipe_engine::recipe::Recipe;
use recipe_engine::value::{Message, Value};
use recipe_engine::RecipeEngineBuilder;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

struct CapturingLlm {
    last_prompt: Mutex<Option<String>>,
}

#[async_trait]
impl LlmClient for CapturingLlm {
    async fn chat(
        &self,
        _model: &str,
        messages: &[Message],
        _temperature: f64,
        _max_tokens: Option<u32>,
    ) -> Result<String, HandlerError> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());
        Ok(format!("Nice to meet you, {}", prompt.trim_start_matches("Greet: ")))
    }
}

#[tokio::test]
async fn answered_name_flows_into_the_llm_prompt() {
    let dir = tempdir().unwrap();
    let mut config = RecipeEngineConfig::default();
    config.storage.base_dir = dir.path().to_path_buf();

    let llm = Arc::new(CapturingLlm {
        last_prompt: Mutex::new(None),
    });

    let engine = RecipeEngineBuilder::new(config)
        .with_llm_client(llm.clone())
        .with_link_handler(
            "user_input",
            Arc::new(UserInputLinkHandler::with_source(Box::new(ScriptedInput::new(["Ada"])))),
        )
        .build()
        .await
        .unwrap();

    let recipe = Recipe::from_yaml(
        r#"
name: greet
version: "1"
links:
  - name: Ask
    type: user_input
    inputs:
      name:
        type: string
        required: true
  - name: Greet
    type: llm
    prompt: "Greet: {{ Ask_output.data.name }}"
"#,
    )
    .unwrap();

    let result = engine.run(&recipe, CancellationToken::new()).await.unwrap();
    let map = result.context.as_map().unwrap();

    assert_eq!(
        map.get("Ask_output").unwrap().walk(&["data", "name"]),
        Some(&Value::String("Ada".to_string()))
    );
    assert_eq!(llm.last_prompt.lock().unwrap().as_deref(), Some("Greet: Ada"));

    let greet_output = map.get("Greet_output").unwrap();
    assert_eq!(
        greet_output.walk(&["raw"]),
        Some(&Value::String("Nice to meet you, Ada".to_string()))
    );
}
