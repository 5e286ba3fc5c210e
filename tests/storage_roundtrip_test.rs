//! `storage.save` → `storage.query` → `storage.delete` through the real
//! `FileAdapter` on disk (spec.md §8, scenario 4), plus the empty-
//! collection boundary for `storage.query`.

use async_trait::async_trait;
use recipe_engine::config::RecipeEngineConfig;
use recipe_engine::links::llm::LlmClient;
use recipe_engine::links::HandlerError;
use recipe_engine::recipe::Recipe;
use recipe_engine::value::{Message, Value};
use recipe_engine::RecipeEngineBuilder;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

struct UnusedLlm;

#[async_trait]
impl LlmClient for UnusedLlm {
    async fn chat(&self, _model: &str, _messages: &[Message], _t: f64, _m: Option<u32>) -> Result<String, HandlerError> {
        unreachable!("no llm link in these recipes")
    }
}

async fn build_engine(dir: &std::path::Path) -> recipe_engine::RecipeEngine {
    let mut config = RecipeEngineConfig::default();
    config.storage.base_dir = dir.to_path_buf();
    RecipeEngineBuilder::new(config).with_llm_client(Arc::new(UnusedLlm)).build().await.unwrap()
}

#[tokio::test]
async fn save_then_query_then_delete_round_trips_through_the_file_adapter() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path()).await;

    let save_recipe = Recipe::from_yaml(
        r#"
name: save-note
version: "1"
links:
  - name: Save
    type: storage.save
    collection: notes
    data:
      text: "buy milk"
      done: false
"#,
    )
    .unwrap();
    let saved = engine.run(&save_recipe, CancellationToken::new()).await.unwrap();
    let saved_map = saved.context.as_map().unwrap();
    let entity_id = saved_map.get("Save_output").unwrap().walk(&["data", "id"]).unwrap().as_str().unwrap().to_string();

    let query_recipe = Recipe::from_yaml(
        r#"
name: query-notes
version: "1"
links:
  - name: Query
    type: storage.query
    collection: notes
    filter:
      done: false
"#,
    )
    .unwrap();
    let queried = engine.run(&query_recipe, CancellationToken::new()).await.unwrap();
    let results = queried.context.as_map().unwrap().get("Query_output").unwrap().walk(&["data", "results"]).unwrap();
    let Value::List(results) = results else { panic!("results must be a list") };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].walk(&["data", "text"]), Some(&Value::String("buy milk".to_string())));

    let delete_recipe_yaml = format!(
        r#"
name: delete-note
version: "1"
links:
  - name: Delete
    type: storage.delete
    collection: notes
    id: "{entity_id}"
"#
    );
    let delete_recipe = Recipe::from_yaml(&delete_recipe_yaml).unwrap();
    let deleted = engine.run(&delete_recipe, CancellationToken::new()).await.unwrap();
    assert_eq!(
        deleted.context.as_map().unwrap().get("Delete_output").unwrap().walk(&["data", "deleted"]),
        Some(&Value::Bool(true))
    );

    let requeried = engine.run(&query_recipe, CancellationToken::new()).await.unwrap();
    let results_after_delete = requeried.context.as_map().unwrap().get("Query_output").unwrap().walk(&["data", "results"]).unwrap();
    assert_eq!(results_after_delete, &Value::List(Vec::new()));
}

#[tokio::test]
async fn querying_a_collection_that_was_never_written_returns_an_empty_list() {
    let dir = tempdir().unwrap();
    let engine = build_engine(dir.path()).await;

    let recipe = Recipe::from_yaml(
        r#"
name: query-empty
version: "1"
links:
  - name: Query
    type: storage.query
    collection: never_seen
"#,
    )
    .unwrap();

    let result = engine.run(&recipe, CancellationToken::new()).await.unwrap();
    let results = result.context.as_map().unwrap().get("Query_output").unwrap().walk(&["data", "results"]).unwrap();
    assert_eq!(results, &Value::List(Vec::new()));
}
