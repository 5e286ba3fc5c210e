//! `sql` link parameterization end to end (spec.md §8, scenario 3): a
//! real on-disk SQLite database, so the placeholder really has to survive
//! a round trip through `sqlx::Any` rather than just the handler's own
//! unit-level `parameterize` helper.

use recipe_engine::config::RecipeEngineConfig;
use recipe_engine::links::llm::LlmClient;
use recipe_engine::links::HandlerError;
use recipe_engine::recipe::Recipe;
use recipe_engine::value::{Message, Value};
use recipe_engine::RecipeEngineBuilder;
use async_trait::async_trait;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

struct UnusedLlm;

#[async_trait]
impl LlmClient for UnusedLlm {
    async fn chat(&self, _model: &str, _messages: &[Message], _t: f64, _m: Option<u32>) -> Result<String, HandlerError> {
        unreachable!("this recipe has no llm link")
    }
}

#[tokio::test]
async fn seeded_id_is_bound_not_interpolated() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("recipe.db");
    let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

    sqlx::any::install_default_drivers();
    let setup = sqlx::any::AnyPoolOptions::new().max_connections(1).connect(&database_url).await.unwrap();
    sqlx::query("CREATE TABLE users (id INTEGER, name TEXT)").execute(&setup).await.unwrap();
    sqlx::query("INSERT INTO users (id, name) VALUES (?, ?)").bind(1_i64).bind("Ada").execute(&setup).await.unwrap();
    sqlx::query("INSERT INTO users (id, name) VALUES (?, ?)").bind(2_i64).bind("Robert").execute(&setup).await.unwrap();
    drop(setup);

    let mut config = RecipeEngineConfig::default();
    config.storage.base_dir = dir.path().join("storage");

    let engine = RecipeEngineBuilder::new(config).with_llm_client(Arc::new(UnusedLlm)).build().await.unwrap();

    let recipe_yaml = format!(
        r#"
name: lookup
version: "1"
links:
  - name: Seed
    type: function
    function:
      code: "2"
  - name: Lookup
    type: sql
    database_url: "{database_url}"
    query: "SELECT id, name FROM users WHERE id = {{{{ Seed_output.data.result }}}}"
"#
    );
    let recipe = Recipe::from_yaml(&recipe_yaml).unwrap();

    let result = engine.run(&recipe, CancellationToken::new()).await.unwrap();
    let map = result.context.as_map().unwrap();
    let lookup = map.get("Lookup_output").unwrap();

    let rows = lookup.walk(&["data", "rows"]).unwrap();
    let Value::List(rows) = rows else { panic!("rows must be a list") };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].walk(&["name"]), Some(&Value::String("Robert".to_string())));

    let query = lookup.walk(&["data", "metadata", "query"]).unwrap();
    assert_eq!(query, &Value::String("SELECT id, name FROM users WHERE id = ?".to_string()));
}
