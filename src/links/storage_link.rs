//! `storage.save` / `storage.get` / `storage.query` / `storage.delete`
//! link handlers (spec.md §4.4) — thin wrappers over the [`Repository`]
//! (§4.7 / C7), threaded through [`LinkContext::repository`].

use super::{HandlerError, LinkContext};
use crate::storage::{Entity, Filter};
use crate::value::{LinkOutput, Value};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};

fn require_repository<'a>(ctx: &'a LinkContext<'_>) -> Result<&'a crate::storage::Repository, HandlerError> {
    ctx.repository
        .ok_or_else(|| HandlerError::Configuration("no storage repository is configured".to_string()))
}

fn require_str<'a>(config: &'a JsonValue, field: &str) -> Result<&'a str, HandlerError> {
    config
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| HandlerError::Configuration(format!("'{field}' is required")))
}

fn entity_output(entity: &Entity) -> IndexMap<String, Value> {
    let mut data = IndexMap::new();
    data.insert("id".to_string(), Value::String(entity.id.clone()));
    data.insert("collection".to_string(), Value::String(entity.collection.clone()));
    data.insert("data".to_string(), entity.data.clone());
    data.insert("metadata".to_string(), entity.metadata.clone());
    data.insert("created_at".to_string(), Value::String(entity.created_at.to_rfc3339()));
    data.insert("updated_at".to_string(), Value::String(entity.updated_at.to_rfc3339()));
    data
}

fn storage_error(err: crate::storage::StorageError) -> HandlerError {
    HandlerError::Io(err.to_string())
}

#[derive(Default)]
pub struct StorageSaveHandler;

#[async_trait]
impl super::LinkHandler for StorageSaveHandler {
    async fn execute(&self, config: &JsonValue, ctx: &LinkContext<'_>) -> Result<LinkOutput, HandlerError> {
        let repository = require_repository(ctx)?;
        let collection = require_str(config, "collection")?;
        let id = config.get("id").and_then(JsonValue::as_str).map(str::to_string);
        let data = super::value_from_json_field(config, "data").unwrap_or(Value::Map(IndexMap::new()));
        let metadata = super::value_from_json_field(config, "metadata").unwrap_or(Value::Map(IndexMap::new()));

        let entity = repository
            .save(collection, id, data, metadata, Utc::now())
            .await
            .map_err(storage_error)?;

        let raw = serde_json::to_string(&entity).unwrap_or_default();
        Ok(LinkOutput::new(raw, entity_output(&entity)))
    }

    fn schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "required": ["collection", "data"],
            "properties": {
                "collection": {"type": "string"},
                "id": {"type": "string"},
                "data": {"type": "object"},
                "metadata": {"type": "object"}
            }
        })
    }
}

#[derive(Default)]
pub struct StorageGetHandler;

#[async_trait]
impl super::LinkHandler for StorageGetHandler {
    async fn execute(&self, config: &JsonValue, ctx: &LinkContext<'_>) -> Result<LinkOutput, HandlerError> {
        let repository = require_repository(ctx)?;
        let collection = require_str(config, "collection")?;
        let id = require_str(config, "id")?;

        match repository.get(collection, id).await.map_err(storage_error)? {
            Some(entity) => {
                let raw = serde_json::to_string(&entity).unwrap_or_default();
                Ok(LinkOutput::new(raw, entity_output(&entity)))
            }
            None => Ok(LinkOutput::new(String::new(), IndexMap::new())),
        }
    }

    fn schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "required": ["collection", "id"],
            "properties": {"collection": {"type": "string"}, "id": {"type": "string"}}
        })
    }
}

#[derive(Default)]
pub struct StorageQueryHandler;

#[async_trait]
impl super::LinkHandler for StorageQueryHandler {
    async fn execute(&self, config: &JsonValue, ctx: &LinkContext<'_>) -> Result<LinkOutput, HandlerError> {
        let repository = require_repository(ctx)?;
        let collection = require_str(config, "collection")?;
        let filter: Filter = config
            .get("filter")
            .and_then(JsonValue::as_object)
            .map(|obj| {
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
                    .collect()
            })
            .unwrap_or_default();

        let entities = repository.query(collection, &filter).await.map_err(storage_error)?;
        let results: Vec<Value> = entities.iter().map(|e| Value::Map(entity_output(e))).collect();
        let raw = serde_json::to_string(&entities).unwrap_or_default();
        let mut data = IndexMap::new();
        data.insert("results".to_string(), Value::List(results));
        Ok(LinkOutput::new(raw, data))
    }

    fn schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "required": ["collection"],
            "properties": {"collection": {"type": "string"}, "filter": {"type": "object"}}
        })
    }
}

#[derive(Default)]
pub struct StorageDeleteHandler;

#[async_trait]
impl super::LinkHandler for StorageDeleteHandler {
    async fn execute(&self, config: &JsonValue, ctx: &LinkContext<'_>) -> Result<LinkOutput, HandlerError> {
        let repository = require_repository(ctx)?;
        let collection = require_str(config, "collection")?;
        let id = require_str(config, "id")?;
        repository.delete(collection, id).await.map_err(storage_error)?;

        let mut data = IndexMap::new();
        data.insert("deleted".to_string(), Value::Bool(true));
        Ok(LinkOutput::new(String::new(), data))
    }

    fn schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "required": ["collection", "id"],
            "properties": {"collection": {"type": "string"}, "id": {"type": "string"}}
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::LinkHandler;
    use crate::registries::Registries;
    use crate::storage::{file_adapter::FileAdapter, Repository};
    use indexmap::IndexMap as Map;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn save_then_get_roundtrips_through_handlers() {
        let dir = tempdir().unwrap();
        let repository = Repository::new(Box::new(FileAdapter::new(dir.path())));
        let registries = Registries::new();
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: Some(&repository),
        };

        let save = StorageSaveHandler;
        let saved = save
            .execute(&json!({"collection": "notes", "data": {"text": "hi"}}), &ctx)
            .await
            .unwrap();
        let id = saved.data.get("id").and_then(Value::as_str).unwrap().to_string();

        let get = StorageGetHandler;
        let fetched = get.execute(&json!({"collection": "notes", "id": id}), &ctx).await.unwrap();
        assert_eq!(
            fetched.data.get("data"),
            Some(&Value::Map({
                let mut m = Map::new();
                m.insert("text".to_string(), Value::String("hi".to_string()));
                m
            }))
        );
    }

    #[tokio::test]
    async fn missing_repository_is_a_configuration_error() {
        let registries = Registries::new();
        let conversations = Mutex::new(Map::new());
        let ctx = LinkContext {
            context: &Value::Map(Map::new()),
            registries: &registries,
            conversations: &conversations,
            repository: None,
        };
        let handler = StorageSaveHandler;
        let err = handler
            .execute(&json!({"collection": "notes", "data": {}}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Configuration(_)));
    }
}
