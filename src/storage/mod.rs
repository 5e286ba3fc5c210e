//! Storage repository (spec.md §4.7 / C7).
//!
//! `Repository` presents CRUD plus criteria queries over content-addressed
//! [`Entity`] records and delegates storage to a pluggable [`Adapter`].
//! Adapters register themselves the same way the teacher's source/reaction
//! factories register under a type name (`factories.rs`), so external
//! packages can contribute e.g. a SQLite-backed adapter without touching
//! this module.

pub mod file_adapter;

use crate::value::Value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("no adapter registered for type '{0}'")]
    UnknownAdapter(String),
}

/// `{id, collection, data, metadata, created_at, updated_at}` (spec.md §3.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub collection: String,
    pub data: Value,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Equality match, or (for keys ending `_contains`) case-insensitive
/// substring match, against a dotted path (spec.md §4.7).
pub type Filter = HashMap<String, Value>;

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn save(&self, entity: &Entity) -> Result<(), StorageError>;
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Entity>, StorageError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError>;
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Entity>, StorageError>;
}

/// Thin facade the `storage.*` link handlers call through. Owns one
/// adapter instance, chosen at construction (spec.md §4.7).
pub struct Repository {
    adapter: Box<dyn Adapter>,
}

impl Repository {
    pub fn new(adapter: Box<dyn Adapter>) -> Self {
        Self { adapter }
    }

    /// Save `data` under `id` (auto-generated as `<collection>-<8-hex>` when
    /// absent), returning the saved entity.
    pub async fn save(
        &self,
        collection: &str,
        id: Option<String>,
        data: Value,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Result<Entity, StorageError> {
        let id = id.unwrap_or_else(|| generate_id(collection));
        let existing = self.adapter.get(collection, &id).await?;
        let created_at = existing.map(|e| e.created_at).unwrap_or(now);
        let entity = Entity {
            id,
            collection: collection.to_string(),
            data,
            metadata,
            created_at,
            updated_at: now,
        };
        self.adapter.save(&entity).await?;
        Ok(entity)
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Entity>, StorageError> {
        self.adapter.get(collection, id).await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        self.adapter.delete(collection, id).await
    }

    pub async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Entity>, StorageError> {
        self.adapter.query(collection, filter).await
    }
}

fn generate_id(collection: &str) -> String {
    let hex: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{collection}-{hex}")
}

/// Does `value` match `expected` under the filter semantics of spec.md
/// §4.7: `_contains`-suffixed keys are case-insensitive substring matches,
/// all other keys are exact-equality matches.
pub fn matches_predicate(key: &str, value: &Value, expected: &Value) -> bool {
    if let Some(_base) = key.strip_suffix("_contains") {
        match (value, expected) {
            (Value::String(haystack), Value::String(needle)) => {
                haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
            }
            _ => false,
        }
    } else {
        value == expected
    }
}

/// Resolve a dotted path against an entity's `data`, falling back to
/// top-level entity fields (`id`, `collection`, `created_at`, `updated_at`).
pub fn resolve_entity_field<'a>(entity: &'a Entity, dotted_path: &str) -> Option<Value> {
    let segments: Vec<&str> = dotted_path.split('.').collect();
    match segments.first() {
        Some(&"id") => Some(Value::String(entity.id.clone())),
        Some(&"collection") => Some(Value::String(entity.collection.clone())),
        Some(&"created_at") => Some(Value::String(entity.created_at.to_rfc3339())),
        Some(&"updated_at") => Some(Value::String(entity.updated_at.to_rfc3339())),
        _ => entity.data.walk(&segments).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn contains_predicate_is_case_insensitive() {
        assert!(matches_predicate(
            "name_contains",
            &Value::String("Ada Lovelace".to_string()),
            &Value::String("LOVE".to_string())
        ));
    }

    #[test]
    fn equality_predicate_requires_exact_match() {
        assert!(!matches_predicate("status", &Value::String("open".to_string()), &Value::String("closed".to_string())));
    }

    #[test]
    fn resolve_entity_field_falls_back_to_top_level() {
        let entity = Entity {
            id: "users-abc12345".to_string(),
            collection: "users".to_string(),
            data: Value::Map(IndexMap::new()),
            metadata: Value::Map(IndexMap::new()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(resolve_entity_field(&entity, "id"), Some(Value::String("users-abc12345".to_string())));
    }
}
