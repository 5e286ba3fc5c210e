//! File-backed [`Adapter`] (spec.md §4.7).
//!
//! One JSON file per entity under `<base>/<collection>/<id>.json`, plus a
//! `by_<dotted.path>.json` secondary index per scalar field under
//! `<base>/<collection>/indices/`. Every write (entity or index) goes
//! through [`atomic_write`] — write to a sibling temp file, then rename —
//! the same single-writer discipline the teacher's persistence layer uses
//! for its snapshot files.

use super::{Adapter, Entity, Filter, StorageError};
use crate::value::Value;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub struct FileAdapter {
    base_dir: PathBuf,
}

impl FileAdapter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn entity_path(&self, collection: &str, id: &str) -> PathBuf {
        self.base_dir.join(collection).join(format!("{id}.json"))
    }

    fn indices_dir(&self, collection: &str) -> PathBuf {
        self.base_dir.join(collection).join("indices")
    }

    fn index_path(&self, collection: &str, dotted_path: &str) -> PathBuf {
        self.indices_dir(collection).join(format!("by_{dotted_path}.json"))
    }
}

fn atomic_write(path: &Path, contents: &str) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
    }
    let temp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    std::fs::write(&temp_path, contents).map_err(|e| StorageError::Io(e.to_string()))?;
    std::fs::rename(&temp_path, path).map_err(|e| StorageError::Io(e.to_string()))?;
    Ok(())
}

/// Every scalar leaf in `value`, paired with its dotted path relative to
/// `prefix` (spec.md §4.7 "for each scalar field at any nesting depth").
fn flatten_scalars(value: &Value, prefix: &str, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Map(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_scalars(nested, &path, out);
            }
        }
        Value::List(_) => {}
        Value::Null => {}
        scalar => {
            if !prefix.is_empty() {
                out.push((prefix.to_string(), scalar.clone()));
            }
        }
    }
}

fn index_key(value: &Value) -> String {
    value.render_text().to_ascii_lowercase()
}

type IndexFile = IndexMap<String, BTreeSet<String>>;

fn load_index(path: &Path) -> IndexFile {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn save_index(path: &Path, index: &IndexFile) -> Result<(), StorageError> {
    let contents = serde_json::to_string_pretty(index).map_err(|e| StorageError::Serialization(e.to_string()))?;
    atomic_write(path, &contents)
}

#[async_trait]
impl Adapter for FileAdapter {
    async fn save(&self, entity: &Entity) -> Result<(), StorageError> {
        let previous = self.get(&entity.collection, &entity.id).await?;

        let contents = serde_json::to_string_pretty(entity).map_err(|e| StorageError::Serialization(e.to_string()))?;
        atomic_write(&self.entity_path(&entity.collection, &entity.id), &contents)?;

        let mut previous_fields = Vec::new();
        if let Some(previous) = &previous {
            flatten_scalars(&previous.data, "", &mut previous_fields);
        }
        let mut current_fields = Vec::new();
        flatten_scalars(&entity.data, "", &mut current_fields);

        for (path, value) in &previous_fields {
            if !current_fields.iter().any(|(p, _)| p == path) {
                let index_path = self.index_path(&entity.collection, path);
                let mut index = load_index(&index_path);
                if let Some(ids) = index.get_mut(&index_key(value)) {
                    ids.remove(&entity.id);
                }
                save_index(&index_path, &index)?;
            }
        }

        for (path, value) in &current_fields {
            let index_path = self.index_path(&entity.collection, path);
            let mut index = load_index(&index_path);
            if let Some((_, previous_value)) = previous_fields.iter().find(|(p, _)| p == path) {
                if previous_value != value {
                    if let Some(ids) = index.get_mut(&index_key(previous_value)) {
                        ids.remove(&entity.id);
                    }
                }
            }
            index.entry(index_key(value)).or_default().insert(entity.id.clone());
            save_index(&index_path, &index)?;
        }

        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Entity>, StorageError> {
        let path = self.entity_path(collection, id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| StorageError::Io(e.to_string()))?;
        let entity = serde_json::from_str(&contents).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Some(entity))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        if let Some(entity) = self.get(collection, id).await? {
            let mut fields = Vec::new();
            flatten_scalars(&entity.data, "", &mut fields);
            for (path, value) in fields {
                let index_path = self.index_path(collection, &path);
                let mut index = load_index(&index_path);
                if let Some(ids) = index.get_mut(&index_key(&value)) {
                    ids.remove(id);
                }
                save_index(&index_path, &index)?;
            }
        }
        let path = self.entity_path(collection, id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Entity>, StorageError> {
        if filter.is_empty() {
            return self.scan(collection).await;
        }

        let mut candidate_ids: Option<BTreeSet<String>> = None;
        let mut unindexed_predicates: Vec<(&String, &Value)> = Vec::new();

        for (key, expected) in filter {
            let base_path = key.strip_suffix("_contains").unwrap_or(key);
            let index_path = self.index_path(collection, base_path);
            if !index_path.exists() {
                unindexed_predicates.push((key, expected));
                continue;
            }
            if key.ends_with("_contains") {
                // Substring predicates cannot be served by an exact-match
                // index; degrade to a scan for this predicate only.
                unindexed_predicates.push((key, expected));
                continue;
            }
            let index = load_index(&index_path);
            let matching: BTreeSet<String> = index.get(&index_key(expected)).cloned().unwrap_or_default();
            candidate_ids = Some(match candidate_ids {
                Some(existing) => existing.intersection(&matching).cloned().collect(),
                None => matching,
            });
        }

        let mut results = match candidate_ids {
            Some(ids) => {
                let mut entities = Vec::new();
                for id in ids {
                    if let Some(entity) = self.get(collection, &id).await? {
                        entities.push(entity);
                    }
                }
                entities
            }
            None => self.scan(collection).await?,
        };

        for (key, expected) in unindexed_predicates {
            let base_path = key.strip_suffix("_contains").unwrap_or(key);
            results.retain(|entity| {
                super::resolve_entity_field(entity, base_path)
                    .is_some_and(|value| super::matches_predicate(key, &value, expected))
            });
        }

        Ok(results)
    }
}

impl FileAdapter {
    async fn scan(&self, collection: &str) -> Result<Vec<Entity>, StorageError> {
        let dir = self.base_dir.join(collection);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entities = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| StorageError::Io(e.to_string()))? {
            let entry = entry.map_err(|e| StorageError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(|e| StorageError::Io(e.to_string()))?;
            if let Ok(entity) = serde_json::from_str(&contents) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}
