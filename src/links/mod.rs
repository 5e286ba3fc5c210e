//! Link handler contract and built-ins (spec.md §4.4 / C4).

pub mod function;
pub mod llm;
pub mod sql;
pub mod storage_link;
pub mod user_input;

use crate::registries::Registries;
use crate::storage::Repository;
use crate::value::{LinkOutput, Value};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Errors a handler's `execute` may return. Handler I/O errors are
/// recorded on the link's output rather than propagated (spec.md §7); the
/// executor is the one that performs that downgrade, so this type exists
/// purely to let handlers signal distinct failure shapes.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("recipe termination requested")]
    Terminate,
    #[error("cancelled")]
    Cancelled,
}

/// Everything a handler needs to resolve inputs against: the execution
/// context (already rendered) and read access to the shared registries
/// (for e.g. the `function` handler's function-table lookup).
pub struct LinkContext<'a> {
    pub context: &'a Value,
    pub registries: &'a Registries,
    pub conversations: &'a tokio::sync::Mutex<IndexMap<String, Vec<crate::value::Message>>>,
    /// Present whenever the executor was constructed with a storage
    /// backend wired in; `storage.*` handlers return a configuration
    /// error when it is absent.
    pub repository: Option<&'a Repository>,
}

/// Contract every link type satisfies (spec.md §4.4).
#[async_trait]
pub trait LinkHandler: Send + Sync {
    async fn execute(
        &self,
        config: &JsonValue,
        ctx: &LinkContext<'_>,
    ) -> Result<LinkOutput, HandlerError>;

    fn schema(&self) -> JsonValue;
}

/// Register every built-in link handler, the same unconditional way
/// `register_builtin_plugins` registers built-in sources/reactions/
/// bootstrappers in the teacher (`builtin_plugins.rs`).
pub fn register_builtin_links(registries: &mut Registries) {
    use std::sync::Arc;

    registries.register_link_handler("llm", Arc::new(llm::LlmLinkHandler::default()));
    registries.register_link_handler("user_input", Arc::new(user_input::UserInputLinkHandler::default()));
    registries.register_link_handler("function", Arc::new(function::FunctionLinkHandler::default()));
    registries.register_link_handler("sql", Arc::new(sql::SqlLinkHandler::default()));
    registries.register_link_handler("storage.save", Arc::new(storage_link::StorageSaveHandler::default()));
    registries.register_link_handler("storage.get", Arc::new(storage_link::StorageGetHandler::default()));
    registries.register_link_handler("storage.query", Arc::new(storage_link::StorageQueryHandler::default()));
    registries.register_link_handler("storage.delete", Arc::new(storage_link::StorageDeleteHandler::default()));
}

pub(crate) fn value_from_json_field(config: &JsonValue, field: &str) -> Option<Value> {
    config.get(field).cloned().map(Value::from_json)
}
