//! Declarative recipe execution engine.
//!
//! A recipe (spec.md §3.1) declares a sequence of named links — calls to an
//! LLM, a SQL query, a stored function, user input, or storage read/write —
//! wired together by `{{ dotted.path }}` placeholders into the shared
//! execution context. [`executor::Executor`] runs one recipe to completion;
//! [`builder::RecipeEngineBuilder`] assembles the registries, storage, and
//! credentials an executor needs before it can run anything.

#[cfg(feature = "http-api")]
pub mod api;
pub mod builder;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod executor;
pub mod links;
pub mod recipe;
pub mod registries;
pub mod schema;
pub mod shaper;
pub mod storage;
pub mod template;
pub mod value;

pub use builder::{RecipeEngine, RecipeEngineBuilder};
pub use config::{load_config_file, save_config_file, ConfigError, RecipeEngineConfig};
pub use executor::{ExecutionResult, Executor, ExecutorError};
pub use recipe::{Recipe, RecipeError};
pub use registries::Registries;
