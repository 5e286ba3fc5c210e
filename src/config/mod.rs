//! Configuration loading (SPEC_FULL.md §A3): type-safe config structures,
//! POSIX environment-variable interpolation, YAML/JSON file loading with
//! unknown-field validation.

pub mod env_interpolation;
pub mod loader;
pub mod types;
pub mod validation;

pub use loader::{from_json_str, from_yaml_str, load_config_file, save_config_file, ConfigError};
pub use types::{CredentialsConfig, DiscoveryConfig, RecipeEngineConfig, StorageConfig, TemplatesConfig};
#[cfg(feature = "http-api")]
pub use types::ServerSettings;
