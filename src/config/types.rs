//! Top-level engine configuration (spec.md §6.4–§6.6, SPEC_FULL.md §A3).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration document loaded by [`super::loader::load_config_file`].
///
/// Unlike the teacher's `DrasiServerConfig`, there is no single running
/// server to configure: this describes where the engine looks for plugins,
/// templates, and persisted storage, plus a handful of execution defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeEngineConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Opt-in strict output-shaping mode (spec.md §9, DESIGN.md).
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub templates: TemplatesConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[cfg(feature = "http-api")]
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RecipeEngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            strict: false,
            storage: StorageConfig::default(),
            discovery: DiscoveryConfig::default(),
            templates: TemplatesConfig::default(),
            credentials: CredentialsConfig::default(),
            #[cfg(feature = "http-api")]
            server: ServerSettings::default(),
        }
    }
}

impl RecipeEngineConfig {
    /// Field-level sanity checks beyond what serde already enforces
    /// (spec.md §7: configuration errors are fatal before execution
    /// starts). Mirrors the teacher's `DrasiServerConfig::validate`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.base_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.base_dir must not be empty");
        }
        #[cfg(feature = "http-api")]
        if self.server.port == 0 {
            anyhow::bail!("server.port must be nonzero");
        }
        Ok(())
    }
}

/// File-adapter settings for the storage repository (C7, spec.md §6.5).
/// `adapter` is forward-looking: only `"file"` is built in (§4.7), but the
/// field lets a discovered plugin adapter be selected the same way without
/// a schema change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_storage_adapter")]
    pub adapter: String,
    #[serde(default = "default_storage_base_dir")]
    pub base_dir: PathBuf,
}

fn default_storage_adapter() -> String {
    "file".to_string()
}

fn default_storage_base_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            adapter: default_storage_adapter(),
            base_dir: default_storage_base_dir(),
        }
    }
}

/// Plugin discovery settings (C8, spec.md §4.8, §6.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Directory scanned for plugin subdirectories, each with its own
    /// `manifest.{yaml,json}`. `None` disables the scan (built-in domains
    /// still register unconditionally).
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { plugin_dir: None }
    }
}

/// Template-directory lists registered with C1 at startup (spec.md §4.1,
/// §4.4 `llm`'s `template` field).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplatesConfig {
    #[serde(default)]
    pub text_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub recipe_dirs: Vec<PathBuf>,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            text_dirs: Vec::new(),
            recipe_dirs: Vec::new(),
        }
    }
}

/// Hierarchical `.env` search path (spec.md §6.4): domain-local, core,
/// root — root wins when the same variable is set in more than one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub domain_env_files: Vec<PathBuf>,
    #[serde(default)]
    pub core_env_file: Option<PathBuf>,
    #[serde(default)]
    pub root_env_file: Option<PathBuf>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            domain_env_files: Vec::new(),
            core_env_file: None,
            root_env_file: None,
        }
    }
}

/// Read-only inspection API settings (SPEC_FULL.md §A6), feature-gated
/// behind `http-api` the same way the teacher's `api` module is always
/// compiled but only ever bound when a server is actually run.
#[cfg(feature = "http-api")]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[cfg(feature = "http-api")]
fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[cfg(feature = "http-api")]
fn default_port() -> u16 {
    8088
}

#[cfg(feature = "http-api")]
impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
