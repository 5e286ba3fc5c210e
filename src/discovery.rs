//! Startup discovery (spec.md §4.8 / C8): built-in domain registration
//! plus a best-effort plugin-directory scan, mirroring the two-phase split
//! of the teacher's `builtin_plugins.rs` + `dynamic_loading.rs`.

use crate::links;
use crate::registries::{DomainInterface, FunctionMeta, Registries};
use libloading::{Library, Symbol};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read plugin directory '{0}': {1}")]
    ReadDir(String, std::io::Error),
    #[error("failed to parse manifest '{0}': {1}")]
    Manifest(String, String),
}

/// A plugin's `manifest.{yaml,json}` (spec.md §6.6): `name`, `version`, and
/// the list of shared-library files to load.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub entry_points: Vec<String>,
}

impl PluginManifest {
    /// Read whichever of `manifest.yaml`/`manifest.yml`/`manifest.json` is
    /// present in `dir`, without touching the shared library it names.
    /// Exposed publicly so the `packages` CLI subcommands can list and
    /// inspect plugins without the risk of loading untrusted code.
    pub fn load(dir: &Path) -> Result<Option<Self>, DiscoveryError> {
        for file_name in ["manifest.yaml", "manifest.yml", "manifest.json"] {
            let path = dir.join(file_name);
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .map_err(|e| DiscoveryError::Manifest(path.display().to_string(), e.to_string()))?;
            let manifest: PluginManifest = if file_name.ends_with(".json") {
                serde_json::from_str(&content).map_err(|e| DiscoveryError::Manifest(path.display().to_string(), e.to_string()))?
            } else {
                serde_yaml::from_str(&content).map_err(|e| DiscoveryError::Manifest(path.display().to_string(), e.to_string()))?
            };
            return Ok(Some(manifest));
        }
        Ok(None)
    }
}

/// The well-known symbol every plugin shared library exports (spec.md §6.6).
const PLUGIN_INIT_SYMBOL: &[u8] = b"recipe_plugin_init";

type PluginInitFn = unsafe extern "C" fn() -> *mut PluginRegistration;

/// What a plugin's `recipe_plugin_init` hands back: its contributions to
/// C1, applied into the shared [`Registries`] after the library is loaded.
/// Mirrors the builder shape of the teacher's `PluginRegistration`
/// (`with_source`, `with_reaction`, ...), specialized to this engine's four
/// registry tables.
#[derive(Default)]
pub struct PluginRegistration {
    link_handlers: Vec<(String, Arc<dyn links::LinkHandler>)>,
    schemas: Vec<(String, JsonValue)>,
    functions: Vec<FunctionMeta>,
    domain: Option<(String, DomainInterface)>,
}

impl PluginRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link_handler(mut self, type_name: impl Into<String>, handler: Arc<dyn links::LinkHandler>) -> Self {
        self.link_handlers.push((type_name.into(), handler));
        self
    }

    pub fn with_schema(mut self, name: impl Into<String>, schema: JsonValue) -> Self {
        self.schemas.push((name.into(), schema));
        self
    }

    pub fn with_function(mut self, meta: FunctionMeta) -> Self {
        self.functions.push(meta);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>, interface: DomainInterface) -> Self {
        self.domain = Some((domain.into(), interface));
        self
    }

    fn apply(self, registries: &mut Registries) -> usize {
        let mut count = 0;
        for (type_name, handler) in self.link_handlers {
            registries.register_link_handler(type_name, handler);
            count += 1;
        }
        for (name, schema) in self.schemas {
            registries.register_schema(name, schema);
            count += 1;
        }
        for meta in self.functions {
            registries.register_function(meta);
            count += 1;
        }
        if let Some((domain, interface)) = self.domain {
            registries.register_domain(domain, interface);
            count += 1;
        }
        count
    }
}

/// A loaded plugin's shared library handle. Must stay alive for as long as
/// any registered trait object from it may be invoked — dropping it would
/// unload code still referenced by `Arc<dyn LinkHandler>` in the registry.
pub struct LoadedPlugin {
    pub path: PathBuf,
    #[allow(dead_code)]
    library: Library,
}

#[derive(Debug, Default)]
pub struct DiscoveryStats {
    pub plugins_found: usize,
    pub plugins_loaded: usize,
    pub plugins_failed: usize,
    pub contributions: usize,
}

/// Phase 1: register every built-in link handler unconditionally (spec.md
/// §4.8 "walk the built-in domain directory and import each" — there is no
/// real filesystem walk since these are compiled in, same as the teacher's
/// `register_builtin_plugins`).
pub fn register_builtin_domains(registries: &mut Registries) {
    info!("registering built-in link handlers");
    links::register_builtin_links(registries);

    registries.register_domain(
        "core",
        DomainInterface {
            version: env!("CARGO_PKG_VERSION").to_string(),
            schemas: Vec::new(),
            functions: Vec::new(),
            packages: registries.link_handler_types().iter().map(|s| s.to_string()).collect(),
        },
    );
}

/// Phase 2: scan `plugin_dir` for subdirectories containing a manifest,
/// load each listed shared library, and apply its [`PluginRegistration`].
/// Per-plugin failures are logged and skipped; they never abort the scan
/// (spec.md §4.8).
pub fn load_plugins(plugin_dir: &Path, registries: &mut Registries) -> (DiscoveryStats, Vec<LoadedPlugin>) {
    let mut stats = DiscoveryStats::default();
    let mut loaded = Vec::new();

    if !plugin_dir.exists() {
        debug!("plugin directory '{}' does not exist, skipping discovery", plugin_dir.display());
        return (stats, loaded);
    }

    let entries = match std::fs::read_dir(plugin_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("failed to read plugin directory '{}': {e}", plugin_dir.display());
            return (stats, loaded);
        }
    };

    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let manifest = match PluginManifest::load(&dir) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => continue,
            Err(e) => {
                warn!("skipping plugin at '{}': {e}", dir.display());
                stats.plugins_failed += 1;
                continue;
            }
        };
        stats.plugins_found += 1;

        match load_one_plugin(&dir, &manifest, registries) {
            Ok(plugin) => {
                info!("loaded plugin '{}' v{}", manifest.name, manifest.version);
                stats.plugins_loaded += 1;
                loaded.push(plugin);
            }
            Err(e) => {
                warn!("failed to load plugin '{}' at '{}': {e}", manifest.name, dir.display());
                stats.plugins_failed += 1;
            }
        }
    }

    stats.contributions = loaded.len();
    (stats, loaded)
}

fn load_one_plugin(dir: &Path, manifest: &PluginManifest, registries: &mut Registries) -> anyhow::Result<LoadedPlugin> {
    let entry_point = manifest
        .entry_points
        .first()
        .ok_or_else(|| anyhow::anyhow!("manifest for '{}' has no entry_points", manifest.name))?;
    let library_path = dir.join(entry_point);

    // SAFETY: the plugin is expected to be built against the same engine
    // version and to export `recipe_plugin_init` with the signature below;
    // there is no cross-process ABI negotiation beyond that convention.
    let library = unsafe { Library::new(&library_path) }
        .map_err(|e| anyhow::anyhow!("failed to load '{}': {e}", library_path.display()))?;

    let registration = unsafe {
        let init: Symbol<PluginInitFn> = library
            .get(PLUGIN_INIT_SYMBOL)
            .map_err(|e| anyhow::anyhow!("symbol 'recipe_plugin_init' not found: {e}"))?;
        let raw = init();
        if raw.is_null() {
            anyhow::bail!("'recipe_plugin_init' returned null");
        }
        Box::from_raw(raw)
    };

    let applied = registration.apply(registries);
    debug!("plugin '{}' contributed {applied} registration(s)", manifest.name);

    Ok(LoadedPlugin {
        path: library_path,
        library,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_domains_register_all_link_handlers() {
        let mut registries = Registries::new();
        register_builtin_domains(&mut registries);
        assert!(registries.get_link_handler("llm").is_some());
        assert!(registries.get_link_handler("storage.save").is_some());
        assert!(registries.get_domain("core").is_some());
    }

    #[test]
    fn missing_plugin_directory_is_not_an_error() {
        let mut registries = Registries::new();
        let (stats, loaded) = load_plugins(Path::new("/nonexistent/plugins"), &mut registries);
        assert_eq!(stats.plugins_found, 0);
        assert!(loaded.is_empty());
    }

    #[test]
    fn directory_without_manifests_finds_nothing() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("not_a_plugin")).unwrap();
        let mut registries = Registries::new();
        let (stats, loaded) = load_plugins(dir.path(), &mut registries);
        assert_eq!(stats.plugins_found, 0);
        assert!(loaded.is_empty());
    }

    #[test]
    fn malformed_manifest_is_logged_and_skipped() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("broken");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("manifest.yaml"), "not: [valid").unwrap();
        let mut registries = Registries::new();
        let (stats, loaded) = load_plugins(dir.path(), &mut registries);
        assert_eq!(stats.plugins_failed, 1);
        assert!(loaded.is_empty());
    }

    #[test]
    fn manifest_naming_a_missing_library_is_logged_and_skipped() {
        let dir = tempdir().unwrap();
        let plugin_dir = dir.path().join("ghost");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("manifest.yaml"),
            "name: ghost\nversion: \"1.0\"\nentry_points:\n  - libghost.so\n",
        )
        .unwrap();
        let mut registries = Registries::new();
        let (stats, loaded) = load_plugins(dir.path(), &mut registries);
        assert_eq!(stats.plugins_found, 1);
        assert_eq!(stats.plugins_failed, 1);
        assert!(loaded.is_empty());
    }
}
