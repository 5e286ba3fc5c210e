//! Process-wide registry substrate (spec.md §4.1 / C1).
//!
//! Four append-mostly, last-writer-wins tables plus the template-directory
//! lists, mirroring the shape of the teacher's `PluginRegistry`
//! (`plugin_registry.rs`): a plain struct over `HashMap`s, built during
//! discovery and shared read-only afterwards via `Arc`.

use crate::links::LinkHandler;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};

/// Metadata describing a registered domain function (spec.md §3.6).
/// `source`, when present, is the Rhai script body a `function` link
/// invokes by name (spec.md §4.4); functions advertised without a body are
/// documentation-only entries contributed by domains that execute the
/// call themselves.
#[derive(Debug, Clone)]
pub struct FunctionMeta {
    pub domain: String,
    pub name: String,
    pub description: String,
    pub source: Option<String>,
}

/// A domain's advertised interface: version plus the schemas, functions,
/// and packages it contributes (spec.md §3.6).
#[derive(Debug, Clone, Default)]
pub struct DomainInterface {
    pub version: String,
    pub schemas: Vec<String>,
    pub functions: Vec<String>,
    pub packages: Vec<String>,
}

/// Kind of template directory list (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Text,
    Recipes,
}

/// The four process-wide registries plus template-directory lists.
///
/// Registration is idempotent and last-writer-wins: re-registering under an
/// existing name logs and replaces rather than erroring (spec.md §3.6,
/// §4.1), the same behavior the teacher's `PluginRegistry::register_source`
/// exhibits and that `test_duplicate_kind_replaces` pins down.
#[derive(Default)]
pub struct Registries {
    link_handlers: HashMap<String, Arc<dyn LinkHandler>>,
    schemas: HashMap<String, JsonValue>,
    functions: HashMap<(String, String), FunctionMeta>,
    domains: HashMap<String, DomainInterface>,
    template_dirs: HashMap<TemplateKind, Vec<PathBuf>>,
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries")
            .field("link_handlers", &self.link_handler_types())
            .field("schemas", &self.schema_names())
            .field("domains", &self.domain_names())
            .finish()
    }
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link handler under a type name. Last writer wins.
    pub fn register_link_handler(&mut self, type_name: impl Into<String>, handler: Arc<dyn LinkHandler>) {
        let type_name = type_name.into();
        if self.link_handlers.contains_key(&type_name) {
            debug!("replacing link handler registration for type '{type_name}'");
        } else {
            info!("registered link handler type '{type_name}'");
        }
        self.link_handlers.insert(type_name, handler);
    }

    /// Fatal lookup: callers must treat a miss as a configuration error
    /// (spec.md §4.1 — "callers of link-handler `get` must treat this as
    /// fatal configuration error").
    pub fn get_link_handler(&self, type_name: &str) -> Option<Arc<dyn LinkHandler>> {
        self.link_handlers.get(type_name).cloned()
    }

    pub fn link_handler_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.link_handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Register a JSON schema under a fully-qualified name. Registering the
    /// same name with an equal schema is a no-op in effect (spec.md §8),
    /// though the write itself is always last-writer-wins.
    pub fn register_schema(&mut self, name: impl Into<String>, schema: JsonValue) {
        let name = name.into();
        match self.schemas.get(&name) {
            Some(existing) if existing == &schema => {
                debug!("schema '{name}' re-registered with identical definition, no-op");
            }
            Some(_) => debug!("replacing schema registration for '{name}'"),
            None => info!("registered schema '{name}'"),
        }
        self.schemas.insert(name, schema);
    }

    pub fn get_schema(&self, name: &str) -> Option<&JsonValue> {
        self.schemas.get(name)
    }

    pub fn schema_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Register a domain function under `(domain, name)`.
    pub fn register_function(&mut self, meta: FunctionMeta) {
        let key = (meta.domain.clone(), meta.name.clone());
        if self.functions.contains_key(&key) {
            debug!("replacing function registration for {}.{}", meta.domain, meta.name);
        } else {
            info!("registered function {}.{}", meta.domain, meta.name);
        }
        self.functions.insert(key, meta);
    }

    pub fn get_function(&self, domain: &str, name: &str) -> Option<&FunctionMeta> {
        self.functions.get(&(domain.to_string(), name.to_string()))
    }

    /// Register or merge a domain's interface contribution.
    pub fn register_domain(&mut self, domain: impl Into<String>, interface: DomainInterface) {
        let domain = domain.into();
        info!("registered domain '{domain}' (version {})", interface.version);
        self.domains.insert(domain, interface);
    }

    pub fn get_domain(&self, domain: &str) -> Option<&DomainInterface> {
        self.domains.get(domain)
    }

    pub fn domain_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.domains.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Append a directory to a template-kind's search list, in registration
    /// order (spec.md §4.1).
    pub fn register_template_directory(&mut self, kind: TemplateKind, dir: PathBuf) {
        let dirs = self.template_dirs.entry(kind).or_default();
        if !dirs.contains(&dir) {
            info!("registered {kind:?} template directory: {}", dir.display());
            dirs.push(dir);
        }
    }

    pub fn template_directories(&self, kind: TemplateKind) -> &[PathBuf] {
        self.template_dirs.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a `<domain>.<name>` template reference by trying each
    /// directory × extension combination in registration order.
    pub fn resolve_template(&self, kind: TemplateKind, domain_dot_name: &str) -> Option<PathBuf> {
        let (domain, name) = domain_dot_name.split_once('.')?;
        let extensions: &[&str] = match kind {
            TemplateKind::Text => &["txt", "md", "j2"],
            TemplateKind::Recipes => &["yaml", "yml", "json"],
        };
        for dir in self.template_directories(kind) {
            for ext in extensions {
                let candidate = dir.join(domain).join(format!("{name}.{ext}"));
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{HandlerError, LinkContext};
    use async_trait::async_trait;
    use crate::value::LinkOutput;

    struct EchoHandler;

    #[async_trait]
    impl LinkHandler for EchoHandler {
        async fn execute(
            &self,
            _config: &JsonValue,
            _ctx: &LinkContext<'_>,
        ) -> Result<LinkOutput, HandlerError> {
            Ok(LinkOutput::new("echo", Default::default()))
        }

        fn schema(&self) -> JsonValue {
            serde_json::json!({"type": "object"})
        }
    }

    #[test]
    fn register_and_get_link_handler() {
        let mut registries = Registries::new();
        registries.register_link_handler("echo", Arc::new(EchoHandler));
        assert!(registries.get_link_handler("echo").is_some());
        assert!(registries.get_link_handler("missing").is_none());
        assert_eq!(registries.link_handler_types(), vec!["echo"]);
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut registries = Registries::new();
        registries.register_link_handler("echo", Arc::new(EchoHandler));
        registries.register_link_handler("echo", Arc::new(EchoHandler));
        assert_eq!(registries.link_handler_types(), vec!["echo"]);
    }

    #[test]
    fn schema_same_value_is_noop_semantically() {
        let mut registries = Registries::new();
        let schema = serde_json::json!({"type": "object"});
        registries.register_schema("demo.thing", schema.clone());
        registries.register_schema("demo.thing", schema.clone());
        assert_eq!(registries.get_schema("demo.thing"), Some(&schema));
    }

    #[test]
    fn template_directories_are_ordered() {
        let mut registries = Registries::new();
        registries.register_template_directory(TemplateKind::Text, PathBuf::from("templates/text"));
        registries.register_template_directory(TemplateKind::Text, PathBuf::from("plugins/foo/templates"));
        let dirs = registries.template_directories(TemplateKind::Text);
        assert_eq!(dirs[0], PathBuf::from("templates/text"));
        assert_eq!(dirs[1], PathBuf::from("plugins/foo/templates"));
    }
}
