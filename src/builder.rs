//! Programmatic engine assembly (SPEC_FULL.md §A1), mirroring the
//! teacher's `DrasiServerBuilder`: a fluent `with_*` builder consumed by
//! one async `build()` that runs discovery and returns a ready-to-use
//! handle, the `RecipeEngine` standing in for `DrasiServer`.

use crate::config::{RecipeEngineConfig, TemplatesConfig};
use crate::credentials;
use crate::discovery::{self, LoadedPlugin};
use crate::executor::{ExecutorError, Executor};
use crate::links::llm::{HttpLlmClient, LlmClient, LlmLinkHandler, LlmRestater};
use crate::links::LinkHandler;
use crate::recipe::Recipe;
use crate::registries::{Registries, TemplateKind};
use crate::storage::file_adapter::FileAdapter;
use crate::storage::Repository;
use log::info;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The default model used for schema-guided restatement (spec.md §4.5
/// step 8) when the caller doesn't override it.
const DEFAULT_RESTATE_MODEL: &str = "gpt-4o-mini";

pub struct RecipeEngineBuilder {
    config: RecipeEngineConfig,
    registries: Registries,
    llm_client: Arc<dyn LlmClient>,
    extra_link_handlers: Vec<(String, Arc<dyn LinkHandler>)>,
}

impl RecipeEngineBuilder {
    pub fn new(config: RecipeEngineConfig) -> Self {
        Self {
            config,
            registries: Registries::new(),
            llm_client: Arc::new(HttpLlmClient::default()),
            extra_link_handlers: Vec::new(),
        }
    }

    /// Override the provider used by the built-in `llm` handler and by
    /// output-shaping's schema-guided restatement (spec.md §4.5 step 8).
    /// Primarily for tests, to inject a stub instead of a real HTTP call.
    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = client;
        self
    }

    /// Register an additional (or overriding) link handler before
    /// discovery runs, the programmatic equivalent of a plugin
    /// contribution (spec.md §4.4 "new link types may be registered").
    pub fn with_link_handler(mut self, type_name: impl Into<String>, handler: Arc<dyn LinkHandler>) -> Self {
        self.extra_link_handlers.push((type_name.into(), handler));
        self
    }

    pub fn with_text_template_directory(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.templates.text_dirs.push(dir.into());
        self
    }

    pub fn with_recipe_template_directory(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.templates.recipe_dirs.push(dir.into());
        self
    }

    /// Run discovery, wire up storage and the LLM restater, and return a
    /// ready-to-use [`RecipeEngine`].
    pub async fn build(mut self) -> anyhow::Result<RecipeEngine> {
        self.config.validate()?;

        credentials::load_credentials(&self.config.credentials);

        discovery::register_builtin_domains(&mut self.registries);
        // Re-register `llm` bound to the builder's client so the shared
        // LlmRestater (used by output shaping, spec.md §4.5 step 8) talks
        // to the same provider the handler itself uses.
        self.registries
            .register_link_handler("llm", Arc::new(LlmLinkHandler::with_client(self.llm_client.clone())));

        for (type_name, handler) in self.extra_link_handlers {
            self.registries.register_link_handler(type_name, handler);
        }

        register_template_directories(&mut self.registries, &self.config.templates);

        let plugins = if let Some(plugin_dir) = self.config.discovery.plugin_dir.clone() {
            let (stats, plugins) = discovery::load_plugins(&plugin_dir, &mut self.registries);
            info!(
                "plugin discovery: {} found, {} loaded, {} failed",
                stats.plugins_found, stats.plugins_loaded, stats.plugins_failed
            );
            plugins
        } else {
            Vec::new()
        };

        let repository = build_repository(&self.config)?;
        let restater = Arc::new(LlmRestater::new(self.llm_client.clone(), DEFAULT_RESTATE_MODEL));

        let registries = Arc::new(self.registries);
        let mut executor = Executor::new(registries.clone()).strict(self.config.strict).with_restater(restater);
        if let Some(repository) = repository.clone() {
            executor = executor.with_repository(repository);
        }

        Ok(RecipeEngine {
            config: self.config,
            registries,
            repository,
            executor,
            _plugins: plugins,
        })
    }
}

fn register_template_directories(registries: &mut Registries, templates: &TemplatesConfig) {
    for dir in &templates.text_dirs {
        registries.register_template_directory(TemplateKind::Text, dir.clone());
    }
    for dir in &templates.recipe_dirs {
        registries.register_template_directory(TemplateKind::Recipes, dir.clone());
    }
}

fn build_repository(config: &RecipeEngineConfig) -> anyhow::Result<Option<Arc<Repository>>> {
    match config.storage.adapter.as_str() {
        "file" => {
            std::fs::create_dir_all(&config.storage.base_dir)?;
            let adapter = FileAdapter::new(config.storage.base_dir.clone());
            Ok(Some(Arc::new(Repository::new(Box::new(adapter)))))
        }
        "none" => Ok(None),
        other => anyhow::bail!("unknown storage adapter '{other}' (only 'file' and 'none' are built in)"),
    }
}

/// A built engine: shared registries, an optional storage repository, one
/// `Executor`, and the plugin library handles kept alive for the process
/// lifetime (spec.md §5 "Shared resources").
pub struct RecipeEngine {
    config: RecipeEngineConfig,
    registries: Arc<Registries>,
    repository: Option<Arc<Repository>>,
    executor: Executor,
    _plugins: Vec<LoadedPlugin>,
}

impl RecipeEngine {
    pub fn config(&self) -> &RecipeEngineConfig {
        &self.config
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn repository(&self) -> Option<&Arc<Repository>> {
        self.repository.as_ref()
    }

    /// Run one recipe to completion (spec.md §4.6). One call = one
    /// logical worker; concurrent calls on the same `RecipeEngine` are
    /// safe since each owns its own execution context (spec.md §5).
    pub async fn run(
        &self,
        recipe: &Recipe,
        cancellation: CancellationToken,
    ) -> Result<crate::executor::ExecutionResult, ExecutorError> {
        self.executor.execute(recipe, cancellation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::HandlerError;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[crate::value::Message],
            _temperature: f64,
            _max_tokens: Option<u32>,
        ) -> Result<String, HandlerError> {
            Ok("stub reply".to_string())
        }
    }

    #[tokio::test]
    async fn build_registers_builtin_link_handlers() {
        let dir = tempdir().unwrap();
        let mut config = RecipeEngineConfig::default();
        config.storage.base_dir = dir.path().to_path_buf();

        let engine = RecipeEngineBuilder::new(config)
            .with_llm_client(Arc::new(StubLlm))
            .build()
            .await
            .unwrap();

        assert!(engine.registries().get_link_handler("llm").is_some());
        assert!(engine.registries().get_link_handler("storage.save").is_some());
        assert!(engine.repository().is_some());
    }

    #[tokio::test]
    async fn none_storage_adapter_builds_without_a_repository() {
        let mut config = RecipeEngineConfig::default();
        config.storage.adapter = "none".to_string();

        let engine = RecipeEngineBuilder::new(config)
            .with_llm_client(Arc::new(StubLlm))
            .build()
            .await
            .unwrap();

        assert!(engine.repository().is_none());
    }

    #[tokio::test]
    async fn unknown_storage_adapter_fails_to_build() {
        let mut config = RecipeEngineConfig::default();
        config.storage.adapter = "sqlite".to_string();

        let result = RecipeEngineBuilder::new(config).with_llm_client(Arc::new(StubLlm)).build().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn runs_a_minimal_recipe_end_to_end() {
        let dir = tempdir().unwrap();
        let mut config = RecipeEngineConfig::default();
        config.storage.base_dir = dir.path().to_path_buf();

        let engine = RecipeEngineBuilder::new(config)
            .with_llm_client(Arc::new(StubLlm))
            .build()
            .await
            .unwrap();

        let recipe = Recipe::from_yaml(
            r#"
name: demo
version: "1"
links:
  - name: Gen
    type: llm
    prompt: "hello"
"#,
        )
        .unwrap();

        let result = engine.run(&recipe, CancellationToken::new()).await.unwrap();
        assert!(result.context.as_map().unwrap().contains_key("Gen_output"));
    }
}
