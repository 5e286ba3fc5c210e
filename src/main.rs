// Copyright 2025 The Recipe Engine Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Allow println! in main.rs for CLI user-facing output (validate, list, setup commands)
#![allow(clippy::print_stdout)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use inquire::{Password, Text};
use log::{debug, info};
use recipe_engine::builder::RecipeEngineBuilder;
use recipe_engine::config::{load_config_file, RecipeEngineConfig};
use recipe_engine::discovery::PluginManifest;
use recipe_engine::recipe::Recipe;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "recipe-engine")]
#[command(about = "Run declarative recipes: LLM calls, SQL queries, stored functions, and storage wired together by templated placeholders")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the engine configuration file
    #[arg(short, long, default_value = "config/recipe-engine.yaml", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recipe file to completion and print its resulting context
    Run {
        /// Path to the recipe file (YAML or JSON)
        recipe: PathBuf,
    },

    /// Recipe file management
    Recipes {
        #[command(subcommand)]
        action: RecipesAction,
    },

    /// Plugin package management
    Packages {
        #[command(subcommand)]
        action: PackagesAction,
    },

    /// Credential (.env) management
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Serve the read-only HTTP inspection API (SPEC_FULL.md §A6)
    #[cfg(feature = "http-api")]
    Serve,
}

#[derive(Subcommand)]
enum RecipesAction {
    /// Write a minimal recipe skeleton to a file
    Create {
        /// Output path for the new recipe
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Parse a recipe file and report errors without running it
    Validate {
        /// Path to the recipe file to validate
        recipe: PathBuf,
    },

    /// Write a recipe skeleton containing one example link per registered
    /// link handler type, for editing into a real recipe
    Generate {
        /// Output path for the generated recipe
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PackagesAction {
    /// List plugin manifests found in the configured plugin directory
    List,

    /// Copy a local plugin directory (manifest + shared library) into the
    /// configured plugin directory
    Install {
        /// Path to the plugin directory to install
        source: PathBuf,
    },

    /// Remove an installed plugin's directory by name
    Uninstall {
        /// Plugin name, as declared in its manifest
        name: String,
    },

    /// Scaffold a new plugin directory with a manifest template
    Create {
        /// Plugin name
        name: String,
        /// Directory under which to create the plugin (defaults to the
        /// configured plugin directory)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Load the configured .env files and report what was found
    Check,

    /// Print the configured .env file paths and whether each exists
    List,

    /// Interactively create the root .env file
    Setup {
        /// Overwrite an existing root .env file
        #[arg(long)]
        force: bool,
    },

    /// Set or replace a single KEY=VALUE pair in the root .env file
    Update {
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // SAFETY: set_var runs before any thread other than main is spawned.
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();

    match cli.command {
        Commands::Run { recipe } => run_recipe(&cli.config, &recipe).await,
        Commands::Recipes { action } => run_recipes_command(action),
        Commands::Packages { action } => run_packages_command(&cli.config, action).await,
        Commands::Credentials { action } => run_credentials_command(&cli.config, action),
        #[cfg(feature = "http-api")]
        Commands::Serve => serve(&cli.config).await,
    }
}

#[cfg(feature = "http-api")]
async fn serve(config_path: &Path) -> Result<()> {
    let config = load_or_default_config(config_path)?;
    let host = config.server.host.clone();
    let port = config.server.port;

    let engine = std::sync::Arc::new(RecipeEngineBuilder::new(config).build().await?);
    let router = recipe_engine::api::build_router(engine);

    let addr = format!("{host}:{port}");
    info!("serving read-only inspection API on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

fn load_or_default_config(config_path: &Path) -> Result<RecipeEngineConfig> {
    if config_path.exists() {
        Ok(load_config_file(config_path)?)
    } else {
        debug!("config file '{}' not found, using defaults", config_path.display());
        Ok(RecipeEngineConfig::default())
    }
}

/// `run <recipe>` (spec.md §6.3): build the engine from the configured
/// registries/storage, execute the recipe, print its resulting context as
/// JSON on stdout.
async fn run_recipe(config_path: &Path, recipe_path: &Path) -> Result<()> {
    let config = load_or_default_config(config_path)?;
    let recipe_text = fs::read_to_string(recipe_path)
        .with_context(|| format!("reading recipe file '{}'", recipe_path.display()))?;
    let recipe = Recipe::from_yaml(&recipe_text)?;

    info!("running recipe '{}' ({} links)", recipe.name, recipe.links.len());
    let engine = RecipeEngineBuilder::new(config).build().await?;
    let result = engine.run(&recipe, CancellationToken::new()).await?;

    println!("{}", serde_json::to_string_pretty(&result.context.to_json())?);
    Ok(())
}

fn run_recipes_command(action: RecipesAction) -> Result<()> {
    match action {
        RecipesAction::Create { output, force } => create_recipe_skeleton(&output, force),
        RecipesAction::Validate { recipe } => validate_recipe(&recipe),
        RecipesAction::Generate { output, force } => generate_recipe_skeleton(&output, force),
    }
}

const SKELETON_RECIPE: &str = r#"name: new-recipe
version: "1"
description: "Describe what this recipe does"
links:
  - name: Ask
    type: user_input
    inputs:
      query:
        type: string
        description: "What should the user be asked?"
"#;

fn create_recipe_skeleton(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("'{}' already exists (use --force to overwrite)", output.display());
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, SKELETON_RECIPE)?;
    println!("Wrote recipe skeleton to {}", output.display());
    Ok(())
}

fn validate_recipe(recipe_path: &Path) -> Result<()> {
    let text = fs::read_to_string(recipe_path)
        .with_context(|| format!("reading recipe file '{}'", recipe_path.display()))?;
    match Recipe::from_yaml(&text) {
        Ok(recipe) => {
            println!("[OK] '{}' is a valid recipe", recipe_path.display());
            println!("  name: {}", recipe.name);
            println!("  links: {}", recipe.links.len());
            for link in &recipe.links {
                println!("    - {} ({})", link.name, link.kind);
            }
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] '{}' is not a valid recipe:", recipe_path.display());
            println!("  {e}");
            std::process::exit(1);
        }
    }
}

fn generate_recipe_skeleton(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("'{}' already exists (use --force to overwrite)", output.display());
    }

    let mut registries = recipe_engine::registries::Registries::new();
    recipe_engine::discovery::register_builtin_domains(&mut registries);

    let mut yaml = String::from("name: generated-recipe\nversion: \"1\"\nlinks:\n");
    for (index, type_name) in registries.link_handler_types().into_iter().enumerate() {
        yaml.push_str(&format!(
            "  - name: Step{index}\n    type: {type_name}\n    # fill in the fields this link type expects\n"
        ));
    }

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, yaml)?;
    println!("Wrote a recipe skeleton with one example link per registered type to {}", output.display());
    Ok(())
}

async fn run_packages_command(config_path: &Path, action: PackagesAction) -> Result<()> {
    let config = load_or_default_config(config_path)?;
    let plugin_dir = config.discovery.plugin_dir.clone().unwrap_or_else(|| PathBuf::from("plugins"));

    match action {
        PackagesAction::List => packages_list(&plugin_dir),
        PackagesAction::Install { source } => packages_install(&source, &plugin_dir),
        PackagesAction::Uninstall { name } => packages_uninstall(&name, &plugin_dir),
        PackagesAction::Create { name, dir } => packages_create(&name, dir.unwrap_or(plugin_dir)),
    }
}

fn packages_list(plugin_dir: &Path) -> Result<()> {
    if !plugin_dir.exists() {
        println!("No plugin directory found: {}", plugin_dir.display());
        return Ok(());
    }

    let mut found = 0;
    for entry in fs::read_dir(plugin_dir)?.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        if let Some(manifest) = PluginManifest::load(&dir)? {
            println!("{} v{} — {}", manifest.name, manifest.version, dir.display());
            for entry_point in &manifest.entry_points {
                println!("    {entry_point}");
            }
            found += 1;
        }
    }

    if found == 0 {
        println!("No plugin manifests found in {}", plugin_dir.display());
    }
    Ok(())
}

fn packages_install(source: &Path, plugin_dir: &Path) -> Result<()> {
    let manifest = PluginManifest::load(source)?
        .ok_or_else(|| anyhow::anyhow!("no manifest.{{yaml,yml,json}} found in '{}'", source.display()))?;

    let dest = plugin_dir.join(&manifest.name);
    if dest.exists() {
        anyhow::bail!("'{}' is already installed at {}", manifest.name, dest.display());
    }

    copy_dir_all(source, &dest)?;
    println!("Installed '{}' v{} to {}", manifest.name, manifest.version, dest.display());
    Ok(())
}

fn copy_dir_all(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)?.flatten() {
        let src_path = entry.path();
        let dst_path = dest.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

fn packages_uninstall(name: &str, plugin_dir: &Path) -> Result<()> {
    let target = plugin_dir.join(name);
    if !target.exists() {
        anyhow::bail!("no installed plugin named '{name}' in {}", plugin_dir.display());
    }
    fs::remove_dir_all(&target)?;
    println!("Removed '{name}' from {}", plugin_dir.display());
    Ok(())
}

fn packages_create(name: &str, dir: PathBuf) -> Result<()> {
    let plugin_dir = dir.join(name);
    if plugin_dir.exists() {
        anyhow::bail!("'{}' already exists", plugin_dir.display());
    }
    fs::create_dir_all(&plugin_dir)?;

    let manifest = format!(
        "name: {name}\nversion: \"0.1.0\"\nentry_points:\n  - lib{}.so\n",
        name.replace('-', "_")
    );
    fs::write(plugin_dir.join("manifest.yaml"), manifest)?;
    println!("Scaffolded plugin '{name}' at {}", plugin_dir.display());
    println!("Build a cdylib exporting `recipe_plugin_init` and place it alongside the manifest.");
    Ok(())
}

fn run_credentials_command(config_path: &Path, action: CredentialsAction) -> Result<()> {
    let config = load_or_default_config(config_path)?;

    match action {
        CredentialsAction::Check => credentials_check(&config),
        CredentialsAction::List => credentials_list(&config),
        CredentialsAction::Setup { force } => credentials_setup(&config, force),
        CredentialsAction::Update { key, value } => credentials_update(&config, &key, &value),
    }
}

fn credentials_list(config: &RecipeEngineConfig) -> Result<()> {
    let report = |label: &str, path: &Option<PathBuf>| match path {
        Some(p) if p.exists() => println!("  [present] {label}: {}", p.display()),
        Some(p) => println!("  [missing] {label}: {}", p.display()),
        None => println!("  [unset]   {label}"),
    };
    report("root", &config.credentials.root_env_file);
    report("core", &config.credentials.core_env_file);
    for (i, domain_file) in config.credentials.domain_env_files.iter().enumerate() {
        report(&format!("domain[{i}]"), &Some(domain_file.clone()));
    }
    Ok(())
}

fn credentials_check(config: &RecipeEngineConfig) -> Result<()> {
    let mut ok = true;
    for (label, path) in [
        ("root", config.credentials.root_env_file.as_ref()),
        ("core", config.credentials.core_env_file.as_ref()),
    ] {
        if let Some(path) = path {
            match dotenvy::from_path(path) {
                Ok(()) => println!("  [ok]   {label} env file loaded: {}", path.display()),
                Err(e) => {
                    println!("  [fail] {label} env file '{}': {e}", path.display());
                    ok = false;
                }
            }
        }
    }
    for path in &config.credentials.domain_env_files {
        match dotenvy::from_path(path) {
            Ok(()) => println!("  [ok]   domain env file loaded: {}", path.display()),
            Err(e) => {
                println!("  [fail] domain env file '{}': {e}", path.display());
                ok = false;
            }
        }
    }

    if ok {
        println!("All configured credential files loaded cleanly.");
        Ok(())
    } else {
        println!("Some credential files could not be loaded.");
        std::process::exit(1);
    }
}

fn credentials_setup(config: &RecipeEngineConfig, force: bool) -> Result<()> {
    let root = config
        .credentials
        .root_env_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(".env"));

    if root.exists() && !force {
        anyhow::bail!("'{}' already exists (use --force to overwrite)", root.display());
    }

    let openai_key = Password::new("OPENAI_API_KEY (blank to skip):")
        .without_confirmation()
        .prompt_skippable()?
        .unwrap_or_default();
    let database_url = Text::new("DATABASE_URL:").with_default("file://./data.db").prompt()?;

    let mut contents = String::new();
    if !openai_key.is_empty() {
        contents.push_str(&format!("OPENAI_API_KEY={openai_key}\n"));
    }
    contents.push_str(&format!("DATABASE_URL={database_url}\n"));

    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&root, contents)?;
    println!("Wrote credentials to {}", root.display());
    Ok(())
}

fn credentials_update(config: &RecipeEngineConfig, key: &str, value: &str) -> Result<()> {
    let root = config
        .credentials
        .root_env_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(".env"));

    let existing = fs::read_to_string(&root).unwrap_or_default();
    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    let prefix = format!("{key}=");
    let mut replaced = false;
    for line in &mut lines {
        if line.starts_with(&prefix) {
            *line = format!("{key}={value}");
            replaced = true;
            break;
        }
    }
    if !replaced {
        lines.push(format!("{key}={value}"));
    }

    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&root, format!("{}\n", lines.join("\n")))?;
    println!("Updated '{key}' in {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn credentials_update_appends_new_key() {
        let dir = tempdir().unwrap();
        let root = dir.path().join(".env");
        let mut config = RecipeEngineConfig::default();
        config.credentials.root_env_file = Some(root.clone());

        credentials_update(&config, "OPENAI_API_KEY", "sk-test").unwrap();
        let content = fs::read_to_string(&root).unwrap();
        assert!(content.contains("OPENAI_API_KEY=sk-test"));
    }

    #[test]
    fn credentials_update_replaces_existing_key() {
        let dir = tempdir().unwrap();
        let root = dir.path().join(".env");
        fs::write(&root, "OPENAI_API_KEY=old\nDATABASE_URL=file://./data.db\n").unwrap();
        let mut config = RecipeEngineConfig::default();
        config.credentials.root_env_file = Some(root.clone());

        credentials_update(&config, "OPENAI_API_KEY", "new").unwrap();
        let content = fs::read_to_string(&root).unwrap();
        assert!(content.contains("OPENAI_API_KEY=new"));
        assert!(!content.contains("old"));
        assert!(content.contains("DATABASE_URL=file://./data.db"));
    }

    #[test]
    fn recipes_create_then_validate_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("demo.yaml");
        create_recipe_skeleton(&path, false).unwrap();
        validate_recipe(&path).unwrap();
    }
}
