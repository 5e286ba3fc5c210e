//! Hierarchical `.env` loading (spec.md §6.4).
//!
//! Credentials for LLM providers and databases are read from the process
//! environment by the handlers that need them (`llm::HttpLlmClient`,
//! `sql::SqlLinkHandler`) — missing variables fail loudly at the first
//! link that requires them, not here. This module only seeds `std::env`
//! from on-disk `.env` files before discovery runs, in increasing
//! precedence order: domain-local, then core, then root — root wins.
//!
//! `dotenvy::from_path` never overwrites a variable already present in
//! the process environment, so loading root first and domain-local last
//! gives the desired precedence for free: whichever file sets a variable
//! first keeps it, and a real environment variable always wins over any
//! file.

use crate::config::CredentialsConfig;
use log::{debug, warn};
use std::path::Path;

/// Load `config.root_env_file`, then `config.core_env_file`, then every
/// `config.domain_env_files` entry, skipping files that don't exist.
/// A present-but-malformed `.env` file is logged and skipped rather than
/// treated as fatal — credential loading is best-effort by design (the
/// link that actually needs the variable is what fails loudly).
pub fn load_credentials(config: &CredentialsConfig) {
    if let Some(root) = &config.root_env_file {
        load_one(root, "root");
    }
    if let Some(core) = &config.core_env_file {
        load_one(core, "core");
    }
    for domain_file in &config.domain_env_files {
        load_one(domain_file, "domain-local");
    }
}

fn load_one(path: &Path, kind: &str) {
    if !path.exists() {
        debug!("{kind} env file '{}' not found, skipping", path.display());
        return;
    }
    match dotenvy::from_path(path) {
        Ok(()) => debug!("loaded {kind} env file '{}'", path.display()),
        Err(e) => warn!("failed to load {kind} env file '{}': {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn root_file_wins_over_core_and_domain() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root.env");
        let core = dir.path().join("core.env");
        let domain = dir.path().join("domain.env");
        std::fs::write(&root, "CRED_SHARED_KEY=from_root\n").unwrap();
        std::fs::write(&core, "CRED_SHARED_KEY=from_core\n").unwrap();
        std::fs::write(&domain, "CRED_SHARED_KEY=from_domain\nCRED_DOMAIN_ONLY=domain_value\n").unwrap();

        env::remove_var("CRED_SHARED_KEY");
        env::remove_var("CRED_DOMAIN_ONLY");

        let config = CredentialsConfig {
            domain_env_files: vec![domain],
            core_env_file: Some(core),
            root_env_file: Some(root),
        };
        load_credentials(&config);

        assert_eq!(env::var("CRED_SHARED_KEY").unwrap(), "from_root");
        assert_eq!(env::var("CRED_DOMAIN_ONLY").unwrap(), "domain_value");
    }

    #[test]
    fn missing_files_are_skipped_without_panicking() {
        let config = CredentialsConfig {
            domain_env_files: vec![std::path::PathBuf::from("/nonexistent/domain.env")],
            core_env_file: None,
            root_env_file: None,
        };
        load_credentials(&config);
    }
}
