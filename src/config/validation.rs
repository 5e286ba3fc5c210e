//! Unknown-field detection for configuration documents.
//!
//! `serde`'s `#[serde(default)]` silently accepts a config with a typo'd
//! field name (the field is just never populated). This pass parses the
//! raw document into a generic `serde_yaml::Value` first and checks every
//! object key against the known field list for its position, so a typo is
//! reported instead of silently ignored — same two-pass shape as the
//! teacher's `config::validation`.

use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown field '{field}' in {context}. Valid fields are: {valid_fields}")]
    UnknownField {
        field: String,
        context: String,
        valid_fields: String,
    },

    #[error("multiple validation errors:\n{}", .0.join("\n"))]
    Multiple(Vec<String>),
}

const ROOT_FIELDS: &[&str] = &["log_level", "strict", "storage", "discovery", "templates", "credentials", "server"];
const STORAGE_FIELDS: &[&str] = &["adapter", "base_dir"];
const DISCOVERY_FIELDS: &[&str] = &["plugin_dir"];
const TEMPLATES_FIELDS: &[&str] = &["text_dirs", "recipe_dirs"];
const CREDENTIALS_FIELDS: &[&str] = &["domain_env_files", "core_env_file", "root_env_file"];
const SERVER_FIELDS: &[&str] = &["host", "port"];

fn check_object(value: &serde_yaml::Value, context: &str, known: &[&str], errors: &mut Vec<String>) {
    let Some(map) = value.as_mapping() else { return };
    let known_set: HashSet<&str> = known.iter().copied().collect();
    for key in map.keys() {
        let Some(key) = key.as_str() else { continue };
        if !known_set.contains(key) {
            errors.push(
                ValidationError::UnknownField {
                    field: key.to_string(),
                    context: context.to_string(),
                    valid_fields: known.join(", "),
                }
                .to_string(),
            );
        }
    }
}

/// Validate the raw document against the known field set for
/// [`super::types::RecipeEngineConfig`] and its nested sections.
pub fn validate_fields(document: &serde_yaml::Value) -> Result<(), ValidationError> {
    let mut errors = Vec::new();
    check_object(document, "root configuration", ROOT_FIELDS, &mut errors);

    if let Some(mapping) = document.as_mapping() {
        if let Some(storage) = mapping.get("storage") {
            check_object(storage, "storage", STORAGE_FIELDS, &mut errors);
        }
        if let Some(discovery) = mapping.get("discovery") {
            check_object(discovery, "discovery", DISCOVERY_FIELDS, &mut errors);
        }
        if let Some(templates) = mapping.get("templates") {
            check_object(templates, "templates", TEMPLATES_FIELDS, &mut errors);
        }
        if let Some(credentials) = mapping.get("credentials") {
            check_object(credentials, "credentials", CREDENTIALS_FIELDS, &mut errors);
        }
        if let Some(server) = mapping.get("server") {
            check_object(server, "server", SERVER_FIELDS, &mut errors);
        }
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(ValidationError::Multiple(errors)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}
