//! Recipe data model (spec.md §3.1–§3.2, §6.1).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Top-level recipe envelope. Deserializes from YAML or JSON with the same
/// shape (spec.md §6.1); `serde_yaml` parses JSON fine too since JSON is a
/// subset of YAML, so one loader path covers both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    pub links: Vec<LinkDecl>,
}

/// One link declaration. Common fields are named explicitly; every
/// type-specific field (`prompt`, `template`, `query`, ...) lives in
/// `config`, an untyped JSON object, since each handler owns its own
/// schema (spec.md §3.2, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub output_schema: Option<JsonValue>,
    /// Every remaining field, flattened into one object (spec.md §3.2
    /// "type-specific fields").
    #[serde(flatten)]
    pub config: serde_json::Map<String, JsonValue>,
}

impl LinkDecl {
    /// `<name with spaces→underscores>_output`, the context key this
    /// link's output is stored under (spec.md §3.2).
    pub fn context_key(&self) -> String {
        format!("{}_output", self.name.replace(' ', "_"))
    }

    /// The declaration as a JSON object, including the common fields, the
    /// way a handler's `execute` receives it — `condition` and
    /// `output_schema` are consumed by the executor and not re-passed, but
    /// handler-specific fields are.
    pub fn config_as_json(&self) -> JsonValue {
        JsonValue::Object(self.config.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("failed to parse recipe: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("duplicate link name '{0}'")]
    DuplicateLinkName(String),
}

impl Recipe {
    pub fn from_yaml(text: &str) -> Result<Self, RecipeError> {
        let recipe: Recipe = serde_yaml::from_str(text)?;
        recipe.validate_unique_names()?;
        Ok(recipe)
    }

    fn validate_unique_names(&self) -> Result<(), RecipeError> {
        let mut seen = std::collections::HashSet::new();
        for link in &self.links {
            if !seen.insert(&link.name) {
                return Err(RecipeError::DuplicateLinkName(link.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_recipe() {
        let yaml = r#"
name: demo
version: "1"
links:
  - name: Ask
    type: user_input
    inputs:
      query:
        type: string
"#;
        let recipe = Recipe::from_yaml(yaml).unwrap();
        assert_eq!(recipe.links.len(), 1);
        assert_eq!(recipe.links[0].context_key(), "Ask_output");
    }

    #[test]
    fn rejects_duplicate_link_names() {
        let yaml = r#"
name: demo
version: "1"
links:
  - name: A
    type: user_input
  - name: A
    type: user_input
"#;
        let err = Recipe::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RecipeError::DuplicateLinkName(_)));
    }

    #[test]
    fn preserves_type_specific_fields_in_config() {
        let yaml = r#"
name: demo
version: "1"
links:
  - name: Gen
    type: llm
    prompt: "hello {{ X }}"
    model: gpt-4o
"#;
        let recipe = Recipe::from_yaml(yaml).unwrap();
        assert_eq!(
            recipe.links[0].config.get("prompt").and_then(JsonValue::as_str),
            Some("hello {{ X }}")
        );
    }
}
