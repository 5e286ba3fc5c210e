//! YAML-first, JSON-fallback configuration loading with transparent
//! environment-variable interpolation (SPEC_FULL.md §A3).

use super::env_interpolation;
use super::types::RecipeEngineConfig;
use super::validation::{self, ValidationError};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("environment variable interpolation failed: {0}")]
    InterpolationError(#[from] env_interpolation::InterpolationError),

    #[error("failed to parse config file '{path}': YAML error: {yaml_err}, JSON error: {json_err}")]
    ParseError {
        path: String,
        yaml_err: String,
        json_err: String,
    },

    #[error("unknown field(s) in config file: {0}")]
    FieldValidationError(#[from] ValidationError),

    #[error("validation error: {0}")]
    ValidationError(#[from] anyhow::Error),
}

/// Deserialize YAML with environment variables interpolated first.
pub fn from_yaml_str<T: DeserializeOwned>(s: &str) -> Result<T, ConfigError> {
    let interpolated = env_interpolation::interpolate(s)?;
    Ok(serde_yaml::from_str(&interpolated)?)
}

/// Deserialize JSON with environment variables interpolated first.
pub fn from_json_str<T: DeserializeOwned>(s: &str) -> Result<T, ConfigError> {
    let interpolated = env_interpolation::interpolate(s)?;
    Ok(serde_json::from_str(&interpolated)?)
}

/// Load, interpolate, parse (YAML then JSON), and validate a
/// [`RecipeEngineConfig`] from disk.
pub fn load_config_file<P: AsRef<Path>>(path: P) -> Result<RecipeEngineConfig, ConfigError> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref)?;
    let interpolated = env_interpolation::interpolate(&content)?;

    // Catch typo'd field names before `#[serde(default)]` can silently
    // swallow them (spec.md §7: configuration errors are fatal).
    if let Ok(document) = serde_yaml::from_str::<serde_yaml::Value>(&interpolated) {
        validation::validate_fields(&document)?;
    }

    let config = match serde_yaml::from_str::<RecipeEngineConfig>(&interpolated) {
        Ok(config) => config,
        Err(yaml_err) => match serde_json::from_str::<RecipeEngineConfig>(&interpolated) {
            Ok(config) => config,
            Err(json_err) => {
                return Err(ConfigError::ParseError {
                    path: path_ref.display().to_string(),
                    yaml_err: yaml_err.to_string(),
                    json_err: json_err.to_string(),
                });
            }
        },
    };

    config.validate()?;
    Ok(config)
}

/// Serialize a [`RecipeEngineConfig`] back to YAML. Interpolated values
/// are written literally; `${VAR}` references are not reconstructed.
pub fn save_config_file<P: AsRef<Path>>(config: &RecipeEngineConfig, path: P) -> Result<(), ConfigError> {
    let content = serde_yaml::to_string(config)?;
    Ok(fs::write(path, content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::NamedTempFile;

    #[test]
    fn from_yaml_str_interpolates_before_parsing() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Small {
            name: String,
            value: i32,
        }
        env::set_var("RE_LOADER_NAME", "widget");
        let yaml = "name: ${RE_LOADER_NAME}\nvalue: 7";
        let parsed: Small = from_yaml_str(yaml).unwrap();
        assert_eq!(
            parsed,
            Small {
                name: "widget".to_string(),
                value: 7
            }
        );
    }

    #[test]
    fn load_then_save_roundtrips() {
        let file = NamedTempFile::new().unwrap();
        let mut config = RecipeEngineConfig::default();
        config.log_level = "debug".to_string();
        save_config_file(&config, file.path()).unwrap();

        let loaded = load_config_file(file.path()).unwrap();
        assert_eq!(loaded.log_level, "debug");
    }

    #[test]
    fn invalid_config_fails_validation_not_parsing() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "storage:\n  base_dir: \"\"\n").unwrap();
        let err = load_config_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn malformed_file_reports_both_parse_errors() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "not: valid: yaml: [").unwrap();
        let err = load_config_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
