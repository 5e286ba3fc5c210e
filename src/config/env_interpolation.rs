//! Environment variable interpolation for configuration files (spec.md §6.4).
//!
//! POSIX-style syntax:
//! - `${VAR_NAME}` - required variable
//! - `${VAR_NAME:-default}` - variable with a default if unset or empty

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;

/// Maximum length for interpolated strings, to keep a pathological
/// `${VAR}` blowup from growing a config file without bound.
const MAX_INTERPOLATED_LENGTH: usize = 10_000_000; // 10MB

/// Captures: 1 = variable name, 2 = full `:-default` syntax if present,
/// 3 = the default value itself.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("invalid regex pattern"));

#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    #[error("environment variable '{name}' is not set and has no default value")]
    MissingVariable { name: String },

    #[error("interpolated result exceeds maximum allowed length of {MAX_INTERPOLATED_LENGTH} bytes")]
    ResultTooLarge,
}

/// Replace every `${VAR_NAME}` / `${VAR_NAME:-default}` occurrence in
/// `input` with the corresponding environment variable (or default).
pub fn interpolate(input: &str) -> Result<String, InterpolationError> {
    let mut result = String::with_capacity(input.len());
    let mut last_match_end = 0;
    let mut variables_used = Vec::new();

    for caps in ENV_VAR_PATTERN.captures_iter(input) {
        let full_match = caps.get(0).unwrap();
        let var_name = caps.get(1).unwrap().as_str();
        let default_value = caps.get(3).map(|m| m.as_str());

        result.push_str(&input[last_match_end..full_match.start()]);

        let value = match env::var(var_name) {
            Ok(val) if !val.is_empty() => val,
            Ok(_) | Err(env::VarError::NotPresent) => match default_value {
                Some(default) => default.to_string(),
                None => {
                    return Err(InterpolationError::MissingVariable {
                        name: var_name.to_string(),
                    });
                }
            },
            Err(env::VarError::NotUnicode(_)) => {
                return Err(InterpolationError::MissingVariable {
                    name: format!("{var_name} (contains invalid Unicode)"),
                });
            }
        };

        variables_used.push(var_name);
        result.push_str(&value);
        last_match_end = full_match.end();

        if result.len() > MAX_INTERPOLATED_LENGTH {
            return Err(InterpolationError::ResultTooLarge);
        }
    }

    result.push_str(&input[last_match_end..]);

    if !variables_used.is_empty() {
        debug!("interpolated environment variables: {}", variables_used.join(", "));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_interpolation() {
        env::set_var("RE_TEST_VAR1", "value1");
        env::set_var("RE_TEST_VAR2", "value2");
        let result = interpolate("key1: ${RE_TEST_VAR1}\nkey2: ${RE_TEST_VAR2}").unwrap();
        assert_eq!(result, "key1: value1\nkey2: value2");
    }

    #[test]
    fn default_value_when_var_not_set() {
        env::remove_var("RE_TEST_NONEXISTENT");
        let result = interpolate("value: ${RE_TEST_NONEXISTENT:-default_value}").unwrap();
        assert_eq!(result, "value: default_value");
    }

    #[test]
    fn default_value_when_var_is_empty() {
        env::set_var("RE_TEST_EMPTY", "");
        let result = interpolate("value: ${RE_TEST_EMPTY:-default_value}").unwrap();
        assert_eq!(result, "value: default_value");
    }

    #[test]
    fn variable_value_overrides_default() {
        env::set_var("RE_TEST_WITH_DEFAULT", "actual_value");
        let result = interpolate("value: ${RE_TEST_WITH_DEFAULT:-default_value}").unwrap();
        assert_eq!(result, "value: actual_value");
    }

    #[test]
    fn missing_variable_without_default_is_an_error() {
        env::remove_var("RE_TEST_MISSING");
        let result = interpolate("value: ${RE_TEST_MISSING}");
        assert!(matches!(result, Err(InterpolationError::MissingVariable { .. })));
    }

    #[test]
    fn multiple_variables_in_same_string() {
        env::set_var("RE_TEST_HOST", "localhost");
        env::set_var("RE_TEST_PORT", "8080");
        let result = interpolate("url: http://${RE_TEST_HOST}:${RE_TEST_PORT}/api").unwrap();
        assert_eq!(result, "url: http://localhost:8080/api");
    }

    #[test]
    fn invalid_variable_name_with_dash_does_not_match() {
        let input = "value: ${INVALID-NAME}";
        let result = interpolate(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn dos_protection_max_length() {
        let long_value = "x".repeat(MAX_INTERPOLATED_LENGTH + 1);
        env::set_var("RE_TEST_VERY_LONG", &long_value);
        let result = interpolate("${RE_TEST_VERY_LONG}");
        assert!(matches!(result, Err(InterpolationError::ResultTooLarge)));
    }

    #[test]
    fn no_variables_returns_unchanged() {
        let input = "plain: text\nwith: no variables";
        assert_eq!(interpolate(input).unwrap(), input);
    }
}
