//! Output shaper (spec.md §4.5 / C5).
//!
//! Given raw text and a declared `output_schema`, attempts the eight-step
//! cascade the spec describes. Step-for-step grounded in the original
//! implementation's `core/executor.py` (`extract_json`,
//! `attempt_fix_truncated_json`, `fix_common_json_errors`), translated into
//! idiomatic Rust.

use crate::schema::{repair, validate, ValidationIssue};
use async_trait::async_trait;
use indexmap::IndexMap;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::value::Value;

/// Restatement collaborator: issues the single schema-guided secondary LLM
/// call (step 8). A trait so the shaper has no hard dependency on any
/// concrete provider — the `llm` link handler's client satisfies it.
#[async_trait]
pub trait Restater: Send + Sync {
    async fn restate(&self, text: &str, schema: &JsonValue) -> Option<String>;
}

pub struct Shaped {
    pub data: IndexMap<String, Value>,
    pub issues: Vec<ValidationIssue>,
}

/// Run the cascade. `restater` is optional — when absent, step 8 is
/// skipped and the final fallback (`{raw_content: text}`) is used instead.
pub async fn shape(
    raw: &str,
    schema: &JsonValue,
    restater: Option<&dyn Restater>,
) -> Shaped {
    if raw.is_empty() {
        return fallback(raw, Vec::new());
    }

    if let Some(parsed) = try_direct_parse(raw) {
        if let Some(shaped) = finish(parsed, schema) {
            return shaped;
        }
    }

    if let Some(fenced) = extract_code_fence(raw) {
        if let Some(parsed) = try_direct_parse(&fenced) {
            if let Some(shaped) = finish(parsed, schema) {
                return shaped;
            }
        }
    }

    if let Some(candidate) = first_balanced_object(raw).or_else(|| first_balanced_array(raw)) {
        if let Some(parsed) = try_direct_parse(&candidate) {
            if let Some(shaped) = finish(parsed, schema) {
                return shaped;
            }
        }

        let repaired_text = fix_common_json_errors(&candidate);
        if let Some(parsed) = try_direct_parse(&repaired_text) {
            if let Some(shaped) = finish(parsed, schema) {
                return shaped;
            }
        }
    }

    if let Some(nested) = balanced_brace_scan(raw) {
        if let Some(parsed) = try_direct_parse(&nested) {
            if let Some(shaped) = finish(parsed, schema) {
                return shaped;
            }
        }

        let balanced = balance_braces(&nested);
        if let Some(parsed) = try_direct_parse(&balanced) {
            if let Some(shaped) = finish(parsed, schema) {
                return shaped;
            }
        }
    }

    if let Some(promoted) = promote_simple_value(raw, schema) {
        if let Some(shaped) = finish(promoted, schema) {
            return shaped;
        }
    }

    if let Some(restater) = restater {
        if let Some(restated) = restater.restate(raw, schema).await {
            if let Some(parsed) = try_direct_parse(&restated) {
                if let Some(shaped) = finish(parsed, schema) {
                    return shaped;
                }
            }
        }
    }

    warn!("output shaping exhausted every strategy; falling back to raw_content");
    fallback(raw, Vec::new())
}

/// Validate the parsed candidate; on failure, attempt one `repair` pass
/// (step 5's "validate+repair") and re-validate before giving up on this
/// candidate entirely.
fn finish(parsed: JsonValue, schema: &JsonValue) -> Option<Shaped> {
    let issues = validate(&parsed, schema);
    if issues.is_empty() {
        return Some(Shaped {
            data: to_map(parsed),
            issues: Vec::new(),
        });
    }

    let repaired = repair(&parsed, schema);
    let repaired_issues = validate(&repaired, schema);
    if repaired_issues.is_empty() {
        Some(Shaped {
            data: to_map(repaired),
            issues: Vec::new(),
        })
    } else {
        None
    }
}

fn to_map(parsed: JsonValue) -> IndexMap<String, Value> {
    match Value::from_json(parsed) {
        Value::Map(map) => map,
        other => {
            let mut map = IndexMap::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn fallback(raw: &str, issues: Vec<ValidationIssue>) -> Shaped {
    let mut data = IndexMap::new();
    data.insert("raw_content".to_string(), Value::String(raw.to_string()));
    Shaped { data, issues }
}

fn try_direct_parse(text: &str) -> Option<JsonValue> {
    serde_json::from_str(text.trim()).ok()
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

fn extract_code_fence(text: &str) -> Option<String> {
    CODE_FENCE.captures(text).map(|c| c[1].trim().to_string())
}

fn first_balanced_object(text: &str) -> Option<String> {
    first_balanced_span(text, '{', '}')
}

fn first_balanced_array(text: &str) -> Option<String> {
    first_balanced_span(text, '[', ']')
}

fn first_balanced_span(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(text[start..start + offset + ch.len_utf8()].to_string());
            }
        }
    }
    None
}

/// Balanced-brace scan for the first well-nested object, tolerating an
/// unbalanced tail (step 5); distinct from `first_balanced_object` in that
/// it returns the best partial match rather than `None` on imbalance.
fn balanced_brace_scan(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}');
    match end {
        Some(end) if end > start => Some(text[start..=end].to_string()),
        _ => Some(format!("{}}}", &text[start..])),
    }
}

fn balance_braces(text: &str) -> String {
    let opening = text.matches('{').count();
    let closing = text.matches('}').count();
    if opening > closing {
        format!("{text}{}", "}".repeat(opening - closing))
    } else if closing > opening {
        format!("{}{text}", "{".repeat(closing - opening))
    } else {
        text.to_string()
    }
}

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"//[^\n]*").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static SINGLE_QUOTED_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"'([^']*)'\s*:").unwrap());
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Common-error repair (step 4): strip comments, quote bare/single-quoted
/// keys, drop trailing commas.
fn fix_common_json_errors(text: &str) -> String {
    let without_line_comments = LINE_COMMENT.replace_all(text, "");
    let without_comments = BLOCK_COMMENT.replace_all(&without_line_comments, "");
    let quoted_keys = SINGLE_QUOTED_KEY.replace_all(&without_comments, "\"$1\":");
    let bare_keys_quoted = BARE_KEY.replace_all(&quoted_keys, "$1\"$2\":");
    TRAILING_COMMA.replace_all(&bare_keys_quoted, "$1").to_string()
}

/// Simple-value promotion (step 7): if the schema requires exactly one
/// property and the text is a bare scalar, coerce and wrap.
fn promote_simple_value(text: &str, schema: &JsonValue) -> Option<JsonValue> {
    let required = schema.get("required")?.as_array()?;
    if required.len() != 1 {
        return None;
    }
    let property_name = required[0].as_str()?;
    let property_schema = schema.get("properties")?.get(property_name)?;
    let property_type = property_schema.get("type").and_then(JsonValue::as_str)?;
    let trimmed = text.trim();

    let coerced = match property_type {
        "string" => JsonValue::String(trimmed.trim_matches('"').to_string()),
        "integer" => JsonValue::from(trimmed.parse::<i64>().ok()?),
        "number" => serde_json::Number::from_f64(trimmed.parse::<f64>().ok()?)
            .map(JsonValue::Number)?,
        "boolean" => JsonValue::Bool(trimmed.parse::<bool>().ok()?),
        _ => return None,
    };

    let mut obj = serde_json::Map::new();
    obj.insert(property_name.to_string(), coerced);
    Some(JsonValue::Object(obj))
}
