//! Schema registry and validator (spec.md §4.2 / C2).
//!
//! Validation and repair are written directly against `serde_json::Value`
//! rather than pulled in from a general JSON-Schema crate: `repair` in
//! particular is a bespoke defensive transform (spec.md §4.2) with no
//! standard-library equivalent, and the validation surface the engine
//! needs (`type`, `required`, `properties`, `items`) is small enough that
//! hand-rolling it keeps the two operations sharing one schema walk.
//! Grounded on `storage/utils.py::repair_entry` and
//! `core/schema/extension.py` from the original implementation.

use serde_json::{json, Value};

/// A single schema validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Validate `value` against `schema`, returning every issue found (empty
/// means valid). Supports `type`, `required`, `properties`, `items`, and
/// `enum` — the subset the engine's output-shaping pipeline relies on.
pub fn validate(value: &Value, schema: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    validate_at("$", value, schema, &mut issues);
    issues
}

fn validate_at(path: &str, value: &Value, schema: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(expected_type) = schema_obj.get("type").and_then(Value::as_str) {
        if !matches_type(value, expected_type) {
            issues.push(ValidationIssue {
                path: path.to_string(),
                message: format!("expected type '{expected_type}', got {}", type_name(value)),
            });
            return;
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            issues.push(ValidationIssue {
                path: path.to_string(),
                message: "value is not one of the allowed enum values".to_string(),
            });
        }
    }

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required {
            if let Some(name) = field.as_str() {
                if value.get(name).is_none() {
                    issues.push(ValidationIssue {
                        path: format!("{path}.{name}"),
                        message: "required property missing".to_string(),
                    });
                }
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        if let Some(obj) = value.as_object() {
            for (name, sub_schema) in properties {
                if let Some(sub_value) = obj.get(name) {
                    validate_at(&format!("{path}.{name}"), sub_value, sub_schema, issues);
                }
            }
        }
    }

    if let Some(items_schema) = schema_obj.get("items") {
        if let Some(items) = value.as_array() {
            for (i, item) in items.iter().enumerate() {
                validate_at(&format!("{path}[{i}]"), item, items_schema, issues);
            }
        }
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Defensive repair: for every required property absent from `value`,
/// insert a type-appropriate zero value; recurse into nested object
/// properties. Never removes a field already present (spec.md §4.2).
pub fn repair(value: &Value, schema: &Value) -> Value {
    let mut repaired = value.clone();
    repair_in_place(&mut repaired, schema);
    repaired
}

fn repair_in_place(value: &mut Value, schema: &Value) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if !value.is_object() {
        *value = json!({});
    }
    let obj = value.as_object_mut().expect("coerced to object above");

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            if !obj.contains_key(name) {
                let default = schema_obj
                    .get("properties")
                    .and_then(|p| p.get(name))
                    .map(zero_value_for_schema)
                    .unwrap_or(Value::Null);
                obj.insert(name.to_string(), default);
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        for (name, sub_schema) in properties {
            if let Some(existing) = obj.get_mut(name) {
                if sub_schema.get("type").and_then(Value::as_str) == Some("object") {
                    repair_in_place(existing, sub_schema);
                } else if is_datetime_like(name) {
                    coerce_datetime(existing);
                }
            }
        }
    }
}

fn zero_value_for_schema(schema: &Value) -> Value {
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => json!({}),
        Some("array") => json!([]),
        Some("string") => json!(""),
        Some("integer") | Some("number") => json!(0),
        Some("boolean") => json!(false),
        _ => Value::Null,
    }
}

fn is_datetime_like(field_name: &str) -> bool {
    let lower = field_name.to_ascii_lowercase();
    lower.ends_with("_at") || lower.ends_with("_time") || lower == "timestamp"
}

/// Coerce a datetime-like field to an ISO-8601 string in place, mirroring
/// `storage/utils.py`'s `repaired[field] = repaired[field].isoformat()`.
/// A numeric value is read as a Unix timestamp (seconds, or milliseconds
/// when large enough that seconds would overflow a sane calendar date); a
/// string that doesn't already parse as RFC 3339 is left untouched rather
/// than guessed at.
fn coerce_datetime(value: &mut Value) {
    let formatted = match value {
        Value::Number(n) => {
            let millis = n.as_i64().map(|seconds_as_millis_guard| {
                if seconds_as_millis_guard.abs() > 10_000_000_000 {
                    seconds_as_millis_guard
                } else {
                    seconds_as_millis_guard * 1000
                }
            });
            millis.and_then(chrono::DateTime::from_timestamp_millis).map(|dt| dt.to_rfc3339())
        }
        Value::String(s) => {
            if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
                None
            } else {
                chrono::DateTime::parse_from_rfc2822(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&chrono::Utc).to_rfc3339())
            }
        }
        _ => None,
    };
    if let Some(formatted) = formatted {
        *value = Value::String(formatted);
    }
}

/// Resolve an `output_schema` that uses `$ref` or `base` composition
/// against the schema registry, merging overrides the way
/// `core/schema/extension.py::apply_schema_reference` / `extend_schema` do
/// (SPEC_FULL.md §4.2 — supplemented from the original implementation).
pub fn resolve_schema_reference(
    declared: &Value,
    lookup: impl Fn(&str) -> Option<Value>,
) -> Value {
    let Some(obj) = declared.as_object() else {
        return declared.clone();
    };

    if let Some(Value::String(r#ref)) = obj.get("$ref") {
        let mut resolved = lookup(r#ref).unwrap_or_else(|| json!({"type": "object", "properties": {}}));
        if let Some(resolved_obj) = resolved.as_object_mut() {
            for (k, v) in obj {
                if k != "$ref" {
                    resolved_obj.insert(k.clone(), v.clone());
                }
            }
        }
        return resolved;
    }

    if let Some(Value::String(base_ref)) = obj.get("base") {
        let base = lookup(base_ref).unwrap_or_else(|| json!({"type": "object", "properties": {}}));
        return extend_schema(base, declared);
    }

    declared.clone()
}

fn extend_schema(mut base: Value, extensions: &Value) -> Value {
    let Some(ext_obj) = extensions.as_object() else {
        return base;
    };
    let base_obj = base.as_object_mut().expect("schema must be an object");

    if let Some(extra_props) = ext_obj.get("properties").and_then(Value::as_object) {
        let props = base_obj
            .entry("properties")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .expect("properties must be an object");
        for (k, v) in extra_props {
            props.insert(k.clone(), v.clone());
        }
    }

    if let Some(extra_required) = ext_obj.get("required").and_then(Value::as_array) {
        let required = base_obj
            .entry("required")
            .or_insert_with(|| json!([]))
            .as_array_mut()
            .expect("required must be an array");
        for field in extra_required {
            if !required.contains(field) {
                required.push(field.clone());
            }
        }
    }

    for (k, v) in ext_obj {
        if k != "properties" && k != "required" && k != "base" {
            base_obj.insert(k.clone(), v.clone());
        }
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_detects_missing_required() {
        let schema = json!({"type": "object", "required": ["answer"], "properties": {"answer": {"type": "string"}}});
        let issues = validate(&json!({}), &schema);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].path.ends_with("answer"));
    }

    #[test]
    fn validate_well_formed_roundtrips_clean() {
        let schema = json!({"type": "object", "required": ["n"], "properties": {"n": {"type": "integer"}}});
        let value = json!({"n": 3});
        assert!(validate(&value, &schema).is_empty());
    }

    #[test]
    fn repair_inserts_zero_values_without_removing_existing() {
        let schema = json!({
            "type": "object",
            "required": ["answer", "confidence"],
            "properties": {"answer": {"type": "string"}, "confidence": {"type": "number"}}
        });
        let value = json!({"answer": "Paris"});
        let repaired = repair(&value, &schema);
        assert_eq!(repaired["answer"], json!("Paris"));
        assert_eq!(repaired["confidence"], json!(0));
    }

    #[test]
    fn resolve_ref_merges_overrides() {
        let schema_store = |name: &str| -> Option<Value> {
            if name == "users.profile" {
                Some(json!({"type": "object", "properties": {"name": {"type": "string"}}}))
            } else {
                None
            }
        };
        let declared = json!({"$ref": "users.profile", "description": "override"});
        let resolved = resolve_schema_reference(&declared, schema_store);
        assert_eq!(resolved["description"], json!("override"));
        assert!(resolved["properties"]["name"].is_object());
    }
}
