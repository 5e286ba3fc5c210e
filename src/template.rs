//! Placeholder template engine (spec.md §4.3 / C3).
//!
//! Placeholders have the form `{{ dotted.path }}`. Resolution walks the
//! execution context by key; a failed walk renders as empty string plus a
//! trace event rather than failing the whole render. This is intentionally
//! not built on a general templating crate (see SPEC_FULL.md §4.3) — the
//! typed-value-passthrough behavior for a field that is *exactly* one
//! placeholder is specific to this engine's contract.

use crate::value::Value;
use log::trace;

/// One resolution miss recorded during a render, surfaced to callers that
/// want to report warnings (spec.md §7 "Resolution" error kind).
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub path: String,
}

/// Result of rendering a string field: the textual form plus any typed
/// value recovered when the whole field was a single placeholder.
pub struct Rendered {
    pub text: String,
    pub typed: Option<Value>,
    pub trace: Vec<TraceEvent>,
}

/// Render all `{{ ... }}` placeholders in `input` against `context`.
///
/// If `input` is (after trimming) exactly one placeholder, the resolved
/// value's type is preserved in `Rendered::typed` so that numeric/boolean
/// context values survive into downstream handler config (spec.md §4.3).
pub fn render(input: &str, context: &Value) -> Rendered {
    let spans = find_placeholders(input);
    let mut trace_events = Vec::new();

    if spans.len() == 1 && spans[0].0 == 0 && spans[0].1 == input.len() {
        let path = &spans[0].2;
        let resolved = resolve_path(context, path);
        return match resolved {
            Some(value) => Rendered {
                text: value.render_text(),
                typed: Some(value.clone()),
                trace: trace_events,
            },
            None => {
                trace!("unresolved placeholder path: {path}");
                trace_events.push(TraceEvent { path: path.clone() });
                Rendered {
                    text: String::new(),
                    typed: None,
                    trace: trace_events,
                }
            }
        };
    }

    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;
    for (start, end, path) in &spans {
        output.push_str(&input[cursor..*start]);
        match resolve_path(context, path) {
            Some(value) => output.push_str(&unquote_if_needed(&value.render_text())),
            None => {
                trace!("unresolved placeholder path: {path}");
                trace_events.push(TraceEvent { path: path.clone() });
            }
        }
        cursor = *end;
    }
    output.push_str(&input[cursor..]);

    Rendered {
        text: output,
        typed: None,
        trace: trace_events,
    }
}

/// Every placeholder's dotted path appearing in `input`, in order of
/// first appearance. Used by the `sql` link (parameterization) and the
/// executor's dependency-graph scan (spec.md §4.6 step 2), both of which
/// need the raw paths without triggering a render.
pub fn placeholder_paths(input: &str) -> Vec<String> {
    find_placeholders(input).into_iter().map(|(_, _, path)| path).collect()
}

/// Find `{{ ... }}` spans, returning `(start, end, dotted_path)` triples.
/// Double-brace is the only placeholder syntax (spec.md §4.3).
fn find_placeholders(input: &str) -> Vec<(usize, usize, String)> {
    let bytes = input.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if let Some(close) = input[i + 2..].find("}}") {
                let inner_start = i + 2;
                let inner_end = i + 2 + close;
                let path = input[inner_start..inner_end].trim().to_string();
                spans.push((i, inner_end + 2, path));
                i = inner_end + 2;
                continue;
            }
        }
        i += 1;
    }
    spans
}

fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return None;
    }
    context.walk(&segments)
}

/// Strip a matching pair of leading/trailing quotes, per spec.md §4.3
/// ("strings starting with a matching pair of quotes are unquoted").
fn unquote_if_needed(text: &str) -> String {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return text[1..text.len() - 1].to_string();
        }
    }
    text.to_string()
}

/// Evaluate a rendered `condition` string for truthiness (spec.md §3.2).
/// An empty string is falsey (spec.md §8 boundary behaviour).
pub fn is_condition_truthy(rendered_text: &str) -> bool {
    if rendered_text.is_empty() {
        return false;
    }
    Value::String(rendered_text.to_string()).is_truthy_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn ctx_with(key: &str, value: Value) -> Value {
        let mut map = IndexMap::new();
        map.insert(key.to_string(), value);
        Value::Map(map)
    }

    #[test]
    fn missing_path_renders_empty_string() {
        let ctx = ctx_with("A_output", Value::Map(IndexMap::new()));
        let rendered = render("{{ A_output.data.missing }}", &ctx);
        assert_eq!(rendered.text, "");
        assert_eq!(rendered.trace.len(), 1);
    }

    #[test]
    fn whole_field_placeholder_preserves_type() {
        let mut data = IndexMap::new();
        data.insert("go".to_string(), Value::Bool(true));
        let mut output = IndexMap::new();
        output.insert("data".to_string(), Value::Map(data));
        let ctx = ctx_with("Prev_output", Value::Map(output));

        let rendered = render("{{ Prev_output.data.go }}", &ctx);
        assert_eq!(rendered.typed, Some(Value::Bool(true)));
        assert_eq!(rendered.text, "true");
    }

    #[test]
    fn embedded_placeholder_is_stringified() {
        let mut data = IndexMap::new();
        data.insert("n".to_string(), Value::Int(3));
        let mut output = IndexMap::new();
        output.insert("data".to_string(), Value::Map(data));
        let ctx = ctx_with("Prev_output", Value::Map(output));

        let rendered = render("value is {{ Prev_output.data.n }}!", &ctx);
        assert_eq!(rendered.text, "value is 3!");
        assert_eq!(rendered.typed, None);
    }

    #[test]
    fn deterministic_rendering() {
        let ctx = ctx_with("A_output", Value::String("x".to_string()));
        let a = render("{{ A_output }}", &ctx).text;
        let b = render("{{ A_output }}", &ctx).text;
        assert_eq!(a, b);
    }

    #[test]
    fn condition_empty_string_is_falsey() {
        assert!(!is_condition_truthy(""));
    }
}
