//! `sql` link handler (spec.md §4.4).
//!
//! Placeholders inside the query text are **parameterized**, never
//! textually substituted: the executor leaves a `sql` link's `query`
//! field unrendered (spec.md §4.6 step 4b special-case) and this handler
//! resolves each `{{ path }}` itself, binding the value positionally and
//! replacing the placeholder with a `?` marker before the query reaches
//! `sqlx`.

use super::{HandlerError, LinkContext};
use crate::template::placeholder_paths;
use crate::value::{LinkOutput, Value};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Column, Row};
use std::path::Path;

#[derive(Default)]
pub struct SqlLinkHandler;

#[async_trait]
impl super::LinkHandler for SqlLinkHandler {
    async fn execute(
        &self,
        config: &JsonValue,
        ctx: &LinkContext<'_>,
    ) -> Result<LinkOutput, HandlerError> {
        let query_field = config
            .get("query")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| HandlerError::Configuration("'query' is required".to_string()))?;
        let database_url = config
            .get("database_url")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| HandlerError::Configuration("'database_url' is required".to_string()))?;

        let query_text = if Path::new(query_field).extension().is_some_and(|ext| ext == "sql")
            && Path::new(query_field).is_file()
        {
            std::fs::read_to_string(query_field)
                .map_err(|e| HandlerError::Io(format!("failed to read query file: {e}")))?
        } else {
            query_field.to_string()
        };

        let (parameterized, bindings) = parameterize(&query_text, ctx.context);

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(|e| HandlerError::Io(format!("database connection failed: {e}")))?;

        let mut statement = sqlx::query(&parameterized);
        for value in &bindings {
            statement = bind_value(statement, value);
        }

        let rows = statement
            .fetch_all(&pool)
            .await
            .map_err(|e| HandlerError::Io(format!("query execution failed: {e}")))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let row_values: Vec<Value> = rows.iter().map(row_to_value).collect();
        let row_count = row_values.len();

        let mut data = IndexMap::new();
        data.insert("rows".to_string(), Value::List(row_values));
        let mut metadata = IndexMap::new();
        metadata.insert("query".to_string(), Value::String(parameterized.clone()));
        metadata.insert("row_count".to_string(), Value::Int(row_count as i64));
        metadata.insert(
            "columns".to_string(),
            Value::List(columns.into_iter().map(Value::String).collect()),
        );
        metadata.insert("query_type".to_string(), Value::String(query_type(&query_text)));
        data.insert("metadata".to_string(), Value::Map(metadata));

        let raw = serde_json::to_string(&data.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<serde_json::Map<_, _>>())
            .unwrap_or_default();
        Ok(LinkOutput::new(raw, data))
    }

    fn schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "required": ["query", "database_url"],
            "properties": {
                "query": {"type": "string"},
                "database_url": {"type": "string"}
            }
        })
    }
}

fn query_type(query_text: &str) -> String {
    query_text
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Replace every `{{ path }}` occurrence with `?` (sqlx's Any driver's
/// universal positional marker), in order, collecting the resolved
/// context values as bind parameters.
fn parameterize(query_text: &str, context: &Value) -> (String, Vec<Value>) {
    let paths = placeholder_paths(query_text);
    let mut bindings = Vec::with_capacity(paths.len());
    let mut result = String::with_capacity(query_text.len());
    let mut cursor = 0;
    let bytes = query_text.as_bytes();
    let mut path_iter = paths.iter();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            if let Some(close) = query_text[i + 2..].find("}}") {
                let end = i + 2 + close + 2;
                result.push_str(&query_text[cursor..i]);
                result.push('?');
                if let Some(path) = path_iter.next() {
                    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
                    bindings.push(context.walk(&segments).cloned().unwrap_or(Value::Null));
                }
                cursor = end;
                i = end;
                continue;
            }
        }
        i += 1;
    }
    result.push_str(&query_text[cursor..]);
    (result, bindings)
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.render_text()),
    }
}

fn row_to_value(row: &AnyRow) -> Value {
    let mut map = IndexMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = row
            .try_get::<i64, _>(idx)
            .map(Value::Int)
            .or_else(|_| row.try_get::<f64, _>(idx).map(Value::Float))
            .or_else(|_| row.try_get::<bool, _>(idx).map(Value::Bool))
            .or_else(|_| row.try_get::<String, _>(idx).map(Value::String))
            .unwrap_or(Value::Null);
        map.insert(column.name().to_string(), value);
    }
    Value::Map(map)
}
