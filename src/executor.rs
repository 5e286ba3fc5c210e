//! Recipe executor (spec.md §4.6 / C6).
//!
//! Loads a recipe, builds a dependency graph for cycle detection only
//! (links still run in declaration order — spec.md §4.6 "Ordering"),
//! then executes each link in turn: evaluate `condition`, render the
//! declaration's fields, invoke the handler, shape and store the output.

use crate::links::{HandlerError, LinkContext, LinkHandler};
use crate::recipe::{LinkDecl, Recipe};
use crate::registries::Registries;
use crate::shaper::{self, Restater};
use crate::storage::Repository;
use crate::template;
use crate::value::{LinkOutput, Message, Value};
use indexmap::IndexMap;
use log::{info, warn};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Configuration/cycle errors are fatal before any link runs (spec.md §7).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("unknown link type '{0}' for link '{1}'")]
    UnknownLinkType(String, String),
    #[error("dependency cycle detected: {}", .0.join(" → "))]
    Cycle(Vec<String>),
}

/// `{raw, data}` per link, plus the reserved metadata entry and the
/// conversation logs that persisted for the run (spec.md §3.4).
pub struct ExecutionResult {
    pub context: Value,
    pub conversations: IndexMap<String, Vec<Message>>,
}

pub const METADATA_KEY: &str = "_recipe_metadata";

pub struct Executor {
    registries: Arc<Registries>,
    repository: Option<Arc<Repository>>,
    restater: Option<Arc<dyn Restater>>,
    /// Opt-in: downgrade-to-`raw_content` shaping failures become a
    /// per-link error instead of silently succeeding (spec.md §9 Open
    /// Question "strict mode", resolved in DESIGN.md). Default `false`.
    strict: bool,
}

impl Executor {
    pub fn new(registries: Arc<Registries>) -> Self {
        Self {
            registries,
            repository: None,
            restater: None,
            strict: false,
        }
    }

    pub fn with_repository(mut self, repository: Arc<Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_restater(mut self, restater: Arc<dyn Restater>) -> Self {
        self.restater = Some(restater);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub async fn execute(
        &self,
        recipe: &Recipe,
        cancellation: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        for link in &recipe.links {
            if self.registries.get_link_handler(&link.kind).is_none() {
                return Err(ExecutorError::UnknownLinkType(link.kind.clone(), link.name.clone()));
            }
        }

        let graph = build_dependency_graph(&recipe.links);
        if let Some(cycle) = detect_cycle(&graph, &recipe.links) {
            return Err(ExecutorError::Cycle(cycle));
        }

        let mut context = Value::Map(IndexMap::new());
        let conversations = tokio::sync::Mutex::new(IndexMap::new());
        let mut completed_links = 0usize;

        'links: for link in &recipe.links {
            if let Some(condition) = &link.condition {
                let rendered = template::render(condition, &context);
                log_trace(&rendered.trace);
                if !template::is_condition_truthy(&rendered.text) {
                    info!("link '{}' skipped: condition evaluated to falsey", link.name);
                    continue;
                }
            }

            let rendered_config = self.render_link_config(link, &context);
            let handler = self
                .registries
                .get_link_handler(&link.kind)
                .expect("presence checked in pre-flight pass above");

            let link_ctx = LinkContext {
                context: &context,
                registries: &self.registries,
                conversations: &conversations,
                repository: self.repository.as_deref(),
            };

            let outcome = tokio::select! {
                _ = cancellation.cancelled() => Err(HandlerError::Cancelled),
                result = handler.execute(&rendered_config, &link_ctx) => result,
            };

            let output = match outcome {
                Ok(output) => self.shape_if_declared(output, link).await,
                Err(HandlerError::Terminate) => {
                    info!("link '{}' invoked recipe termination", link.name);
                    break 'links;
                }
                Err(HandlerError::Cancelled) => {
                    warn!("recipe cancelled during link '{}'", link.name);
                    let output = LinkOutput::error("cancelled");
                    store_output(&mut context, link, output);
                    completed_links += 1;
                    break 'links;
                }
                Err(e) => {
                    warn!("link '{}' failed: {e}", link.name);
                    LinkOutput::error(e.to_string())
                }
            };

            store_output(&mut context, link, output);
            completed_links += 1;
        }

        let mut metadata = IndexMap::new();
        metadata.insert("name".to_string(), Value::String(recipe.name.clone()));
        metadata.insert("version".to_string(), Value::String(recipe.version.clone()));
        metadata.insert("link_count".to_string(), Value::Int(recipe.links.len() as i64));
        metadata.insert("completed_links".to_string(), Value::Int(completed_links as i64));
        if let Value::Map(map) = &mut context {
            map.insert(METADATA_KEY.to_string(), Value::Map(metadata));
        }

        Ok(ExecutionResult {
            context,
            conversations: conversations.into_inner(),
        })
    }

    /// Render every string field of `link`'s config through the template
    /// engine, except `sql.query` which the `sql` handler parameterizes
    /// itself (spec.md §4.4, §4.6 step 4b).
    fn render_link_config(&self, link: &LinkDecl, context: &Value) -> JsonValue {
        let raw_config = link.config_as_json();
        let mut rendered = render_json(&raw_config, context);

        if link.kind == "sql" {
            if let Some(original_query) = link.config.get("query").cloned() {
                if let JsonValue::Object(obj) = &mut rendered {
                    obj.insert("query".to_string(), original_query);
                }
            }
        }

        rendered
    }

    async fn shape_if_declared(&self, output: LinkOutput, link: &LinkDecl) -> LinkOutput {
        let Some(declared) = &link.output_schema else {
            return output;
        };
        let schema = crate::schema::resolve_schema_reference(declared, |name| {
            self.registries.get_schema(name).cloned()
        });
        let shaped = shaper::shape(&output.raw, &schema, self.restater.as_deref()).await;

        if self.strict && shaped.data.len() == 1 && shaped.data.contains_key("raw_content") {
            return LinkOutput::error("output shaping could not satisfy output_schema (strict mode)");
        }
        LinkOutput::new(output.raw, shaped.data)
    }
}

fn store_output(context: &mut Value, link: &LinkDecl, output: LinkOutput) {
    if let Value::Map(map) = context {
        map.insert(link.context_key(), output.as_context_value());
    }
}

fn log_trace(trace: &[template::TraceEvent]) {
    for event in trace {
        warn!("unresolved placeholder: {}", event.path);
    }
}

fn render_json(value: &JsonValue, context: &Value) -> JsonValue {
    match value {
        JsonValue::String(s) => {
            let rendered = template::render(s, context);
            log_trace(&rendered.trace);
            match rendered.typed {
                Some(typed) => typed.to_json(),
                None => JsonValue::String(rendered.text),
            }
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(|v| render_json(v, context)).collect()),
        JsonValue::Object(map) => {
            JsonValue::Object(map.iter().map(|(k, v)| (k.clone(), render_json(v, context))).collect())
        }
        other => other.clone(),
    }
}

/// `this → OtherLink` edges inferred from any `{{ OtherLink_output... }}`
/// occurrence in a link's declaration (spec.md §4.6 step 2).
fn build_dependency_graph(links: &[LinkDecl]) -> IndexMap<String, Vec<String>> {
    let names: std::collections::HashSet<&str> = links.iter().map(|l| l.name.as_str()).collect();
    let mut graph = IndexMap::new();
    for link in links {
        let mut referenced = Vec::new();
        if let Some(condition) = &link.condition {
            collect_references(&JsonValue::String(condition.clone()), &names, &mut referenced);
        }
        collect_references(&link.config_as_json(), &names, &mut referenced);
        graph.insert(link.name.clone(), referenced);
    }
    graph
}

fn collect_references(value: &JsonValue, names: &std::collections::HashSet<&str>, out: &mut Vec<String>) {
    match value {
        JsonValue::String(s) => {
            for path in template::placeholder_paths(s) {
                // Supplemental `{{ref: Other.data.x}}` form (spec.md §9 Open
                // Question, resolved in DESIGN.md): more robust than the
                // bare textual scan below since it can't be fooled by a
                // coincidental `Name_output` substring.
                let path = path.trim();
                if let Some(rest) = path.strip_prefix("ref:") {
                    if let Some(candidate) = rest.trim().split('.').next() {
                        if names.contains(candidate) && !out.iter().any(|n| n == candidate) {
                            out.push(candidate.to_string());
                        }
                    }
                    continue;
                }

                if let Some(first_segment) = path.split('.').next() {
                    if let Some(candidate) = first_segment.strip_suffix("_output") {
                        if names.contains(candidate) && !out.iter().any(|n| n == candidate) {
                            out.push(candidate.to_string());
                        }
                    }
                }
            }
        }
        JsonValue::Array(items) => items.iter().for_each(|v| collect_references(v, names, out)),
        JsonValue::Object(map) => map.values().for_each(|v| collect_references(v, names, out)),
        _ => {}
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-colour DFS cycle detection (spec.md §4.6 step 3, §9). Returns the
/// cycle path (e.g. `A → B → A`) on the first back-edge found, visiting
/// links in declaration order so the reported cycle is deterministic.
fn detect_cycle(graph: &IndexMap<String, Vec<String>>, links: &[LinkDecl]) -> Option<Vec<String>> {
    let mut colors: HashMap<&str, Color> = graph.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut path = Vec::new();

    for link in links {
        if colors.get(link.name.as_str()) == Some(&Color::White) {
            if let Some(cycle) = visit(&link.name, graph, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    graph: &'a IndexMap<String, Vec<String>>,
    colors: &mut HashMap<&'a str, Color>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    colors.insert(node, Color::Gray);
    path.push(node.to_string());

    if let Some(neighbors) = graph.get(node) {
        for neighbor in neighbors {
            match colors.get(neighbor.as_str()) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|n| n == neighbor).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(neighbor.clone());
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = visit(neighbor, graph, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }
    }

    path.pop();
    colors.insert(node, Color::Black);
    None
}
