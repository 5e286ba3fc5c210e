//! Request/response DTOs for the inspection API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RegistrySummaryResponse {
    pub link_handler_types: Vec<String>,
    pub schema_names: Vec<String>,
    pub domain_names: Vec<String>,
}

/// Body of `POST /recipes/run`: a recipe document plus an optional
/// execution deadline. The recipe is parsed and executed synchronously;
/// the response carries the finished execution context (spec.md §3.4).
/// When `deadline_seconds` is set, the run's `CancellationToken` is
/// cancelled once it elapses, the same cooperative shutdown the executor
/// already races against (C6).
#[derive(Debug, Deserialize)]
pub struct RunRecipeRequest {
    pub recipe_yaml: String,
    #[serde(default)]
    pub deadline_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RunRecipeResponse {
    pub context: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
