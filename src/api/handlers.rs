//! Handler functions for the inspection API.

use super::models::{ErrorResponse, HealthResponse, RegistrySummaryResponse, RunRecipeRequest, RunRecipeResponse};
use crate::builder::RecipeEngine;
use crate::recipe::Recipe;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type SharedEngine = Arc<RecipeEngine>;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn registry_summary(State(engine): State<SharedEngine>) -> Json<RegistrySummaryResponse> {
    let registries = engine.registries();
    Json(RegistrySummaryResponse {
        link_handler_types: registries.link_handler_types().into_iter().map(str::to_string).collect(),
        schema_names: registries.schema_names().into_iter().map(str::to_string).collect(),
        domain_names: registries.domain_names().into_iter().map(str::to_string).collect(),
    })
}

/// Parse and run a recipe to completion, returning its finished execution
/// context (spec.md §3.4, §4.6). Synchronous: the request is held open for
/// the life of the run, matching the scoped-down read-only surface this
/// API provides (no background job tracking).
pub async fn run_recipe(State(engine): State<SharedEngine>, Json(body): Json<RunRecipeRequest>) -> Response {
    let recipe = match Recipe::from_yaml(&body.recipe_yaml) {
        Ok(recipe) => recipe,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e.to_string() })).into_response();
        }
    };

    let token = CancellationToken::new();
    if let Some(seconds) = body.deadline_seconds {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
            token.cancel();
        });
    }

    match engine.run(&recipe, token).await {
        Ok(result) => (
            StatusCode::OK,
            Json(RunRecipeResponse {
                context: result.context.to_json(),
            }),
        )
            .into_response(),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}
