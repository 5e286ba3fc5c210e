//! Router assembly, mirroring the shape of the teacher's `build_v1_router`
//! scaled down to one engine instance instead of an `InstanceRegistry`.

use super::handlers::{self, SharedEngine};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

pub fn build_router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/registries", get(handlers::registry_summary))
        .route("/recipes/run", post(handlers::run_recipe))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}
