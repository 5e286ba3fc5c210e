//! Read-only HTTP inspection surface (SPEC_FULL.md §A6), feature-gated
//! behind `http-api` and off by default at the handler level — nothing in
//! this module can mutate a `RecipeEngine`, it only runs recipes and
//! reports registry contents, mirroring the teacher's `api/v1` shape at a
//! scale that fits one engine instead of a multi-instance server.

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::build_router;
