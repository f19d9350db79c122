//! API routes

pub mod generate;
pub mod health;
pub mod run;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the API router with CORS and request tracing
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate-tests", post(generate::generate_tests))
        .route("/api/run-tests", post(run::run_tests))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
