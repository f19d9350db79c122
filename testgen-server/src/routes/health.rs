//! Health check endpoint

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let sandbox = state.orchestrator.sandbox();
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sandbox": {
            "runtime": sandbox.runtime_name(),
            "availableSlots": sandbox.available_slots(),
            "maxConcurrent": sandbox.max_concurrent(),
        },
    }))
}
