//! Test execution endpoint

use std::time::Duration;

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;
use testgen_core::{RunRequest, RunResponse};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTestsBody {
    #[serde(default, alias = "sourceCode")]
    pub code: String,
    #[serde(default, alias = "testCode")]
    pub tests: String,
    /// Sandbox wall-clock budget; the configured maximum still applies
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// POST /api/run-tests
pub async fn run_tests(
    State(state): State<AppState>,
    body: Result<Json<RunTestsBody>, JsonRejection>,
) -> Result<Json<RunResponse>, ApiError> {
    let Json(body) = body?;
    let mut request = RunRequest::new(body.code, body.tests);
    if let Some(ms) = body.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }
    let response = state.orchestrator.run_tests(request).await?;
    Ok(Json(response))
}
