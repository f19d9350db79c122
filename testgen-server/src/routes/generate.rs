//! Test generation endpoint

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;
use testgen_core::{GenerateResponse, GenerationRequest};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTestsBody {
    #[serde(default, alias = "sourceCode")]
    pub code: String,
    #[serde(default)]
    pub use_case: String,
    #[serde(default)]
    pub run_after_generate: bool,
}

/// POST /api/generate-tests
pub async fn generate_tests(
    State(state): State<AppState>,
    body: Result<Json<GenerateTestsBody>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(body) = body?;
    let request = GenerationRequest::new(body.code, body.use_case, body.run_after_generate);
    let response = state.orchestrator.generate_tests(request).await?;
    Ok(Json(response))
}
