//! HTTP error responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use testgen_core::{OrchestratorError, Stage};

#[derive(Debug)]
pub enum ApiError {
    /// Body could not be read as JSON
    BadRequest(String),
    /// The pipeline failed at some stage
    Pipeline(OrchestratorError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(e) => match e {
                OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
                _ if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
                OrchestratorError::Generation(_) => StatusCode::BAD_GATEWAY,
                OrchestratorError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ if e.is_busy() => StatusCode::SERVICE_UNAVAILABLE,
                OrchestratorError::Sandbox(_) => StatusCode::INTERNAL_SERVER_ERROR,
                OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }

    fn stage(&self) -> Stage {
        match self {
            ApiError::BadRequest(_) => Stage::Validation,
            ApiError::Pipeline(e) => e.stage(),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Pipeline(e) => e.public_message(),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            if let ApiError::Pipeline(e) = &self {
                tracing::error!(status = status.as_u16(), stage = %e.stage(), error = ?e, "Request failed");
            }
        }

        let body = json!({
            "error": self.message(),
            "stage": self.stage(),
        });
        (status, Json(body)).into_response()
    }
}
