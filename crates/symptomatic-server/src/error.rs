use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use symptomatic_ai::PredictError;
use thiserror::Error;
use tracing::error;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Request failure, rendered as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Detail is logged, never sent to the client.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PredictError> for ApiError {
    fn from(e: PredictError) -> Self {
        match e {
            PredictError::InvalidInput(_) => Self::BadRequest(e.to_string()),
            PredictError::NoKeywordMatch => Self::NotFound(e.to_string()),
            PredictError::Inference(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(_) => Self::BadRequest(
                "'symptoms' must be a list of strings or a comma-separated string".to_string(),
            ),
            other => Self::BadRequest(other.body_text()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("inference task failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::Internal(detail) => {
                error!(error = %detail, "request failed");
                INTERNAL_MESSAGE.to_string()
            }
            Self::BadRequest(m) | Self::NotFound(m) => m,
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
