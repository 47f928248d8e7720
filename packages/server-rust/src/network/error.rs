//! Request error taxonomy and its mapping onto HTTP responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Body returned for every unexpected failure. Internal details stay in the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred.";

/// Errors a request handler can end with.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Client input was unusable; the message names the defect.
    #[error("{0}")]
    BadRequest(String),
    /// `parameters` was not valid JSON.
    #[error("Invalid JSON in the 'parameters' field.")]
    InvalidJson(#[source] serde_json::Error),
    /// The requested artifact or asset is absent.
    #[error("{0}")]
    NotFound(String),
    /// The process is shutting down and the request was abandoned.
    #[error("Server is shutting down.")]
    ShuttingDown,
    /// Anything else. Logged in full, reported generically.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                error!(error = %format!("{e:#}"), "An unexpected error occurred.");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
            Self::InvalidJson(e) => {
                error!(error = %e, "Error parsing 'parameters' JSON.");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}
