//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::ingest::IngestError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            AppError::Ingest(IngestError::MalformedRecord { .. }) => {
                (StatusCode::BAD_REQUEST, "MALFORMED_RECORD")
            },
            AppError::Ingest(IngestError::IdServiceUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ID_SERVICE_UNAVAILABLE")
            },
            AppError::Ingest(IngestError::Cancelled) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
            },
            AppError::Ingest(IngestError::JobStatus(_)) | AppError::Ingest(IngestError::JobLog(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "JOB_STORE_UNAVAILABLE")
            },
            AppError::Ingest(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            match &self {
                AppError::Internal(_) => "An internal error occurred".to_string(),
                _ => self.to_string(),
            }
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_errors_map_to_status() {
        let cases = [
            (AppError::from(IngestError::malformed(Some(2), "not an object")), StatusCode::BAD_REQUEST),
            (
                AppError::from(IngestError::IdServiceUnavailable("timeout".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::NotFound("job 1".into()), StatusCode::NOT_FOUND),
            (AppError::Validation("no file".into()), StatusCode::BAD_REQUEST),
            (AppError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::from(IngestError::malformed(None, "x")).status_and_code().1,
            "MALFORMED_RECORD"
        );
        assert_eq!(
            AppError::from(IngestError::IdServiceUnavailable("x".into())).status_and_code().1,
            "ID_SERVICE_UNAVAILABLE"
        );
    }
}
