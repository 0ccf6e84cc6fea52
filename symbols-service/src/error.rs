use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use symbols_core::SymbolsError;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub hint: String,
}

impl ErrorEnvelope {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: hint.into(),
        }
    }
}

pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorEnvelope,
}

impl AppError {
    pub fn bad_request(msg: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorEnvelope::new(
                "invalid_request",
                msg.to_string(),
                "Check the repo, commit_id and patterns in the request",
            ),
        }
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorEnvelope::new(
                "internal_error",
                msg.to_string(),
                "Check service logs for details",
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.body)).into_response()
    }
}

impl From<SymbolsError> for AppError {
    fn from(err: SymbolsError) -> Self {
        match &err {
            e if e.is_invalid_request() => AppError::bad_request(err),
            SymbolsError::DeadlineExceeded => AppError {
                status: StatusCode::GATEWAY_TIMEOUT,
                body: ErrorEnvelope::new(
                    "deadline_exceeded",
                    err.to_string(),
                    "The index may still be building; retry the search shortly",
                ),
            },
            SymbolsError::Cancelled => AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: ErrorEnvelope::new("cancelled", err.to_string(), "Retry the search"),
            },
            SymbolsError::Git { .. } | SymbolsError::Parse { .. } => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: ErrorEnvelope::new(
                    "build_failed",
                    err.to_string(),
                    "Check that the repository exists and the commit is reachable",
                ),
            },
            _ => AppError::internal(err),
        }
    }
}
