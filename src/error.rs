// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ErrorResponse;

/// Error kinds surfaced by every core operation.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{service} error: {message}")]
    ExternalService { service: &'static str, message: String },
    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        CoreError::Authorization(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        CoreError::InvalidState(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    /// Stable machine-readable kind included in every error body.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::Authentication(_) => "authentication",
            CoreError::Authorization(_) => "authorization",
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Conflict(_) => "conflict",
            CoreError::ExternalService { .. } => "external_service",
            CoreError::Storage(_) | CoreError::Serialization(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Authentication(_) => StatusCode::UNAUTHORIZED,
            CoreError::Authorization(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidState(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            CoreError::Storage(_) | CoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 5xx bodies never carry internal detail; the log line has it
        let message = if status.is_server_error() {
            let error_id = Uuid::new_v4();
            tracing::error!(error_id = %error_id, kind = self.kind(), error = %self, "request failed");
            format!("Internal server error (ID: {})", error_id)
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                kind: Some(self.kind().to_string()),
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CoreError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(CoreError::authorization("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(CoreError::invalid_state("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            CoreError::ExternalService { service: "razorpay", message: "boom".into() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_storage_errors_are_internal() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "internal");
        assert!(err.status_code().is_server_error());
    }
}
