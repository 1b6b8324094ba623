use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::Provider;
use crate::gateways::{EventParseError, GatewayError};
use crate::ports::RepositoryError;
use crate::validation::ValidationError;

/// Stable error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Integrity,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Integrity => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Integrity => "integrity_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Internal => "internal_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("unsupported payment provider: {0}")]
    UnsupportedProvider(String),

    #[error("payment provider is not set: {0}")]
    ProviderNotConfigured(Provider),

    #[error("payment failed: {0}")]
    Payment(GatewayError),

    #[error("no transaction matches {0}")]
    UnknownTransaction(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("malformed webhook event: {0}")]
    MalformedEvent(#[from] EventParseError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    #[error("could not record charge ({persist}); refunded as {refund_id}")]
    Compensated {
        persist: RepositoryError,
        refund_id: String,
    },

    #[error("could not record charge ({persist}); compensating refund also failed ({refund})")]
    CompensationFailed {
        persist: RepositoryError,
        refund: GatewayError,
    },
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_)
            | AppError::DuplicateTransaction(_)
            | AppError::UnsupportedProvider(_)
            | AppError::ProviderNotConfigured(_)
            | AppError::MalformedEvent(_) => ErrorKind::Validation,
            AppError::Payment(e) if e.is_client_error() => ErrorKind::Validation,
            AppError::Payment(_) => ErrorKind::Internal,
            AppError::UnknownTransaction(_) => ErrorKind::Integrity,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Database(_)
            | AppError::Compensated { .. }
            | AppError::CompensationFailed { .. } => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    /// Message safe to return to the caller.
    fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal server error".to_string(),
            ErrorKind::Unauthorized => "unauthorized".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = kind.status_code();
        match kind {
            ErrorKind::Internal => tracing::error!(error = %self, "request failed"),
            ErrorKind::Unauthorized => tracing::warn!(error = %self, "request rejected"),
            _ => tracing::debug!(error = %self, "request rejected"),
        }

        let body = Json(json!({
            "error": self.public_message(),
            "kind": kind.as_str(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
