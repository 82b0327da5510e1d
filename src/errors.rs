use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error payload returned to HTTP callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Client-submitted total disagrees with the server-recomputed total
    /// beyond the rounding tolerance.
    #[error("Amount mismatch: {0}")]
    AmountMismatch(String),

    #[error("Insufficient wallet funds: {0}")]
    InsufficientFunds(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid depot: {0}")]
    InvalidDepot(String),

    /// Neither client input nor catalog/variant dereference yielded a
    /// display name for a line item.
    #[error("Could not resolve item: {0}")]
    ResolutionError(String),

    /// Sequence allocator retry budget exhausted under write contention.
    #[error("Sequence allocation conflict: {0}")]
    SequenceConflict(String),

    #[error("Cancelled item {0} cannot be modified")]
    ImmutableCancelledItem(Uuid),

    #[error("Invalid status transition: {0}")]
    InvalidStatusTransition(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_)
            | Self::ConfigError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidAmount(_)
            | Self::InvalidDepot(_)
            | Self::ResolutionError(_)
            | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::AmountMismatch(_) | Self::InsufficientFunds(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::SequenceConflict(_)
            | Self::ImmutableCancelledItem(_)
            | Self::InvalidStatusTransition(_) => StatusCode::CONFLICT,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::ConfigError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
            message: self.response_message(),
            details: None,
            timestamp: Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            ServiceError::ValidationError("missing name".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InsufficientFunds("600 > 500".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::SequenceConflict("order-number:2526".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::NotFound("order".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let err = ServiceError::db_error("connection refused on 10.0.0.3");
        assert_eq!(err.response_message(), "Database error");
    }
}
