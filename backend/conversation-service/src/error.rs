/// Error types for conversation-service
///
/// Every ledger failure is a distinct, returnable value. The HTTP layer maps
/// them to status codes through `ResponseError`.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// The id resolves to no record, active or deleted
    #[error("Conversation not found: {0}")]
    NotFound(Uuid),

    /// The record exists but has been soft-deleted
    #[error("Conversation has been deleted: {0}")]
    Gone(Uuid),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transient storage failure; safe to retry
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Gone(_) => "gone",
            LedgerError::Forbidden(_) => "forbidden",
            LedgerError::Unauthenticated(_) => "unauthenticated",
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::Unavailable(_) => "unavailable",
            LedgerError::Internal(_) => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => true,
            sqlx::Error::Database(db_err) => db_err
                .code()
                .map(|code| is_transient_sqlstate(&code))
                .unwrap_or(false),
            _ => false,
        };

        if transient {
            LedgerError::Unavailable(err.to_string())
        } else {
            LedgerError::Internal(err.to_string())
        }
    }
}

/// Connection exceptions (08xxx), serialization failures, deadlocks and
/// operator shutdowns are worth a retry.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57P01" | "57P03")
}

impl ResponseError for LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Gone(_) => StatusCode::GONE,
            LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
            LedgerError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Storage details stay in the logs.
        let message = match self {
            LedgerError::Unavailable(_) => "Storage temporarily unavailable, retry later".to_string(),
            LedgerError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status).json(serde_json::json!({
            "error": message,
            "kind": self.kind(),
            "status": status.as_u16(),
        }))
    }
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let id = Uuid::nil();
        assert_eq!(LedgerError::NotFound(id).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(LedgerError::Gone(id).status_code(), StatusCode::GONE);
        assert_eq!(
            LedgerError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            LedgerError::Unauthenticated("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            LedgerError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_pool_errors_are_retryable() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "unavailable");

        let err: LedgerError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn test_transient_sqlstates() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(!is_transient_sqlstate("23505"));
    }
}
