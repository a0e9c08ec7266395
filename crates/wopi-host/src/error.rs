//! Error types for the WOPI host

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::routes::headers::{X_WOPI_LOCK, X_WOPI_LOCK_FAILURE_REASON};

/// Result type alias for WOPI operations
pub type WopiResult<T> = Result<T, WopiError>;

/// WOPI host error types
#[derive(Debug, Error)]
pub enum WopiError {
    #[error("File not found: {0}")]
    NotFound(String),

    /// The document is locked under a different token.
    #[error("Lock mismatch on {file_id}")]
    LockMismatch {
        file_id: String,
        current: Option<String>,
    },

    #[error("File is not locked: {0}")]
    NotLocked(String),

    /// Write attempted on an unlocked document that already has content.
    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Permission denied: {action}")]
    PermissionDenied { action: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for WopiError {
    fn from(err: std::io::Error) -> Self {
        WopiError::Io(err)
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl WopiError {
    /// Convert to API error code
    pub fn code(&self) -> &'static str {
        match self {
            WopiError::NotFound(_) => "FILE_NOT_FOUND",
            WopiError::LockMismatch { .. } => "LOCK_MISMATCH",
            WopiError::NotLocked(_) => "NOT_LOCKED",
            WopiError::Conflict { .. } => "CONFLICT",
            WopiError::PermissionDenied { .. } => "PERMISSION_DENIED",
            WopiError::InvalidRequest(_) => "INVALID_REQUEST",
            WopiError::Unauthorized(_) => "UNAUTHORIZED",
            WopiError::Unsupported(_) => "UNSUPPORTED",
            WopiError::Io(_) => "IO_ERROR",
            WopiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            WopiError::NotFound(_) => StatusCode::NOT_FOUND,

            WopiError::LockMismatch { .. } | WopiError::NotLocked(_) | WopiError::Conflict { .. } => {
                StatusCode::CONFLICT
            }

            WopiError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            WopiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            WopiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WopiError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,

            WopiError::Io(_) | WopiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Lock token to echo in `X-WOPI-Lock`, for lock-related failures only.
    /// An empty string means "no lock is held".
    pub fn lock_header(&self) -> Option<&str> {
        match self {
            WopiError::LockMismatch { current, .. } => Some(current.as_deref().unwrap_or("")),
            WopiError::NotLocked(_) | WopiError::Conflict { .. } => Some(""),
            _ => None,
        }
    }

    /// Whether a single internal retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            WopiError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl IntoResponse for WopiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let lock = self.lock_header().map(str::to_string);
        let body = ApiError {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(lock) = lock {
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&lock) {
                headers.insert(X_WOPI_LOCK, value);
            }
            if let Ok(value) = HeaderValue::from_str(&self.to_string()) {
                headers.insert(X_WOPI_LOCK_FAILURE_REASON, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mismatch_surfaces_current_token() {
        let err = WopiError::LockMismatch {
            file_id: "doc1".to_string(),
            current: Some("tok1".to_string()),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.lock_header(), Some("tok1"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers().get(X_WOPI_LOCK).unwrap(), "tok1");
    }

    #[test]
    fn test_not_locked_echoes_empty_lock() {
        let response = WopiError::NotLocked("doc1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers().get(X_WOPI_LOCK).unwrap(), "");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            WopiError::NotFound("ghost123".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            WopiError::PermissionDenied {
                action: "write".into()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            WopiError::Unsupported("PUT_RELATIVE".into()).status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert!(WopiError::NotFound("x".into()).lock_header().is_none());
    }

    #[test]
    fn test_transient_io() {
        let err = WopiError::from(std::io::Error::from(std::io::ErrorKind::Interrupted));
        assert!(err.is_transient());
        let err = WopiError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!err.is_transient());
        assert!(!WopiError::Internal("boom".into()).is_transient());
    }
}
