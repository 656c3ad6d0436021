//! HTTP-facing error type for server handlers.
//!
//! Every authentication failure renders the same generic message; the
//! precise cause is only logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docshelf_access::{AuthenticationError, AuthorizationError, StoreError};
use std::fmt;

/// Errors returned by request handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Authentication failed for the given reason.
    Unauthenticated(AuthenticationError),
    /// The request was well-formed but its values are unacceptable.
    BadRequest { reason: String },
    /// Authenticated, but not allowed.
    Forbidden,
    /// Route or resource does not exist.
    NotFound,
    /// Persistence or other server-side failure.
    Internal { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated(err) => write!(f, "authentication failed: {err}"),
            Self::BadRequest { reason } => write!(f, "bad request: {reason}"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::NotFound => write!(f, "not found"),
            Self::Internal { details } => write!(f, "internal error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<AuthenticationError> for ApiError {
    fn from(err: AuthenticationError) -> Self {
        match err {
            AuthenticationError::Store { details } => Self::Internal { details },
            other => Self::Unauthenticated(other),
        }
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(err: AuthorizationError) -> Self {
        match err {
            AuthorizationError::NotAuthenticated => {
                Self::Unauthenticated(AuthenticationError::InvalidCredentials)
            }
            AuthorizationError::PermissionDenied { .. } => Self::Forbidden,
            AuthorizationError::CheckFailed { reason } => Self::Internal { details: reason },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal {
            details: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated(err) => {
                tracing::debug!(reason = %err, "request rejected");
                (StatusCode::UNAUTHORIZED, err.public_message()).into_response()
            }
            Self::BadRequest { reason } => (StatusCode::BAD_REQUEST, reason).into_response(),
            Self::Forbidden => (StatusCode::FORBIDDEN, "Access denied").into_response(),
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            Self::Internal { details } => {
                tracing::error!(error = %details, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
