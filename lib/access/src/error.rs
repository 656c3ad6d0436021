//! Error types for the access crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `AuthenticationError`: identity verification failures, all shown to
//!   callers as one generic message
//! - `AuthorizationError`: permission check failures
//! - `ConfigurationError`: missing or invalid provider settings
//! - `StoreError`: persistence failures
//! - `DirectoryError` / `ProviderError`: upstream protocol failures

use docshelf_core::UserId;
use std::fmt;

use crate::role::AuthSource;

/// The only message an unauthenticated caller ever sees.
pub const GENERIC_AUTH_FAILURE: &str = "invalid credentials";

/// Errors from authentication operations.
///
/// Variants carry the precise cause for operator logs. Callers must use
/// [`AuthenticationError::public_message`] when responding to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// Collapsed failure returned by the login chain.
    InvalidCredentials,
    /// No user with this username exists.
    UnknownUser { username: String },
    /// The user exists but authenticates through a different source.
    WrongSource {
        username: String,
        source: AuthSource,
    },
    /// Robot accounts cannot log in interactively.
    RobotAccount { username: String },
    /// Local account without a stored credential hash.
    NoCredential { username: String },
    /// Secret did not match.
    SecretMismatch { username: String },
    /// Group mapping rejected the identity.
    AccessDenied { username: String },
    /// Required claim or attribute missing from the external identity.
    MissingClaim { claim: String },
    /// Session not found.
    InvalidSession,
    /// Session has expired.
    SessionExpired,
    /// API token missing, malformed, or unknown.
    InvalidToken,
    /// API token has expired.
    TokenExpired,
    /// API token is bound to another project.
    TokenScope { project: String },
    /// An external identity source failed.
    Upstream { source: AuthSource, reason: String },
    /// Persistence failed during authentication.
    Store { details: String },
}

impl AuthenticationError {
    /// Returns the caller-facing message, identical for every variant.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        GENERIC_AUTH_FAILURE
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "{GENERIC_AUTH_FAILURE}"),
            Self::UnknownUser { username } => write!(f, "unknown user: {username}"),
            Self::WrongSource { username, source } => {
                write!(f, "user {username} authenticates via {source}")
            }
            Self::RobotAccount { username } => {
                write!(f, "robot account {username} cannot log in interactively")
            }
            Self::NoCredential { username } => {
                write!(f, "user {username} has no stored credential")
            }
            Self::SecretMismatch { username } => write!(f, "secret mismatch for {username}"),
            Self::AccessDenied { username } => {
                write!(f, "group membership of {username} grants no access")
            }
            Self::MissingClaim { claim } => write!(f, "missing required claim: {claim}"),
            Self::InvalidSession => write!(f, "invalid session"),
            Self::SessionExpired => write!(f, "session has expired"),
            Self::InvalidToken => write!(f, "invalid API token"),
            Self::TokenExpired => write!(f, "API token has expired"),
            Self::TokenScope { project } => {
                write!(f, "API token is not valid for project {project}")
            }
            Self::Upstream { source, reason } => write!(f, "{source} upstream error: {reason}"),
            Self::Store { details } => write!(f, "store error during authentication: {details}"),
        }
    }
}

impl std::error::Error for AuthenticationError {}

impl From<StoreError> for AuthenticationError {
    fn from(err: StoreError) -> Self {
        Self::Store {
            details: err.to_string(),
        }
    }
}

/// Errors from authorization operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// User is not authenticated.
    NotAuthenticated,
    /// User lacks required permission.
    PermissionDenied {
        user_id: UserId,
        action: String,
        resource: String,
    },
    /// Authorization check failed due to system error.
    CheckFailed { reason: String },
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => write!(f, "user is not authenticated"),
            Self::PermissionDenied {
                user_id,
                action,
                resource,
            } => write!(f, "user {user_id} lacks permission to {action} on {resource}"),
            Self::CheckFailed { reason } => write!(f, "authorization check failed: {reason}"),
        }
    }
}

impl std::error::Error for AuthorizationError {}

impl From<StoreError> for AuthorizationError {
    fn from(err: StoreError) -> Self {
        Self::CheckFailed {
            reason: err.to_string(),
        }
    }
}

/// Missing or invalid configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required field is empty.
    MissingField {
        section: &'static str,
        field: &'static str,
    },
    /// A field is present but unusable.
    InvalidField {
        section: &'static str,
        field: &'static str,
        reason: String,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { section, field } => {
                write!(f, "missing required configuration field {section}.{field}")
            }
            Self::InvalidField {
                section,
                field,
                reason,
            } => write!(f, "invalid configuration field {section}.{field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Errors from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record does not exist.
    NotFound { entity: &'static str, key: String },
    /// Unique constraint violated.
    Conflict { entity: &'static str, key: String },
    /// Configuration-managed row cannot be modified by hand.
    Protected { entity: &'static str, key: String },
    /// Backend failure.
    Backend { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} '{key}' not found"),
            Self::Conflict { entity, key } => write!(f, "{entity} '{key}' already exists"),
            Self::Protected { entity, key } => {
                write!(f, "{entity} '{key}' is managed by configuration")
            }
            Self::Backend { details } => write!(f, "store backend error: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Password hashing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHashError {
    pub reason: String,
}

impl fmt::Display for PasswordHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "password hashing failed: {}", self.reason)
    }
}

impl std::error::Error for PasswordHashError {}

/// Directory-service protocol failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Could not reach the directory.
    Connect { url: String, reason: String },
    /// A bind was rejected.
    Bind { dn: String, reason: String },
    /// Search failed.
    Search { reason: String },
    /// The operation exceeded the configured timeout.
    Timeout,
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { url, reason } => write!(f, "failed to connect to {url}: {reason}"),
            Self::Bind { dn, reason } => write!(f, "bind as '{dn}' failed: {reason}"),
            Self::Search { reason } => write!(f, "directory search failed: {reason}"),
            Self::Timeout => write!(f, "directory operation timed out"),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Identity-provider protocol failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Provider metadata could not be discovered.
    Discovery { reason: String },
    /// Authorization code exchange failed.
    TokenExchange { reason: String },
    /// User-info request failed.
    UserInfo { reason: String },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery { reason } => write!(f, "OIDC discovery error: {reason}"),
            Self::TokenExchange { reason } => write!(f, "OAuth2 token exchange error: {reason}"),
            Self::UserInfo { reason } => write!(f, "user-info request error: {reason}"),
        }
    }
}

impl std::error::Error for ProviderError {}
