//! Session management for authenticated users.
//!
//! Sessions are created after any authenticator succeeds. The ID is an
//! opaque high-entropy token that the server hands out as a cookie.
//! Expired sessions are deleted lazily on first access.

use chrono::{DateTime, Duration, Utc};
use docshelf_core::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{AuthenticationError, StoreError};
use crate::secret::{OsTokenSource, TokenSource};
use crate::store::{SessionStore, UserStore};
use crate::user::User;

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new session ID from a string.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Returns the session ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An authenticated browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user_id: UserId,
    created_at: DateTime<Utc>,
    /// Absolute expiry.
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session starting at `now` and valid for `duration`.
    #[must_use]
    pub fn new(id: SessionId, user_id: UserId, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            id,
            user_id,
            created_at: now,
            expires_at: now + duration,
        }
    }

    /// Reconstitutes a session from storage.
    #[must_use]
    pub fn with_all_fields(
        id: SessionId,
        user_id: UserId,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            created_at,
            expires_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the session has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Creates, resolves, and destroys sessions.
#[derive(Clone)]
pub struct SessionService {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    ttl: Duration,
    ids: Arc<dyn TokenSource>,
}

impl SessionService {
    /// Creates a session service issuing sessions valid for `ttl`.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, users: Arc<dyn UserStore>, ttl: Duration) -> Self {
        Self {
            sessions,
            users,
            ttl,
            ids: Arc::new(OsTokenSource),
        }
    }

    /// Replaces the session ID generator.
    #[must_use]
    pub fn with_token_source(mut self, ids: Arc<dyn TokenSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Returns the configured session lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persists a new session for `user_id`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create(&self, user_id: UserId) -> Result<Session, StoreError> {
        let session = Session::new(
            SessionId::new(self.ids.generate()),
            user_id,
            Utc::now(),
            self.ttl,
        );
        self.sessions.create(&session).await?;
        debug!("session created");
        Ok(session)
    }

    /// Resolves a session to its user.
    ///
    /// An expired session is deleted before `SessionExpired` is returned.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, id: &SessionId) -> Result<User, AuthenticationError> {
        let session = self
            .sessions
            .get(id)
            .await?
            .ok_or(AuthenticationError::InvalidSession)?;

        if session.is_expired(Utc::now()) {
            self.sessions.delete(id).await?;
            debug!(user_id = %session.user_id(), "expired session removed");
            return Err(AuthenticationError::SessionExpired);
        }

        self.users
            .get(session.user_id())
            .await?
            .ok_or(AuthenticationError::InvalidSession)
    }

    /// Like [`authenticate`](Self::authenticate) but logs failures and returns `None`.
    pub async fn user_for(&self, id: &SessionId) -> Option<User> {
        match self.authenticate(id).await {
            Ok(user) => Some(user),
            Err(AuthenticationError::Store { details }) => {
                warn!(error = %details, "session lookup failed");
                None
            }
            Err(err) => {
                debug!(reason = %err, "session rejected");
                None
            }
        }
    }

    /// Deletes a session. Never fails; store errors are logged.
    pub async fn destroy(&self, id: &SessionId) {
        if let Err(err) = self.sessions.delete(id).await {
            warn!(error = %err, "failed to delete session");
        }
    }

    /// Deletes every expired session, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.sessions.delete_expired(Utc::now()).await
    }
}
