//! API tokens for non-interactive access.
//!
//! Only the SHA-256 digest of a token secret is stored. A token bound to a
//! project authenticates for that project only; an unbound token is global.

use chrono::{DateTime, Utc};
use docshelf_core::{ProjectId, TokenId, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{AuthenticationError, StoreError};
use crate::secret::random_token;
use crate::store::{TokenStore, UserStore};
use crate::user::User;

/// Prefix on every issued secret, to make leaked tokens easy to scan for.
pub const TOKEN_PREFIX: &str = "dsk_";

/// A stored API token. Never contains the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: TokenId,
    /// Hex SHA-256 of the raw secret.
    pub token_hash: String,
    pub user_id: UserId,
    /// Project scope; `None` means global.
    pub project_id: Option<ProjectId>,
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    /// Returns true if the token has an expiry at or before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Returns true if the token may be used for `project_id`.
    #[must_use]
    pub fn covers(&self, project_id: ProjectId) -> bool {
        self.project_id.is_none_or(|bound| bound == project_id)
    }
}

/// Deterministic one-way hash of a raw token secret.
#[must_use]
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Extracts the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// A freshly issued token, holding the only copy of the secret.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub secret: String,
    pub token: ApiToken,
}

/// Authenticates bearer tokens and issues new ones.
#[derive(Clone)]
pub struct TokenAuthenticator {
    tokens: Arc<dyn TokenStore>,
    users: Arc<dyn UserStore>,
}

impl TokenAuthenticator {
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenStore>, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }

    /// Issues a token for `user_id`, optionally bound to a project.
    #[instrument(skip(self, name), fields(user_id = %user_id))]
    pub async fn issue(
        &self,
        user_id: UserId,
        name: impl Into<String>,
        project_id: Option<ProjectId>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<IssuedToken, StoreError> {
        let secret = format!("{TOKEN_PREFIX}{}", random_token());
        let token = ApiToken {
            id: TokenId::new(),
            token_hash: hash_token(&secret),
            user_id,
            project_id,
            name: name.into(),
            expires_at,
            created_at: Utc::now(),
        };
        self.tokens.create(&token).await?;
        debug!(token_id = %token.id, "API token issued");
        Ok(IssuedToken { secret, token })
    }

    /// Revokes a token.
    pub async fn revoke(&self, id: TokenId) -> Result<(), StoreError> {
        self.tokens.delete(id).await
    }

    /// Authenticates an `Authorization` header value.
    #[instrument(skip_all)]
    pub async fn authenticate_header(&self, header: &str) -> Result<User, AuthenticationError> {
        self.resolve(header).await.map(|(user, _)| user)
    }

    /// Authenticates a header for a specific project.
    ///
    /// Unbound tokens authenticate for any project.
    #[instrument(skip(self, header), fields(project_id = %project_id))]
    pub async fn authenticate_for_project(
        &self,
        header: &str,
        project_id: ProjectId,
    ) -> Result<User, AuthenticationError> {
        let (user, token) = self.resolve(header).await?;
        if !token.covers(project_id) {
            return Err(AuthenticationError::TokenScope {
                project: project_id.to_string(),
            });
        }
        Ok(user)
    }

    async fn resolve(&self, header: &str) -> Result<(User, ApiToken), AuthenticationError> {
        let raw = parse_bearer(header).ok_or(AuthenticationError::InvalidToken)?;
        let token = self
            .tokens
            .get_by_hash(&hash_token(raw))
            .await?
            .ok_or(AuthenticationError::InvalidToken)?;

        if token.is_expired(Utc::now()) {
            return Err(AuthenticationError::TokenExpired);
        }

        let user = self
            .users
            .get(token.user_id)
            .await?
            .ok_or(AuthenticationError::InvalidToken)?;
        Ok((user, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::role::{AuthSource, Role};
    use chrono::Duration;

    async fn setup() -> (TokenAuthenticator, User) {
        let store = Arc::new(MemoryStore::new());
        let mut user = User::new("ci-bot", AuthSource::Local, Role::Editor);
        user.set_robot(true);
        UserStore::create(store.as_ref(), &user).await.expect("create user");
        (TokenAuthenticator::new(store.clone(), store), user)
    }

    #[test]
    fn parse_bearer_is_case_insensitive() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("BEARER  abc "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("abc"), None);
    }

    #[test]
    fn hash_is_deterministic_hex() {
        assert_eq!(hash_token("secret"), hash_token("secret"));
        assert_ne!(hash_token("secret"), hash_token("Secret"));
        assert_eq!(hash_token("secret").len(), 64);
    }

    #[tokio::test]
    async fn issued_secret_is_not_stored() {
        let (auth, user) = setup().await;
        let issued = auth.issue(user.id(), "ci", None, None).await.expect("issue");
        assert!(issued.secret.starts_with(TOKEN_PREFIX));
        assert_ne!(issued.token.token_hash, issued.secret);
        assert_eq!(issued.token.token_hash, hash_token(&issued.secret));
    }

    #[tokio::test]
    async fn robot_authenticates_with_bearer_token() {
        let (auth, user) = setup().await;
        let issued = auth.issue(user.id(), "ci", None, None).await.expect("issue");

        let header = format!("bearer {}", issued.secret);
        let resolved = auth.authenticate_header(&header).await.expect("authenticate");
        assert_eq!(resolved.id(), user.id());
    }

    #[tokio::test]
    async fn project_bound_token_only_covers_its_project() {
        let (auth, user) = setup().await;
        let project_a = ProjectId::new();
        let project_b = ProjectId::new();
        let issued = auth
            .issue(user.id(), "upload-a", Some(project_a), None)
            .await
            .expect("issue");
        let header = format!("Bearer {}", issued.secret);

        assert!(auth.authenticate_for_project(&header, project_a).await.is_ok());
        let err = auth
            .authenticate_for_project(&header, project_b)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::TokenScope { .. }));
    }

    #[tokio::test]
    async fn unbound_token_covers_any_project() {
        let (auth, user) = setup().await;
        let issued = auth.issue(user.id(), "admin", None, None).await.expect("issue");
        let header = format!("Bearer {}", issued.secret);

        for _ in 0..3 {
            assert!(
                auth.authenticate_for_project(&header, ProjectId::new())
                    .await
                    .is_ok()
            );
        }
    }

    #[test]
    fn expiry_is_checked_against_the_given_instant() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp");
        let mut token = ApiToken {
            id: TokenId::new(),
            token_hash: hash_token("dsk_example"),
            user_id: UserId::new(),
            project_id: None,
            name: "ci".to_string(),
            expires_at: None,
            created_at: now,
        };
        assert!(!token.is_expired(now + Duration::days(10_000)));

        token.expires_at = Some(now + Duration::days(30));
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + Duration::days(30)));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (auth, user) = setup().await;
        let issued = auth
            .issue(user.id(), "old", None, Some(Utc::now() - Duration::minutes(1)))
            .await
            .expect("issue");
        let err = auth
            .authenticate_header(&format!("Bearer {}", issued.secret))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::TokenExpired);
    }

    #[tokio::test]
    async fn revoked_and_unknown_tokens_are_invalid() {
        let (auth, user) = setup().await;
        let issued = auth.issue(user.id(), "tmp", None, None).await.expect("issue");
        auth.revoke(issued.token.id).await.expect("revoke");

        let err = auth
            .authenticate_header(&format!("Bearer {}", issued.secret))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::InvalidToken);

        let err = auth.authenticate_header("Bearer nope").await.unwrap_err();
        assert_eq!(err, AuthenticationError::InvalidToken);
    }
}
