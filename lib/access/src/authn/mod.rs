//! Authenticators for the three identity sources.
//!
//! Username/password sources (local and directory) implement
//! [`Authenticator`] and are tried in order by [`AuthChain`]. The identity
//! provider uses a redirect flow and is driven through
//! [`oidc::OidcAuthenticator`] instead.

pub mod directory;
pub mod ldap;
pub mod local;
pub mod oauth;
pub mod oidc;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::AuthenticationError;
use crate::role::{AuthSource, Role};
use crate::store::UserStore;
use crate::user::User;

/// Interactive login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// A username/password identity source.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Verifies `credentials` and returns the (possibly newly provisioned) user.
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthenticationError>;
}

/// Ordered list of authenticators; the first success wins.
#[derive(Clone, Default)]
pub struct AuthChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an authenticator to the end of the chain.
    #[must_use]
    pub fn with(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    /// Names of the configured authenticators, in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.authenticators.iter().map(|a| a.name()).collect()
    }

    /// Tries each authenticator in order.
    ///
    /// Intermediate failures are logged and discarded; if none succeeds the
    /// caller receives only `InvalidCredentials`.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthenticationError> {
        for authenticator in &self.authenticators {
            match authenticator.authenticate(credentials).await {
                Ok(user) => {
                    info!(authenticator = authenticator.name(), user_id = %user.id(), "login succeeded");
                    return Ok(user);
                }
                Err(err) => {
                    debug!(authenticator = authenticator.name(), reason = %err, "authenticator rejected login");
                }
            }
        }
        Err(AuthenticationError::InvalidCredentials)
    }
}

/// Creates or refreshes the local record of an externally authenticated user.
///
/// Existing records owned by another source, and robot accounts, are
/// rejected so an external login can never take over a local account.
pub(crate) async fn provision_external(
    users: &dyn UserStore,
    source: AuthSource,
    username: &str,
    email: Option<&str>,
    role: Role,
) -> Result<User, AuthenticationError> {
    match users.get_by_username(username).await? {
        Some(mut user) => {
            if user.auth_source() != source {
                return Err(AuthenticationError::WrongSource {
                    username: username.to_string(),
                    source: user.auth_source(),
                });
            }
            if user.is_robot() {
                return Err(AuthenticationError::RobotAccount {
                    username: username.to_string(),
                });
            }
            if user.sync_external(email, role) {
                users.update(&user).await?;
                debug!(user_id = %user.id(), role = %role, "external user refreshed");
            }
            Ok(user)
        }
        None => {
            let mut user = User::new(username, source, role);
            user.set_email(email.map(str::to_string));
            users.create(&user).await?;
            info!(user_id = %user.id(), source = %source, role = %role, "external user provisioned");
            Ok(user)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl Authenticator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthenticationError> {
            match self.0 {
                Some(name) => Ok(User::new(name, AuthSource::Local, Role::Viewer)),
                None => Err(AuthenticationError::UnknownUser {
                    username: credentials.username.clone(),
                }),
            }
        }
    }

    #[test]
    fn credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn first_success_wins() {
        let chain = AuthChain::new()
            .with(Arc::new(Fixed(None)))
            .with(Arc::new(Fixed(Some("second"))))
            .with(Arc::new(Fixed(Some("third"))));
        let user = chain
            .authenticate(&Credentials::new("x", "y"))
            .await
            .expect("authenticate");
        assert_eq!(user.username(), "second");
    }

    #[tokio::test]
    async fn all_failures_collapse_to_generic_error() {
        let chain = AuthChain::new()
            .with(Arc::new(Fixed(None)))
            .with(Arc::new(Fixed(None)));
        let err = chain
            .authenticate(&Credentials::new("x", "y"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::InvalidCredentials);
    }

    #[tokio::test]
    async fn empty_chain_rejects() {
        let err = AuthChain::new()
            .authenticate(&Credentials::new("x", "y"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthenticationError::InvalidCredentials);
    }

    #[tokio::test]
    async fn provisioning_creates_then_refreshes() {
        let store = MemoryStore::new();
        let created = provision_external(&store, AuthSource::Ldap, "alice", Some("a@x.io"), Role::Viewer)
            .await
            .expect("create");
        let refreshed = provision_external(&store, AuthSource::Ldap, "alice", Some("a@y.io"), Role::Admin)
            .await
            .expect("refresh");

        assert_eq!(created.id(), refreshed.id());
        let stored = store.get_by_username("alice").await.expect("get").expect("exists");
        assert_eq!(stored.role(), Role::Admin);
        assert_eq!(stored.email(), Some("a@y.io"));
    }

    #[tokio::test]
    async fn provisioning_refuses_accounts_of_other_sources() {
        let store = MemoryStore::new();
        let local = User::new("admin", AuthSource::Local, Role::Admin);
        UserStore::create(&store, &local).await.expect("create");

        let err = provision_external(&store, AuthSource::Oidc, "admin", None, Role::Viewer)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::WrongSource { .. }));
    }
}
