//! Local credential store authentication.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use std::sync::{Arc, LazyLock};
use tracing::{instrument, warn};

use super::{Authenticator, Credentials};
use crate::error::{AuthenticationError, PasswordHashError};
use crate::reconcile::AccessReconciler;
use crate::role::AuthSource;
use crate::store::UserStore;
use crate::user::User;

/// Hashes `password` into an Argon2id PHC string with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, PasswordHashError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordHashError {
            reason: e.to_string(),
        })
}

/// Verifies `password` against a PHC string. Malformed hashes never match.
#[must_use]
pub fn verify_password(password: &str, phc: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hash checked when there is no real one, so rejected usernames cost the
/// same Argon2 work as a wrong password.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("docshelf-unmatched-password").unwrap_or_default());

/// Verifies on the blocking pool. `None` burns a dummy verification and
/// never matches.
async fn verify_blocking(password: String, phc: Option<String>) -> bool {
    let result = tokio::task::spawn_blocking(move || match phc {
        Some(phc) => verify_password(&password, &phc),
        None => {
            let _ = verify_password(&password, &DUMMY_HASH);
            false
        }
    })
    .await;
    result.unwrap_or_else(|e| {
        warn!(error = %e, "password verification task failed");
        false
    })
}

/// Authenticates accounts whose credential hash is stored locally.
#[derive(Clone)]
pub struct LocalAuthenticator {
    users: Arc<dyn UserStore>,
    reconciler: Option<Arc<AccessReconciler>>,
}

impl LocalAuthenticator {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            reconciler: None,
        }
    }

    /// Refreshes the user's manual global grant after each login.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Arc<AccessReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip_all, fields(username = %credentials.username))]
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthenticationError> {
        let username = credentials.username.as_str();
        let user = self.users.get_by_username(username).await?;

        let stored = user
            .as_ref()
            .filter(|u| u.auth_source() == AuthSource::Local && !u.is_robot())
            .and_then(User::password_hash)
            .map(str::to_string);
        let matched = verify_blocking(credentials.password.clone(), stored).await;

        let Some(user) = user else {
            return Err(AuthenticationError::UnknownUser {
                username: username.to_string(),
            });
        };
        if user.auth_source() != AuthSource::Local {
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
        if user.password_hash().is_none() {
            return Err(AuthenticationError::NoCredential {
                username: username.to_string(),
            });
        }
        if !matched {
            return Err(AuthenticationError::SecretMismatch {
                username: username.to_string(),
            });
        }

        if let Some(reconciler) = &self.reconciler {
            reconciler.spawn(user.clone(), AuthSource::Local, Vec::new());
        }
        Ok(user)
    }
}
