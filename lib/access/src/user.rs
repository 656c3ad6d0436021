//! User domain type.
//!
//! A user is identified by a unique username. Users sourced from the
//! directory service or identity provider are provisioned on first login
//! and have their email and global role refreshed on every later login.

use chrono::{DateTime, Utc};
use docshelf_core::UserId;
use serde::{Deserialize, Serialize};

use crate::role::{AuthSource, Role};

/// An identity known to docshelf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal user ID.
    id: UserId,
    /// Unique login name.
    username: String,
    /// Email address, if known.
    email: Option<String>,
    /// Argon2 PHC string, only present for local accounts.
    #[serde(skip_serializing)]
    password_hash: Option<String>,
    /// Which identity source this account authenticates against.
    auth_source: AuthSource,
    /// Global role.
    role: Role,
    /// Robot accounts only authenticate through API tokens.
    robot: bool,
    /// When the user record was created.
    created_at: DateTime<Utc>,
    /// When the user record was last updated.
    updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a new user with a generated ID.
    #[must_use]
    pub fn new(username: impl Into<String>, auth_source: AuthSource, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            username: username.into(),
            email: None,
            password_hash: None,
            auth_source,
            role,
            robot: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a user with all fields specified.
    ///
    /// Use this when reconstituting a user from storage.
    #[must_use]
    #[expect(clippy::too_many_arguments)]
    pub fn with_all_fields(
        id: UserId,
        username: String,
        email: Option<String>,
        password_hash: Option<String>,
        auth_source: AuthSource,
        role: Role,
        robot: bool,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password_hash,
            auth_source,
            role,
            robot,
            created_at,
            updated_at,
        }
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref()
    }

    #[must_use]
    pub fn auth_source(&self) -> AuthSource {
        self.auth_source
    }

    /// Returns the global role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns true for robot accounts, which cannot log in interactively.
    #[must_use]
    pub fn is_robot(&self) -> bool {
        self.robot
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_email(&mut self, email: Option<String>) {
        self.email = email;
        self.updated_at = Utc::now();
    }

    pub fn set_password_hash(&mut self, password_hash: Option<String>) {
        self.password_hash = password_hash;
        self.updated_at = Utc::now();
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.updated_at = Utc::now();
    }

    pub fn set_robot(&mut self, robot: bool) {
        self.robot = robot;
        self.updated_at = Utc::now();
    }

    /// Applies the attributes an external login reports.
    ///
    /// Returns true if anything changed. An absent email keeps the stored one.
    pub fn sync_external(&mut self, email: Option<&str>, role: Role) -> bool {
        let email_changed = email.is_some_and(|e| self.email.as_deref() != Some(e));
        if !email_changed && self.role == role {
            return false;
        }
        if email_changed {
            self.email = email.map(str::to_string);
        }
        self.role = role;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_has_generated_id() {
        let user = User::new("alice", AuthSource::Local, Role::Viewer);
        assert!(user.id().to_string().starts_with("usr_"));
        assert_eq!(user.username(), "alice");
        assert!(!user.is_robot());
        assert!(user.password_hash().is_none());
    }

    #[test]
    fn new_user_has_timestamps() {
        let before = Utc::now();
        let user = User::new("alice", AuthSource::Ldap, Role::Editor);
        let after = Utc::now();

        assert!(user.created_at() >= before);
        assert!(user.created_at() <= after);
        assert_eq!(user.created_at(), user.updated_at());
    }

    #[test]
    fn sync_external_updates_email_and_role() {
        let mut user = User::new("bob", AuthSource::Oidc, Role::Viewer);
        assert!(user.sync_external(Some("bob@example.com"), Role::Admin));
        assert_eq!(user.email(), Some("bob@example.com"));
        assert_eq!(user.role(), Role::Admin);
    }

    #[test]
    fn sync_external_without_changes_is_noop() {
        let mut user = User::new("bob", AuthSource::Oidc, Role::Editor);
        user.set_email(Some("bob@example.com".to_string()));
        let updated = user.updated_at();

        assert!(!user.sync_external(Some("bob@example.com"), Role::Editor));
        assert!(!user.sync_external(None, Role::Editor));
        assert_eq!(user.updated_at(), updated);
        assert_eq!(user.email(), Some("bob@example.com"));
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let mut user = User::new("carol", AuthSource::Local, Role::Viewer);
        user.set_password_hash(Some("$argon2id$secret".to_string()));
        let json = serde_json::to_string(&user).expect("serialize");
        assert!(!json.contains("argon2id"));
    }
}
