//! Persistence interfaces consumed by the access components.
//!
//! Every store is assumed safe for concurrent callers. Implementations live
//! in [`crate::memory`] (single process, tests) and in the server crate
//! (PostgreSQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docshelf_core::{GlobalAccessRuleId, GroupMappingId, ProjectId, TokenId, UserId};

use crate::error::StoreError;
use crate::project::{AuthGroupMapping, GlobalAccessGrant, GlobalAccessRule, Project, ProjectAccess};
use crate::role::{AccessSource, AuthSource};
use crate::session::{Session, SessionId};
use crate::token::ApiToken;
use crate::user::User;

/// User records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the username is taken.
    async fn create(&self, user: &User) -> Result<(), StoreError>;

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn update(&self, user: &User) -> Result<(), StoreError>;

    async fn delete(&self, id: UserId) -> Result<(), StoreError>;
}

/// Browser sessions keyed by opaque ID.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Deletes a session. Deleting a missing session is not an error.
    async fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Deletes every session expiring before `now`, returning how many.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// API tokens keyed by the hash of their secret.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, token: &ApiToken) -> Result<(), StoreError>;

    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>, StoreError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApiToken>, StoreError>;

    async fn delete(&self, id: TokenId) -> Result<(), StoreError>;
}

/// Project lookups needed for visibility decisions.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, StoreError>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Project>, StoreError>;
}

/// Per-project grants, unique per (project, user, source).
#[async_trait]
pub trait ProjectAccessStore: Send + Sync {
    /// Inserts or replaces the grant for (project, user, source).
    async fn upsert(&self, access: &ProjectAccess) -> Result<(), StoreError>;

    /// Removes the grant for (project, user, source) if present.
    async fn revoke(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        source: AccessSource,
    ) -> Result<(), StoreError>;

    async fn list_for_user_source(
        &self,
        user_id: UserId,
        source: AccessSource,
    ) -> Result<Vec<ProjectAccess>, StoreError>;

    /// Returns the grants of every source for (project, user).
    async fn list_for_project_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<ProjectAccess>, StoreError>;
}

/// External group to project role mappings.
#[async_trait]
pub trait GroupMappingStore: Send + Sync {
    async fn list_for_source(&self, source: AuthSource) -> Result<Vec<AuthGroupMapping>, StoreError>;

    async fn list_all(&self) -> Result<Vec<AuthGroupMapping>, StoreError>;

    /// Inserts or replaces a mapping by ID.
    async fn save(&self, mapping: &AuthGroupMapping) -> Result<(), StoreError>;

    /// Administrative delete.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Protected` for configuration-managed rows.
    async fn delete(&self, id: GroupMappingId) -> Result<(), StoreError>;

    /// Deletes a configuration-managed row during startup sync.
    async fn remove_config(&self, id: GroupMappingId) -> Result<(), StoreError>;
}

/// Global access rules and the grants materialised from them.
#[async_trait]
pub trait GlobalAccessStore: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<GlobalAccessRule>, StoreError>;

    async fn save_rule(&self, rule: &GlobalAccessRule) -> Result<(), StoreError>;

    /// Administrative delete.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Protected` for configuration-managed rows.
    async fn delete_rule(&self, id: GlobalAccessRuleId) -> Result<(), StoreError>;

    /// Deletes a configuration-managed rule during startup sync.
    async fn remove_config_rule(&self, id: GlobalAccessRuleId) -> Result<(), StoreError>;

    /// Inserts or replaces the grant for (user, source).
    async fn upsert_grant(&self, grant: &GlobalAccessGrant) -> Result<(), StoreError>;

    async fn delete_grant(&self, user_id: UserId, source: AccessSource) -> Result<(), StoreError>;

    async fn list_grants(&self, user_id: UserId) -> Result<Vec<GlobalAccessGrant>, StoreError>;
}
