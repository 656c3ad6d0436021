//! In-memory implementation of every store trait.
//!
//! Suitable for single-process deployments and tests. Writes to project
//! access grants are counted so idempotency can be observed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docshelf_core::{GlobalAccessRuleId, GroupMappingId, ProjectId, TokenId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::project::{AuthGroupMapping, GlobalAccessGrant, GlobalAccessRule, Project, ProjectAccess};
use crate::role::{AccessSource, AuthSource};
use crate::session::{Session, SessionId};
use crate::store::{
    GlobalAccessStore, GroupMappingStore, ProjectAccessStore, ProjectStore, SessionStore,
    TokenStore, UserStore,
};
use crate::token::ApiToken;
use crate::user::User;

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
    tokens: HashMap<TokenId, ApiToken>,
    projects: HashMap<ProjectId, Project>,
    access: HashMap<(ProjectId, UserId, AccessSource), ProjectAccess>,
    mappings: HashMap<GroupMappingId, AuthGroupMapping>,
    rules: HashMap<GlobalAccessRuleId, GlobalAccessRule>,
    grants: HashMap<(UserId, AccessSource), GlobalAccessGrant>,
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    access_writes: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a project. Project administration is outside this crate.
    pub async fn add_project(&self, project: Project) {
        self.state.write().await.projects.insert(project.id, project);
    }

    /// Number of project-access upserts and revocations performed so far.
    #[must_use]
    pub fn access_writes(&self) -> u64 {
        self.access_writes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Polls until `user` holds at least `count` project grants from
    /// `source`, for work that runs on a spawned task. Gives up after two
    /// seconds and returns whatever is there.
    pub(crate) async fn wait_for_grants(
        &self,
        user_id: UserId,
        source: AccessSource,
        count: usize,
    ) -> Vec<ProjectAccess> {
        let poll = async {
            loop {
                let rows = self
                    .list_for_user_source(user_id, source)
                    .await
                    .expect("list grants");
                if rows.len() >= count {
                    return rows;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        };
        match tokio::time::timeout(std::time::Duration::from_secs(2), poll).await {
            Ok(rows) => rows,
            Err(_) => self
                .list_for_user_source(user_id, source)
                .await
                .expect("list grants"),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username() == user.username()) {
            return Err(StoreError::Conflict {
                entity: "user",
                key: user.username().to_string(),
            });
        }
        state.users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.username() == username)
            .cloned())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let slot = state.users.get_mut(&user.id()).ok_or_else(|| StoreError::NotFound {
            entity: "user",
            key: user.id().to_string(),
        })?;
        *slot = user.clone();
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<(), StoreError> {
        self.state.write().await.users.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .sessions
            .insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.state.write().await.sessions.remove(id);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, s| s.expires_at() > now);
        Ok((before - state.sessions.len()) as u64)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create(&self, token: &ApiToken) -> Result<(), StoreError> {
        self.state.write().await.tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApiToken>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: TokenId) -> Result<(), StoreError> {
        self.state.write().await.tokens.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.state.read().await.projects.get(&id).cloned())
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Project>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .projects
            .values()
            .find(|p| p.slug == slug)
            .cloned())
    }
}

#[async_trait]
impl ProjectAccessStore for MemoryStore {
    async fn upsert(&self, access: &ProjectAccess) -> Result<(), StoreError> {
        self.state.write().await.access.insert(
            (access.project_id, access.user_id, access.source),
            access.clone(),
        );
        self.access_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn revoke(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        source: AccessSource,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .access
            .remove(&(project_id, user_id, source));
        self.access_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_for_user_source(
        &self,
        user_id: UserId,
        source: AccessSource,
    ) -> Result<Vec<ProjectAccess>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .access
            .values()
            .filter(|a| a.user_id == user_id && a.source == source)
            .cloned()
            .collect())
    }

    async fn list_for_project_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<ProjectAccess>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .access
            .values()
            .filter(|a| a.project_id == project_id && a.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GroupMappingStore for MemoryStore {
    async fn list_for_source(&self, source: AuthSource) -> Result<Vec<AuthGroupMapping>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .mappings
            .values()
            .filter(|m| m.auth_source == source)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<AuthGroupMapping>, StoreError> {
        Ok(self.state.read().await.mappings.values().cloned().collect())
    }

    async fn save(&self, mapping: &AuthGroupMapping) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .mappings
            .insert(mapping.id, mapping.clone());
        Ok(())
    }

    async fn delete(&self, id: GroupMappingId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.mappings.get(&id).is_some_and(|m| m.from_config) {
            return Err(StoreError::Protected {
                entity: "group mapping",
                key: id.to_string(),
            });
        }
        state.mappings.remove(&id);
        Ok(())
    }

    async fn remove_config(&self, id: GroupMappingId) -> Result<(), StoreError> {
        self.state.write().await.mappings.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl GlobalAccessStore for MemoryStore {
    async fn list_rules(&self) -> Result<Vec<GlobalAccessRule>, StoreError> {
        Ok(self.state.read().await.rules.values().cloned().collect())
    }

    async fn save_rule(&self, rule: &GlobalAccessRule) -> Result<(), StoreError> {
        self.state.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, id: GlobalAccessRuleId) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.rules.get(&id).is_some_and(|r| r.from_config) {
            return Err(StoreError::Protected {
                entity: "global access rule",
                key: id.to_string(),
            });
        }
        state.rules.remove(&id);
        Ok(())
    }

    async fn remove_config_rule(&self, id: GlobalAccessRuleId) -> Result<(), StoreError> {
        self.state.write().await.rules.remove(&id);
        Ok(())
    }

    async fn upsert_grant(&self, grant: &GlobalAccessGrant) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .grants
            .insert((grant.user_id, grant.source), grant.clone());
        Ok(())
    }

    async fn delete_grant(&self, user_id: UserId, source: AccessSource) -> Result<(), StoreError> {
        self.state.write().await.grants.remove(&(user_id, source));
        Ok(())
    }

    async fn list_grants(&self, user_id: UserId) -> Result<Vec<GlobalAccessGrant>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .grants
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Role;

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = MemoryStore::new();
        let alice = User::new("alice", AuthSource::Local, Role::Viewer);
        UserStore::create(&store, &alice).await.expect("first");

        let again = User::new("alice", AuthSource::Ldap, Role::Viewer);
        let err = UserStore::create(&store, &again).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn grants_are_unique_per_source() {
        let store = MemoryStore::new();
        let project = ProjectId::new();
        let user = UserId::new();

        store
            .upsert(&ProjectAccess::new(project, user, Role::Viewer, AccessSource::Manual))
            .await
            .expect("manual");
        store
            .upsert(&ProjectAccess::new(project, user, Role::Editor, AccessSource::Ldap))
            .await
            .expect("ldap");
        store
            .upsert(&ProjectAccess::new(project, user, Role::Admin, AccessSource::Ldap))
            .await
            .expect("ldap again");

        let rows = store.list_for_project_user(project, user).await.expect("list");
        assert_eq!(rows.len(), 2);
        assert_eq!(store.access_writes(), 3);
    }

    #[tokio::test]
    async fn config_mappings_are_protected_from_admin_delete() {
        let store = MemoryStore::new();
        let mapping =
            AuthGroupMapping::new(AuthSource::Ldap, "docs", ProjectId::new(), Role::Viewer)
                .from_config();
        store.save(&mapping).await.expect("save");

        let err = GroupMappingStore::delete(&store, mapping.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Protected { .. }));

        store.remove_config(mapping.id).await.expect("sync removal");
        assert!(store.list_all().await.expect("list").is_empty());
    }
}
