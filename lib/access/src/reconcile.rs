//! Converges group-derived grants to current external group membership.
//!
//! Reconciliation is full-state and scoped to one (user, source) pair, so it
//! is idempotent and concurrent runs for different pairs never touch the
//! same rows. Manual grants are never modified.

use docshelf_core::{ProjectId, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::StoreError;
use crate::project::{AuthGroupMapping, GlobalAccessGrant, GlobalAccessRule, ProjectAccess, SubjectType};
use crate::role::{AccessSource, AuthSource, Role, names_match};
use crate::store::{GlobalAccessStore, GroupMappingStore, ProjectAccessStore};
use crate::user::User;

/// Writes performed by one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Project grants inserted or changed.
    pub granted: usize,
    /// Project grants removed.
    pub revoked: usize,
    /// Whether the global access grant was written or removed.
    pub global_changed: bool,
}

impl ReconcileOutcome {
    /// Total number of store writes.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.granted + self.revoked + usize::from(self.global_changed)
    }
}

/// Computes the highest role each project is owed from `memberships`.
#[must_use]
pub fn desired_project_roles(
    mappings: &[AuthGroupMapping],
    memberships: &[String],
) -> HashMap<ProjectId, Role> {
    let mut desired: HashMap<ProjectId, Role> = HashMap::new();
    for mapping in mappings {
        if !memberships
            .iter()
            .any(|m| names_match(m, &mapping.group))
        {
            continue;
        }
        desired
            .entry(mapping.project_id)
            .and_modify(|role| *role = (*role).max(mapping.role))
            .or_insert(mapping.role);
    }
    desired
}

/// Computes the global private-project role owed to `username` logging in
/// through `source` with `memberships`.
#[must_use]
pub fn desired_global_role(
    rules: &[GlobalAccessRule],
    username: &str,
    source: AuthSource,
    memberships: &[String],
) -> Option<Role> {
    let group_type = SubjectType::group_for(source);
    Role::highest(rules.iter().filter_map(|rule| {
        let matches = match rule.subject_type {
            SubjectType::User => names_match(&rule.subject, username),
            group => {
                Some(group) == group_type
                    && memberships
                        .iter()
                        .any(|m| names_match(m, &rule.subject))
            }
        };
        matches.then_some(rule.role)
    }))
}

/// Reconciles project and global grants for one user and source.
pub struct AccessReconciler {
    mappings: Arc<dyn GroupMappingStore>,
    access: Arc<dyn ProjectAccessStore>,
    global: Arc<dyn GlobalAccessStore>,
}

impl AccessReconciler {
    #[must_use]
    pub fn new(
        mappings: Arc<dyn GroupMappingStore>,
        access: Arc<dyn ProjectAccessStore>,
        global: Arc<dyn GlobalAccessStore>,
    ) -> Self {
        Self {
            mappings,
            access,
            global,
        }
    }

    /// Runs project and global reconciliation for a login.
    #[instrument(skip(self, user, memberships), fields(user_id = %user.id(), source = %source))]
    pub async fn reconcile(
        &self,
        user: &User,
        source: AuthSource,
        memberships: &[String],
    ) -> Result<ReconcileOutcome, StoreError> {
        let mut outcome = self.reconcile_projects(user, source, memberships).await?;
        outcome.global_changed = self.reconcile_global(user, source, memberships).await?;
        debug!(
            granted = outcome.granted,
            revoked = outcome.revoked,
            global_changed = outcome.global_changed,
            "reconciliation finished"
        );
        Ok(outcome)
    }

    /// Converges the user's project grants attributed to `source`.
    ///
    /// Local logins own no group-derived grants, so this is a no-op for them.
    pub async fn reconcile_projects(
        &self,
        user: &User,
        source: AuthSource,
        memberships: &[String],
    ) -> Result<ReconcileOutcome, StoreError> {
        let mut outcome = ReconcileOutcome::default();
        if source == AuthSource::Local {
            return Ok(outcome);
        }
        let access_source = source.access_source();

        let mappings = self.mappings.list_for_source(source).await?;
        let desired = desired_project_roles(&mappings, memberships);

        let current: HashMap<ProjectId, Role> = self
            .access
            .list_for_user_source(user.id(), access_source)
            .await?
            .into_iter()
            .map(|row| (row.project_id, row.role))
            .collect();

        for (project_id, role) in &desired {
            if current.get(project_id) == Some(role) {
                continue;
            }
            self.access
                .upsert(&ProjectAccess::new(*project_id, user.id(), *role, access_source))
                .await?;
            outcome.granted += 1;
        }

        for project_id in current.keys() {
            if desired.contains_key(project_id) {
                continue;
            }
            self.access
                .revoke(*project_id, user.id(), access_source)
                .await?;
            outcome.revoked += 1;
        }

        Ok(outcome)
    }

    /// Converges the user's global access grant for `source`.
    ///
    /// Returns true if a write happened.
    pub async fn reconcile_global(
        &self,
        user: &User,
        source: AuthSource,
        memberships: &[String],
    ) -> Result<bool, StoreError> {
        let access_source = source.access_source();
        let rules = self.global.list_rules().await?;
        let desired = desired_global_role(&rules, user.username(), source, memberships);

        let current = self
            .global
            .list_grants(user.id())
            .await?
            .into_iter()
            .find(|g| g.source == access_source)
            .map(|g| g.role);

        match (desired, current) {
            (Some(want), Some(have)) if want == have => Ok(false),
            (Some(want), _) => {
                self.global
                    .upsert_grant(&GlobalAccessGrant::new(user.id(), want, access_source))
                    .await?;
                Ok(true)
            }
            (None, Some(_)) => {
                self.global.delete_grant(user.id(), access_source).await?;
                Ok(true)
            }
            (None, None) => Ok(false),
        }
    }

    /// Runs [`reconcile`](Self::reconcile) in the background.
    ///
    /// Failures are logged and never reach the login that triggered them.
    pub fn spawn(
        self: &Arc<Self>,
        user: User,
        source: AuthSource,
        memberships: Vec<String>,
    ) -> JoinHandle<()> {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(report) = reconciler.reconcile(&user, source, &memberships).await {
                warn!(
                    user_id = %user.id(),
                    source = %source,
                    error = %report,
                    "access reconciliation failed"
                );
            }
        })
    }
}

/// Rows written by a configuration sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub saved: usize,
    pub removed: usize,
}

/// A row that configuration can own.
trait ConfigRow: Clone {
    fn same_key(&self, other: &Self) -> bool;
    fn role_mut(&mut self) -> &mut Role;
    fn mark_config(&mut self);
}

impl ConfigRow for AuthGroupMapping {
    fn same_key(&self, other: &Self) -> bool {
        self.same_target(other)
    }

    fn role_mut(&mut self) -> &mut Role {
        &mut self.role
    }

    fn mark_config(&mut self) {
        self.from_config = true;
    }
}

impl ConfigRow for GlobalAccessRule {
    fn same_key(&self, other: &Self) -> bool {
        self.same_subject(other)
    }

    fn role_mut(&mut self) -> &mut Role {
        &mut self.role
    }

    fn mark_config(&mut self) {
        self.from_config = true;
    }
}

/// Collapses declared entries sharing a key into one with the highest role.
/// Every kept entry is marked as configuration-managed.
fn dedup_declared<T: ConfigRow>(declared: &[T]) -> Vec<T> {
    let mut wanted: Vec<T> = Vec::with_capacity(declared.len());
    for want in declared {
        let mut row = want.clone();
        match wanted.iter_mut().find(|kept| kept.same_key(want)) {
            Some(kept) => {
                let role = kept.role_mut();
                *role = (*role).max(*row.role_mut());
            }
            None => {
                row.mark_config();
                wanted.push(row);
            }
        }
    }
    wanted
}

/// Converges configuration-managed group mappings to `declared`.
///
/// A declared mapping keeps the ID of any existing row with the same
/// (source, group, project). A manual row for that target is adopted and
/// becomes configuration-managed. Other manual rows are left alone.
/// Declared duplicates collapse to one row with the highest role.
pub async fn sync_config_group_mappings(
    store: &dyn GroupMappingStore,
    declared: &[AuthGroupMapping],
) -> Result<SyncOutcome, StoreError> {
    let existing = store.list_all().await?;
    let wanted = dedup_declared(declared);
    if wanted.len() < declared.len() {
        warn!(
            duplicates = declared.len() - wanted.len(),
            "duplicate group mappings in configuration collapsed"
        );
    }
    let mut outcome = SyncOutcome::default();

    for mut row in wanted.iter().cloned() {
        if let Some(have) = existing.iter().find(|have| have.same_target(&row)) {
            if have.from_config && have.role == row.role {
                continue;
            }
            if !have.from_config {
                info!(mapping_id = %have.id, group = %have.group, "adopting manual group mapping");
            }
            row.id = have.id;
        }
        store.save(&row).await?;
        outcome.saved += 1;
    }

    for have in existing.iter().filter(|m| m.from_config) {
        if wanted.iter().any(|want| want.same_target(have)) {
            continue;
        }
        store.remove_config(have.id).await?;
        outcome.removed += 1;
    }

    info!(saved = outcome.saved, removed = outcome.removed, "group mappings synchronised");
    Ok(outcome)
}

/// Converges configuration-managed global access rules to `declared`.
///
/// Follows the same adoption and duplicate rules as
/// [`sync_config_group_mappings`], keyed on (subject type, subject).
pub async fn sync_config_global_rules(
    store: &dyn GlobalAccessStore,
    declared: &[GlobalAccessRule],
) -> Result<SyncOutcome, StoreError> {
    let existing = store.list_rules().await?;
    let wanted = dedup_declared(declared);
    if wanted.len() < declared.len() {
        warn!(
            duplicates = declared.len() - wanted.len(),
            "duplicate global access rules in configuration collapsed"
        );
    }
    let mut outcome = SyncOutcome::default();

    for mut rule in wanted.iter().cloned() {
        if let Some(have) = existing.iter().find(|have| have.same_subject(&rule)) {
            if have.from_config && have.role == rule.role {
                continue;
            }
            if !have.from_config {
                info!(rule_id = %have.id, subject = %have.subject, "adopting manual global access rule");
            }
            rule.id = have.id;
        }
        store.save_rule(&rule).await?;
        outcome.saved += 1;
    }

    for have in existing.iter().filter(|r| r.from_config) {
        if wanted.iter().any(|want| want.same_subject(have)) {
            continue;
        }
        store.remove_config_rule(have.id).await?;
        outcome.removed += 1;
    }

    info!(saved = outcome.saved, removed = outcome.removed, "global access rules synchronised");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn reconciler(store: &Arc<MemoryStore>) -> AccessReconciler {
        AccessReconciler::new(store.clone(), store.clone(), store.clone())
    }

    async fn project_role(store: &MemoryStore, project: ProjectId, user: &User) -> Option<Role> {
        store
            .list_for_user_source(user.id(), AccessSource::Ldap)
            .await
            .expect("list")
            .into_iter()
            .find(|a| a.project_id == project)
            .map(|a| a.role)
    }

    #[test]
    fn desired_roles_take_the_highest_mapping() {
        let p1 = ProjectId::new();
        let mappings = vec![
            AuthGroupMapping::new(AuthSource::Ldap, "G1", p1, Role::Editor),
            AuthGroupMapping::new(AuthSource::Ldap, "G2", p1, Role::Viewer),
        ];
        let desired = desired_project_roles(&mappings, &groups(&["g1", "g2"]));
        assert_eq!(desired.get(&p1), Some(&Role::Editor));
    }

    #[test]
    fn global_role_combines_user_and_group_rules() {
        let rules = vec![
            GlobalAccessRule::new(SubjectType::User, "alice", Role::Viewer),
            GlobalAccessRule::new(SubjectType::LdapGroup, "staff", Role::Editor),
            GlobalAccessRule::new(SubjectType::OidcGroup, "staff", Role::Admin),
        ];
        let role = desired_global_role(&rules, "Alice", AuthSource::Ldap, &groups(&["STAFF"]));
        assert_eq!(role, Some(Role::Editor));

        let role = desired_global_role(&rules, "alice", AuthSource::Local, &groups(&["staff"]));
        assert_eq!(role, Some(Role::Viewer));

        let role = desired_global_role(&rules, "bob", AuthSource::Local, &[]);
        assert_eq!(role, None);
    }

    #[tokio::test]
    async fn grants_follow_membership_and_revoke_when_it_disappears() {
        let store = Arc::new(MemoryStore::new());
        let p1 = ProjectId::new();
        store
            .save(&AuthGroupMapping::new(AuthSource::Ldap, "G1", p1, Role::Editor))
            .await
            .expect("save");
        store
            .save(&AuthGroupMapping::new(AuthSource::Ldap, "G2", p1, Role::Viewer))
            .await
            .expect("save");
        let user = User::new("alice", AuthSource::Ldap, Role::Viewer);
        let reconciler = reconciler(&store);

        reconciler
            .reconcile(&user, AuthSource::Ldap, &groups(&["G1", "G2"]))
            .await
            .expect("reconcile");
        assert_eq!(project_role(&store, p1, &user).await, Some(Role::Editor));

        // G2 alone still maps P1 to viewer.
        reconciler
            .reconcile(&user, AuthSource::Ldap, &groups(&["G2"]))
            .await
            .expect("reconcile");
        assert_eq!(project_role(&store, p1, &user).await, Some(Role::Viewer));

        reconciler
            .reconcile(&user, AuthSource::Ldap, &[])
            .await
            .expect("reconcile");
        assert_eq!(project_role(&store, p1, &user).await, None);
    }

    #[tokio::test]
    async fn leaving_the_only_mapped_group_revokes_access() {
        let store = Arc::new(MemoryStore::new());
        let p1 = ProjectId::new();
        store
            .save(&AuthGroupMapping::new(AuthSource::Ldap, "G1", p1, Role::Editor))
            .await
            .expect("save");
        store
            .save(&AuthGroupMapping::new(AuthSource::Ldap, "G2", p1, Role::Viewer))
            .await
            .expect("save");
        let user = User::new("alice", AuthSource::Ldap, Role::Viewer);
        let reconciler = reconciler(&store);

        reconciler
            .reconcile(&user, AuthSource::Ldap, &groups(&["G1", "other"]))
            .await
            .expect("reconcile");
        assert_eq!(project_role(&store, p1, &user).await, Some(Role::Editor));

        let outcome = reconciler
            .reconcile(&user, AuthSource::Ldap, &groups(&["other"]))
            .await
            .expect("reconcile");
        assert_eq!(outcome.revoked, 1);
        assert_eq!(project_role(&store, p1, &user).await, None);
    }

    #[tokio::test]
    async fn reconciling_twice_writes_nothing_the_second_time() {
        let store = Arc::new(MemoryStore::new());
        let p1 = ProjectId::new();
        let p2 = ProjectId::new();
        store
            .save(&AuthGroupMapping::new(AuthSource::Ldap, "G1", p1, Role::Editor))
            .await
            .expect("save");
        store
            .save(&AuthGroupMapping::new(AuthSource::Ldap, "G2", p2, Role::Viewer))
            .await
            .expect("save");
        store
            .save_rule(&GlobalAccessRule::new(SubjectType::LdapGroup, "G1", Role::Viewer))
            .await
            .expect("rule");
        let user = User::new("alice", AuthSource::Ldap, Role::Viewer);
        let reconciler = reconciler(&store);
        let memberships = groups(&["G1", "G2"]);

        let first = reconciler
            .reconcile(&user, AuthSource::Ldap, &memberships)
            .await
            .expect("first");
        assert_eq!(first.granted, 2);
        assert!(first.global_changed);
        let writes_after_first = store.access_writes();

        let second = reconciler
            .reconcile(&user, AuthSource::Ldap, &memberships)
            .await
            .expect("second");
        assert_eq!(second.writes(), 0);
        assert_eq!(store.access_writes(), writes_after_first);
    }

    #[tokio::test]
    async fn manual_and_other_source_grants_are_untouched() {
        let store = Arc::new(MemoryStore::new());
        let p1 = ProjectId::new();
        let user = User::new("alice", AuthSource::Ldap, Role::Viewer);
        store
            .upsert(&ProjectAccess::new(p1, user.id(), Role::Viewer, AccessSource::Manual))
            .await
            .expect("manual");
        store
            .upsert(&ProjectAccess::new(p1, user.id(), Role::Admin, AccessSource::Oidc))
            .await
            .expect("oidc");

        reconciler(&store)
            .reconcile(&user, AuthSource::Ldap, &[])
            .await
            .expect("reconcile");

        let rows = store.list_for_project_user(p1, user.id()).await.expect("list");
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn local_login_never_touches_manual_project_grants() {
        let store = Arc::new(MemoryStore::new());
        let p1 = ProjectId::new();
        let user = User::new("alice", AuthSource::Local, Role::Viewer);
        store
            .upsert(&ProjectAccess::new(p1, user.id(), Role::Editor, AccessSource::Manual))
            .await
            .expect("manual");

        let outcome = reconciler(&store)
            .reconcile_projects(&user, AuthSource::Local, &[])
            .await
            .expect("reconcile");
        assert_eq!(outcome.writes(), 0);
        assert_eq!(
            store.list_for_project_user(p1, user.id()).await.expect("list").len(),
            1
        );
    }

    #[tokio::test]
    async fn global_grant_is_removed_when_rules_stop_matching() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_rule(&GlobalAccessRule::new(SubjectType::OidcGroup, "staff", Role::Editor))
            .await
            .expect("rule");
        let user = User::new("alice", AuthSource::Oidc, Role::Viewer);
        let reconciler = reconciler(&store);

        assert!(
            reconciler
                .reconcile_global(&user, AuthSource::Oidc, &groups(&["staff"]))
                .await
                .expect("grant")
        );
        assert_eq!(store.list_grants(user.id()).await.expect("list").len(), 1);

        assert!(
            reconciler
                .reconcile_global(&user, AuthSource::Oidc, &[])
                .await
                .expect("revoke")
        );
        assert!(store.list_grants(user.id()).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn config_sync_converges_and_spares_manual_rows() {
        let store = MemoryStore::new();
        let project = ProjectId::new();
        let manual = AuthGroupMapping::new(AuthSource::Ldap, "manual", project, Role::Viewer);
        store.save(&manual).await.expect("manual");

        let declared = vec![
            AuthGroupMapping::new(AuthSource::Ldap, "docs", project, Role::Viewer),
            AuthGroupMapping::new(AuthSource::Oidc, "docs", project, Role::Editor),
        ];
        let first = sync_config_group_mappings(&store, &declared).await.expect("sync");
        assert_eq!(first, SyncOutcome { saved: 2, removed: 0 });

        let again = sync_config_group_mappings(&store, &declared).await.expect("sync");
        assert_eq!(again, SyncOutcome::default());

        let first_config_id = store
            .list_for_source(AuthSource::Ldap)
            .await
            .expect("list")
            .into_iter()
            .find(|m| m.from_config)
            .map(|m| m.id);

        let changed = vec![AuthGroupMapping::new(
            AuthSource::Ldap,
            "DOCS",
            project,
            Role::Admin,
        )];
        let outcome = sync_config_group_mappings(&store, &changed).await.expect("sync");
        assert_eq!(outcome, SyncOutcome { saved: 1, removed: 1 });

        let all = store.list_all().await.expect("list");
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|m| m.id == manual.id));
        let config_row = all.iter().find(|m| m.from_config).expect("config row");
        assert_eq!(Some(config_row.id), first_config_id);
        assert_eq!(config_row.role, Role::Admin);
    }

    #[tokio::test]
    async fn config_sync_adopts_manual_mapping_for_the_same_target() {
        let store = MemoryStore::new();
        let project = ProjectId::new();
        let manual = AuthGroupMapping::new(AuthSource::Ldap, "docs", project, Role::Viewer);
        store.save(&manual).await.expect("manual");

        let declared = vec![AuthGroupMapping::new(AuthSource::Ldap, "Docs", project, Role::Editor)];
        let outcome = sync_config_group_mappings(&store, &declared).await.expect("sync");
        assert_eq!(outcome, SyncOutcome { saved: 1, removed: 0 });

        let all = store.list_all().await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, manual.id);
        assert!(all[0].from_config);
        assert_eq!(all[0].role, Role::Editor);

        let again = sync_config_group_mappings(&store, &declared).await.expect("sync");
        assert_eq!(again, SyncOutcome::default());
    }

    #[tokio::test]
    async fn duplicate_declared_mappings_collapse_to_the_highest_role() {
        let store = MemoryStore::new();
        let project = ProjectId::new();
        let declared = vec![
            AuthGroupMapping::new(AuthSource::Oidc, "staff", project, Role::Viewer),
            AuthGroupMapping::new(AuthSource::Oidc, "STAFF", project, Role::Editor),
        ];

        let outcome = sync_config_group_mappings(&store, &declared).await.expect("sync");
        assert_eq!(outcome, SyncOutcome { saved: 1, removed: 0 });

        let all = store.list_all().await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].role, Role::Editor);
    }

    #[tokio::test]
    async fn rule_sync_adopts_manual_rules_and_collapses_duplicates() {
        let store = MemoryStore::new();
        let manual = GlobalAccessRule::new(SubjectType::User, "auditor", Role::Viewer);
        store.save_rule(&manual).await.expect("manual");

        let declared = vec![
            GlobalAccessRule::new(SubjectType::User, "Auditor", Role::Viewer),
            GlobalAccessRule::new(SubjectType::LdapGroup, "staff", Role::Viewer),
            GlobalAccessRule::new(SubjectType::LdapGroup, "staff", Role::Admin),
        ];
        let outcome = sync_config_global_rules(&store, &declared).await.expect("sync");
        assert_eq!(outcome, SyncOutcome { saved: 2, removed: 0 });

        let rules = store.list_rules().await.expect("list");
        assert_eq!(rules.len(), 2);
        let auditor = rules.iter().find(|r| r.subject_type == SubjectType::User).expect("user rule");
        assert_eq!(auditor.id, manual.id);
        assert!(auditor.from_config);
        let staff = rules
            .iter()
            .find(|r| r.subject_type == SubjectType::LdapGroup)
            .expect("group rule");
        assert_eq!(staff.role, Role::Admin);
    }

    #[tokio::test]
    async fn global_rule_sync_removes_stale_config_rules() {
        let store = MemoryStore::new();
        let declared = vec![
            GlobalAccessRule::new(SubjectType::User, "alice", Role::Viewer),
            GlobalAccessRule::new(SubjectType::LdapGroup, "staff", Role::Editor),
        ];
        sync_config_global_rules(&store, &declared).await.expect("sync");

        let outcome = sync_config_global_rules(&store, &declared[..1]).await.expect("sync");
        assert_eq!(outcome, SyncOutcome { saved: 0, removed: 1 });
        assert_eq!(store.list_rules().await.expect("list").len(), 1);
    }
}
