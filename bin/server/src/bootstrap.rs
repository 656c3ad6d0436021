//! Startup tasks: configuration sync and the initial local admin.

use docshelf_access::{
    AuthGroupMapping, AuthSource, GlobalAccessRule, PasswordHashError, ProjectStore, Role,
    StoreError, SyncOutcome, User, UserStore, hash_password, sync_config_global_rules,
    sync_config_group_mappings,
};
use std::fmt;
use tracing::{info, warn};

use crate::auth::Stores;
use crate::config::{GlobalAccessRuleConfig, GroupMappingConfig};

/// Failures while preparing stores at startup.
#[derive(Debug)]
pub enum BootstrapError {
    Store(StoreError),
    PasswordHash(PasswordHashError),
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "bootstrap store error: {err}"),
            Self::PasswordHash(err) => write!(f, "bootstrap failed: {err}"),
        }
    }
}

impl std::error::Error for BootstrapError {}

impl From<StoreError> for BootstrapError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<PasswordHashError> for BootstrapError {
    fn from(err: PasswordHashError) -> Self {
        Self::PasswordHash(err)
    }
}

/// Resolves configured mappings to project IDs.
///
/// Mappings naming an unknown project slug are skipped with a warning.
pub async fn resolve_group_mappings(
    projects: &dyn ProjectStore,
    configured: &[GroupMappingConfig],
) -> Result<Vec<AuthGroupMapping>, StoreError> {
    let mut mappings = Vec::with_capacity(configured.len());
    for entry in configured {
        let Some(project) = projects.get_by_slug(&entry.project).await? else {
            warn!(
                project = %entry.project,
                group = %entry.group,
                "group mapping names an unknown project; skipping"
            );
            continue;
        };
        mappings.push(
            AuthGroupMapping::new(entry.source, entry.group.clone(), project.id, entry.role)
                .from_config(),
        );
    }
    Ok(mappings)
}

#[must_use]
pub fn global_rules(configured: &[GlobalAccessRuleConfig]) -> Vec<GlobalAccessRule> {
    configured
        .iter()
        .map(|entry| {
            GlobalAccessRule::new(entry.subject_type, entry.subject.clone(), entry.role).from_config()
        })
        .collect()
}

/// Converges configuration-managed mappings and rules in the stores.
pub async fn sync_config(
    stores: &Stores,
    group_mappings: &[GroupMappingConfig],
    global_access_rules: &[GlobalAccessRuleConfig],
) -> docshelf_core::Result<(SyncOutcome, SyncOutcome), StoreError> {
    let mappings = resolve_group_mappings(stores.projects.as_ref(), group_mappings).await?;
    let mapping_outcome = sync_config_group_mappings(stores.mappings.as_ref(), &mappings).await?;
    let rule_outcome =
        sync_config_global_rules(stores.global.as_ref(), &global_rules(global_access_rules)).await?;
    Ok((mapping_outcome, rule_outcome))
}

/// Creates a local admin named `username` unless that user already exists.
///
/// Returns true if a user was created. An existing user is never modified.
pub async fn ensure_local_admin(
    users: &dyn UserStore,
    username: &str,
    password: &str,
) -> Result<bool, BootstrapError> {
    if users.get_by_username(username).await?.is_some() {
        info!(username = %username, "bootstrap admin already exists");
        return Ok(false);
    }

    let mut admin = User::new(username, AuthSource::Local, Role::Admin);
    admin.set_password_hash(Some(hash_password(password)?));
    users.create(&admin).await?;
    info!(username = %username, "bootstrap admin created");
    Ok(true)
}
