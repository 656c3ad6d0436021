//! Effective role resolution and view/upload decisions.
//!
//! The effective role on a project is the highest role across all grant
//! sources. Private projects additionally honour the user's global access
//! grants. Public projects are viewable by everyone.

use docshelf_core::ProjectId;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{AuthorizationError, StoreError};
use crate::project::{Project, Visibility};
use crate::role::Role;
use crate::store::{GlobalAccessStore, ProjectAccessStore};
use crate::user::User;

/// Answers "what may this user do on this project".
#[derive(Clone)]
pub struct AccessResolver {
    access: Arc<dyn ProjectAccessStore>,
    global: Arc<dyn GlobalAccessStore>,
}

impl AccessResolver {
    #[must_use]
    pub fn new(access: Arc<dyn ProjectAccessStore>, global: Arc<dyn GlobalAccessStore>) -> Self {
        Self { access, global }
    }

    /// Highest role across every per-project grant, or `None`.
    pub async fn effective_role(
        &self,
        project_id: ProjectId,
        user: &User,
    ) -> Result<Option<Role>, StoreError> {
        let rows = self.access.list_for_project_user(project_id, user.id()).await?;
        Ok(Role::highest(rows.into_iter().map(|row| row.role)))
    }

    /// Highest role across the user's global access grants, or `None`.
    pub async fn global_role(&self, user: &User) -> Result<Option<Role>, StoreError> {
        let grants = self.global.list_grants(user.id()).await?;
        Ok(Role::highest(grants.into_iter().map(|g| g.role)))
    }

    /// Role used for access decisions on `project`.
    ///
    /// Private projects take the higher of the per-project and global roles.
    #[instrument(skip(self, project, user), fields(project = %project.slug, user_id = %user.id()))]
    pub async fn project_role(
        &self,
        project: &Project,
        user: &User,
    ) -> Result<Option<Role>, StoreError> {
        let per_project = self.effective_role(project.id, user).await?;
        let role = match project.visibility {
            Visibility::Public => per_project,
            Visibility::Private => per_project.max(self.global_role(user).await?),
        };
        debug!(role = ?role, "resolved project role");
        Ok(role)
    }

    /// Returns true if `user` (or an anonymous visitor) may read `project`.
    pub async fn can_view(&self, project: &Project, user: Option<&User>) -> Result<bool, StoreError> {
        if project.visibility == Visibility::Public {
            return Ok(true);
        }
        let Some(user) = user else {
            return Ok(false);
        };
        if user.is_admin() {
            return Ok(true);
        }
        Ok(self.project_role(project, user).await?.is_some())
    }

    /// Returns true if `user` may upload new versions of `project`.
    pub async fn can_upload(&self, project: &Project, user: &User) -> Result<bool, StoreError> {
        if user.is_admin() {
            return Ok(true);
        }
        Ok(self
            .project_role(project, user)
            .await?
            .is_some_and(|role| role.can_upload()))
    }

    /// Fails with `PermissionDenied` unless `user` may upload to `project`.
    pub async fn require_upload(&self, project: &Project, user: &User) -> Result<(), AuthorizationError> {
        if self.can_upload(project, user).await? {
            return Ok(());
        }
        Err(AuthorizationError::PermissionDenied {
            user_id: user.id(),
            action: "upload".to_string(),
            resource: format!("project:{}", project.slug),
        })
    }
}
