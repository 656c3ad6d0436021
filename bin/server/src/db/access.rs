//! Repositories for projects, grants, group mappings and global access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docshelf_access::{
    AccessSource, AuthGroupMapping, AuthSource, GlobalAccessGrant, GlobalAccessRule,
    GlobalAccessStore, GroupMappingStore, Project, ProjectAccess, ProjectAccessStore,
    ProjectStore, StoreError,
};
use docshelf_core::{GlobalAccessRuleId, GroupMappingId, ProjectId, UserId};
use sqlx::{FromRow, PgPool};

use super::{backend, decode, store_error};

#[derive(FromRow)]
struct ProjectRow {
    id: String,
    slug: String,
    visibility: String,
}

impl ProjectRow {
    fn try_into_project(self) -> Result<Project, StoreError> {
        Ok(Project {
            id: decode("project id", &self.id)?,
            slug: self.slug,
            visibility: decode("visibility", &self.visibility)?,
        })
    }
}

/// Read access to projects. Project administration lives elsewhere.
pub struct ProjectRepository {
    pool: PgPool,
}

impl ProjectRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectStore for ProjectRepository {
    async fn get(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        let row: Option<ProjectRow> =
            sqlx::query_as("SELECT id, slug, visibility FROM projects WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.map(ProjectRow::try_into_project).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Project>, StoreError> {
        let row: Option<ProjectRow> =
            sqlx::query_as("SELECT id, slug, visibility FROM projects WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.map(ProjectRow::try_into_project).transpose()
    }
}

#[derive(FromRow)]
struct AccessRow {
    project_id: String,
    user_id: String,
    role: String,
    source: String,
    updated_at: DateTime<Utc>,
}

impl AccessRow {
    fn try_into_access(self) -> Result<ProjectAccess, StoreError> {
        Ok(ProjectAccess {
            project_id: decode("project id", &self.project_id)?,
            user_id: decode("user id", &self.user_id)?,
            role: decode("role", &self.role)?,
            source: decode("access source", &self.source)?,
            updated_at: self.updated_at,
        })
    }
}

/// Per-project grants keyed by (project, user, source).
pub struct ProjectAccessRepository {
    pool: PgPool,
}

impl ProjectAccessRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectAccessStore for ProjectAccessRepository {
    async fn upsert(&self, access: &ProjectAccess) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO project_access (project_id, user_id, role, source, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (project_id, user_id, source)
            DO UPDATE SET role = EXCLUDED.role, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(access.project_id.to_string())
        .bind(access.user_id.to_string())
        .bind(access.role.as_str())
        .bind(access.source.as_str())
        .bind(access.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn revoke(
        &self,
        project_id: ProjectId,
        user_id: UserId,
        source: AccessSource,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM project_access WHERE project_id = $1 AND user_id = $2 AND source = $3",
        )
        .bind(project_id.to_string())
        .bind(user_id.to_string())
        .bind(source.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn list_for_user_source(
        &self,
        user_id: UserId,
        source: AccessSource,
    ) -> Result<Vec<ProjectAccess>, StoreError> {
        let rows: Vec<AccessRow> = sqlx::query_as(
            r#"
            SELECT project_id, user_id, role, source, updated_at
            FROM project_access
            WHERE user_id = $1 AND source = $2
            "#,
        )
        .bind(user_id.to_string())
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(AccessRow::try_into_access).collect()
    }

    async fn list_for_project_user(
        &self,
        project_id: ProjectId,
        user_id: UserId,
    ) -> Result<Vec<ProjectAccess>, StoreError> {
        let rows: Vec<AccessRow> = sqlx::query_as(
            r#"
            SELECT project_id, user_id, role, source, updated_at
            FROM project_access
            WHERE project_id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(AccessRow::try_into_access).collect()
    }
}

#[derive(FromRow)]
struct MappingRow {
    id: String,
    auth_source: String,
    group_name: String,
    project_id: String,
    role: String,
    from_config: bool,
}

impl MappingRow {
    fn try_into_mapping(self) -> Result<AuthGroupMapping, StoreError> {
        Ok(AuthGroupMapping {
            id: decode("group mapping id", &self.id)?,
            auth_source: decode("auth source", &self.auth_source)?,
            group: self.group_name,
            project_id: decode("project id", &self.project_id)?,
            role: decode("role", &self.role)?,
            from_config: self.from_config,
        })
    }
}

const MAPPING_COLUMNS: &str = "id, auth_source, group_name, project_id, role, from_config";

/// Group-to-project role mappings.
pub struct GroupMappingRepository {
    pool: PgPool,
}

impl GroupMappingRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupMappingStore for GroupMappingRepository {
    async fn list_for_source(&self, source: AuthSource) -> Result<Vec<AuthGroupMapping>, StoreError> {
        let rows: Vec<MappingRow> = sqlx::query_as(&format!(
            "SELECT {MAPPING_COLUMNS} FROM auth_group_mappings WHERE auth_source = $1"
        ))
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(MappingRow::try_into_mapping).collect()
    }

    async fn list_all(&self) -> Result<Vec<AuthGroupMapping>, StoreError> {
        let rows: Vec<MappingRow> =
            sqlx::query_as(&format!("SELECT {MAPPING_COLUMNS} FROM auth_group_mappings"))
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        rows.into_iter().map(MappingRow::try_into_mapping).collect()
    }

    async fn save(&self, mapping: &AuthGroupMapping) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO auth_group_mappings (id, auth_source, group_name, project_id, role, from_config)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET auth_source = EXCLUDED.auth_source,
                group_name = EXCLUDED.group_name,
                project_id = EXCLUDED.project_id,
                role = EXCLUDED.role,
                from_config = EXCLUDED.from_config
            "#,
        )
        .bind(mapping.id.to_string())
        .bind(mapping.auth_source.as_str())
        .bind(&mapping.group)
        .bind(mapping.project_id.to_string())
        .bind(mapping.role.as_str())
        .bind(mapping.from_config)
        .execute(&self.pool)
        .await
        .map_err(store_error("group mapping", &mapping.group))?;

        Ok(())
    }

    async fn delete(&self, id: GroupMappingId) -> Result<(), StoreError> {
        let from_config: Option<bool> =
            sqlx::query_scalar("SELECT from_config FROM auth_group_mappings WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        if from_config == Some(true) {
            return Err(StoreError::Protected {
                entity: "group mapping",
                key: id.to_string(),
            });
        }
        self.remove_config(id).await
    }

    async fn remove_config(&self, id: GroupMappingId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_group_mappings WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }
}

#[derive(FromRow)]
struct RuleRow {
    id: String,
    subject_type: String,
    subject: String,
    role: String,
    from_config: bool,
}

impl RuleRow {
    fn try_into_rule(self) -> Result<GlobalAccessRule, StoreError> {
        Ok(GlobalAccessRule {
            id: decode("global access rule id", &self.id)?,
            subject_type: decode("subject type", &self.subject_type)?,
            subject: self.subject,
            role: decode("role", &self.role)?,
            from_config: self.from_config,
        })
    }
}

#[derive(FromRow)]
struct GrantRow {
    user_id: String,
    role: String,
    source: String,
    updated_at: DateTime<Utc>,
}

impl GrantRow {
    fn try_into_grant(self) -> Result<GlobalAccessGrant, StoreError> {
        Ok(GlobalAccessGrant {
            user_id: decode("user id", &self.user_id)?,
            role: decode("role", &self.role)?,
            source: decode("access source", &self.source)?,
            updated_at: self.updated_at,
        })
    }
}

/// Global access rules and their materialised grants.
pub struct GlobalAccessRepository {
    pool: PgPool,
}

impl GlobalAccessRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GlobalAccessStore for GlobalAccessRepository {
    async fn list_rules(&self) -> Result<Vec<GlobalAccessRule>, StoreError> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT id, subject_type, subject, role, from_config FROM global_access_rules",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(RuleRow::try_into_rule).collect()
    }

    async fn save_rule(&self, rule: &GlobalAccessRule) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO global_access_rules (id, subject_type, subject, role, from_config)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET subject_type = EXCLUDED.subject_type,
                subject = EXCLUDED.subject,
                role = EXCLUDED.role,
                from_config = EXCLUDED.from_config
            "#,
        )
        .bind(rule.id.to_string())
        .bind(rule.subject_type.as_str())
        .bind(&rule.subject)
        .bind(rule.role.as_str())
        .bind(rule.from_config)
        .execute(&self.pool)
        .await
        .map_err(store_error("global access rule", &rule.subject))?;

        Ok(())
    }

    async fn delete_rule(&self, id: GlobalAccessRuleId) -> Result<(), StoreError> {
        let from_config: Option<bool> =
            sqlx::query_scalar("SELECT from_config FROM global_access_rules WHERE id = $1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        if from_config == Some(true) {
            return Err(StoreError::Protected {
                entity: "global access rule",
                key: id.to_string(),
            });
        }
        self.remove_config_rule(id).await
    }

    async fn remove_config_rule(&self, id: GlobalAccessRuleId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM global_access_rules WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn upsert_grant(&self, grant: &GlobalAccessGrant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO global_access_grants (user_id, role, source, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, source)
            DO UPDATE SET role = EXCLUDED.role, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(grant.user_id.to_string())
        .bind(grant.role.as_str())
        .bind(grant.source.as_str())
        .bind(grant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn delete_grant(&self, user_id: UserId, source: AccessSource) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM global_access_grants WHERE user_id = $1 AND source = $2")
            .bind(user_id.to_string())
            .bind(source.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn list_grants(&self, user_id: UserId) -> Result<Vec<GlobalAccessGrant>, StoreError> {
        let rows: Vec<GrantRow> = sqlx::query_as(
            "SELECT user_id, role, source, updated_at FROM global_access_grants WHERE user_id = $1",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(GrantRow::try_into_grant).collect()
    }
}
