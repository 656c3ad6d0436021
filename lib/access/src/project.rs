//! Project, grant, and mapping records used for access decisions.

use chrono::{DateTime, Utc};
use docshelf_core::{GlobalAccessRuleId, GroupMappingId, ProjectId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::role::{AccessSource, AuthSource, ParseRoleError, Role, names_match};

/// Who can see a project without a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Viewable by anyone, authenticated or not.
    Public,
    /// Viewable through a per-project grant or a global access grant.
    Private,
}

impl Visibility {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            _ => Err(ParseRoleError {
                value: s.to_string(),
            }),
        }
    }
}

/// A hosted documentation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// URL-safe unique name.
    pub slug: String,
    pub visibility: Visibility,
}

impl Project {
    /// Creates a project with a generated ID.
    #[must_use]
    pub fn new(slug: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            id: ProjectId::new(),
            slug: slug.into(),
            visibility,
        }
    }
}

/// A per-project role grant, unique per (project, user, source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectAccess {
    pub project_id: ProjectId,
    pub user_id: UserId,
    pub role: Role,
    pub source: AccessSource,
    pub updated_at: DateTime<Utc>,
}

impl ProjectAccess {
    #[must_use]
    pub fn new(project_id: ProjectId, user_id: UserId, role: Role, source: AccessSource) -> Self {
        Self {
            project_id,
            user_id,
            role,
            source,
            updated_at: Utc::now(),
        }
    }
}

/// Associates an external group with a role on a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGroupMapping {
    pub id: GroupMappingId,
    /// The identity source whose groups this mapping matches.
    pub auth_source: AuthSource,
    /// External group identifier (a DN for LDAP, a claim value for OIDC).
    pub group: String,
    pub project_id: ProjectId,
    pub role: Role,
    /// Rows declared in configuration are synchronised at startup and cannot
    /// be deleted through the administrative interface.
    pub from_config: bool,
}

impl AuthGroupMapping {
    #[must_use]
    pub fn new(
        auth_source: AuthSource,
        group: impl Into<String>,
        project_id: ProjectId,
        role: Role,
    ) -> Self {
        Self {
            id: GroupMappingId::new(),
            auth_source,
            group: group.into(),
            project_id,
            role,
            from_config: false,
        }
    }

    /// Marks the mapping as declared in configuration.
    #[must_use]
    pub fn from_config(mut self) -> Self {
        self.from_config = true;
        self
    }

    /// Returns true if this mapping selects the same (source, group, project).
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.auth_source == other.auth_source
            && names_match(&self.group, &other.group)
            && self.project_id == other.project_id
    }
}

/// What a global access rule matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// A specific username.
    User,
    /// A directory-service group.
    LdapGroup,
    /// An identity-provider group.
    OidcGroup,
}

impl SubjectType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::LdapGroup => "ldap_group",
            Self::OidcGroup => "oidc_group",
        }
    }

    /// Returns the group subject type matched by logins through `source`.
    #[must_use]
    pub fn group_for(source: AuthSource) -> Option<Self> {
        match source {
            AuthSource::Local => None,
            AuthSource::Ldap => Some(Self::LdapGroup),
            AuthSource::Oidc => Some(Self::OidcGroup),
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "ldap_group" => Ok(Self::LdapGroup),
            "oidc_group" => Ok(Self::OidcGroup),
            _ => Err(ParseRoleError {
                value: s.to_string(),
            }),
        }
    }
}

/// Grants a role on every private project to a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalAccessRule {
    pub id: GlobalAccessRuleId,
    pub subject_type: SubjectType,
    pub subject: String,
    pub role: Role,
    pub from_config: bool,
}

impl GlobalAccessRule {
    #[must_use]
    pub fn new(subject_type: SubjectType, subject: impl Into<String>, role: Role) -> Self {
        Self {
            id: GlobalAccessRuleId::new(),
            subject_type,
            subject: subject.into(),
            role,
            from_config: false,
        }
    }

    /// Marks the rule as declared in configuration.
    #[must_use]
    pub fn from_config(mut self) -> Self {
        self.from_config = true;
        self
    }

    /// Returns true if this rule selects the same subject.
    #[must_use]
    pub fn same_subject(&self, other: &Self) -> bool {
        self.subject_type == other.subject_type && names_match(&self.subject, &other.subject)
    }
}

/// The materialised result of global access rules for one (user, source).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalAccessGrant {
    pub user_id: UserId,
    pub role: Role,
    pub source: AccessSource,
    pub updated_at: DateTime<Utc>,
}

impl GlobalAccessGrant {
    #[must_use]
    pub fn new(user_id: UserId, role: Role, source: AccessSource) -> Self {
        Self {
            user_id,
            role,
            source,
            updated_at: Utc::now(),
        }
    }
}
