//! Roles, identity sources and the external-group to role mapping.
//!
//! Roles form a strict total order `admin > editor > viewer`. Every place
//! that compares roles (the group mapper, the reconciler, the effective-role
//! resolver) goes through the derived `Ord` on [`Role`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Access role, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access to documentation.
    Viewer,
    /// May upload new documentation versions.
    Editor,
    /// Full administrative access.
    Admin,
}

impl Role {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }

    /// Returns true if this role has admin privileges.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Returns true if this role may upload documentation.
    #[must_use]
    pub fn can_upload(&self) -> bool {
        *self >= Self::Editor
    }

    /// Returns the highest-priority role in `roles`, if any.
    #[must_use]
    pub fn highest(roles: impl IntoIterator<Item = Role>) -> Option<Role> {
        roles.into_iter().max()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError {
    /// The rejected input.
    pub value: String,
}

impl fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role: {}", self.value)
    }
}

impl std::error::Error for ParseRoleError {}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseRoleError {
                value: s.to_string(),
            }),
        }
    }
}

/// Where a user record authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    /// Local credential store.
    Local,
    /// Directory service (LDAP).
    Ldap,
    /// OAuth2/OIDC identity provider.
    Oidc,
}

impl AuthSource {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ldap => "ldap",
            Self::Oidc => "oidc",
        }
    }

    /// Returns the grant source that logins through this identity source maintain.
    #[must_use]
    pub fn access_source(&self) -> AccessSource {
        match self {
            Self::Local => AccessSource::Manual,
            Self::Ldap => AccessSource::Ldap,
            Self::Oidc => AccessSource::Oidc,
        }
    }
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthSource {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "ldap" => Ok(Self::Ldap),
            "oidc" => Ok(Self::Oidc),
            _ => Err(ParseRoleError {
                value: s.to_string(),
            }),
        }
    }
}

/// Origin of an access grant.
///
/// A user may hold independently-sourced grants on the same resource.
/// Only `Manual` grants are created by administrators; the others are
/// owned by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessSource {
    /// Granted by an administrator.
    Manual,
    /// Derived from directory group membership.
    Ldap,
    /// Derived from identity-provider group claims.
    Oidc,
}

impl AccessSource {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ldap => "ldap",
            Self::Oidc => "oidc",
        }
    }
}

impl fmt::Display for AccessSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessSource {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "ldap" => Ok(Self::Ldap),
            "oidc" => Ok(Self::Oidc),
            _ => Err(ParseRoleError {
                value: s.to_string(),
            }),
        }
    }
}

/// Compares group or subject names case-insensitively.
///
/// Uses full Unicode lowercasing, so `Ääni-Admins` matches `ääni-admins`.
#[must_use]
pub fn names_match(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Maps external group memberships to a global role.
///
/// All comparisons are case-insensitive. Resolution order:
/// 1. `admin_group` set and present: admin
/// 2. `editor_group` set and present: editor
/// 3. `viewer_group` set: viewer if present, otherwise denied
/// 4. `viewer_group` unset: every authenticated identity is a viewer
///
/// Returns `None` when the identity is denied.
#[must_use]
pub fn map_groups_to_role(
    memberships: &[String],
    admin_group: &str,
    editor_group: &str,
    viewer_group: &str,
) -> Option<Role> {
    let member_of = |group: &str| {
        !group.is_empty() && memberships.iter().any(|m| names_match(m, group))
    };

    if member_of(admin_group) {
        return Some(Role::Admin);
    }
    if member_of(editor_group) {
        return Some(Role::Editor);
    }
    if !viewer_group.is_empty() {
        return member_of(viewer_group).then_some(Role::Viewer);
    }
    Some(Role::Viewer)
}

/// The three configured group names of an external identity source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRoles {
    /// Group granting admin.
    #[serde(default)]
    pub admin_group: String,
    /// Group granting editor.
    #[serde(default)]
    pub editor_group: String,
    /// Group granting viewer; when set, membership becomes mandatory.
    #[serde(default)]
    pub viewer_group: String,
}

impl GroupRoles {
    /// Resolves `memberships` to a role, see [`map_groups_to_role`].
    #[must_use]
    pub fn resolve(&self, memberships: &[String]) -> Option<Role> {
        map_groups_to_role(
            memberships,
            &self.admin_group,
            &self.editor_group,
            &self.viewer_group,
        )
    }
}
