//! Identity and access control for docshelf.
//!
//! This crate provides:
//! - Users, roles and the group-to-role mapper (`User`, `Role`, `GroupRoles`)
//! - Local, directory and identity-provider authenticators (`authn`)
//! - Browser sessions and API tokens (`SessionService`, `TokenAuthenticator`)
//! - One-time CSRF states for the provider redirect flow (`CsrfStateStore`)
//! - Group-derived access reconciliation (`AccessReconciler`)
//! - Effective role resolution (`AccessResolver`)
//!
//! # Access Control Model
//!
//! A user's role on a project is the highest role across every grant source.
//! Grants sourced from the directory or the identity provider are owned by the
//! reconciler and follow group membership at each login; manual grants are
//! never touched by it. Private projects also honour global access grants.
//!
//! # Example
//!
//! ```
//! use docshelf_access::{Role, map_groups_to_role};
//!
//! let groups = vec!["staff".to_string(), "Docs-Editors".to_string()];
//!
//! // Editor membership wins over the default viewer role.
//! assert_eq!(
//!     map_groups_to_role(&groups, "docs-admins", "docs-editors", ""),
//!     Some(Role::Editor)
//! );
//!
//! // A configured viewer group turns the mapping into an allow-list.
//! assert_eq!(map_groups_to_role(&groups, "", "", "docs-readers"), None);
//! ```

pub mod authn;
pub mod csrf;
pub mod error;
pub mod memory;
pub mod project;
pub mod reconcile;
pub mod resolver;
pub mod role;
pub mod secret;
pub mod session;
pub mod store;
pub mod token;
pub mod user;

// Re-export main types at crate root
pub use authn::directory::{DirectoryAuthenticator, DirectoryConfig};
pub use authn::ldap::LdapDialer;
pub use authn::local::{LocalAuthenticator, hash_password, verify_password};
pub use authn::oauth::OAuthClient;
pub use authn::oidc::{IdentityProviderClient, OidcAuthenticator, OidcConfig, OidcConfigBuilder};
pub use authn::{AuthChain, Authenticator, Credentials};
pub use csrf::CsrfStateStore;
pub use error::{
    AuthenticationError, AuthorizationError, ConfigurationError, DirectoryError,
    GENERIC_AUTH_FAILURE, PasswordHashError, ProviderError, StoreError,
};
pub use memory::MemoryStore;
pub use project::{
    AuthGroupMapping, GlobalAccessGrant, GlobalAccessRule, Project, ProjectAccess, SubjectType,
    Visibility,
};
pub use reconcile::{
    AccessReconciler, ReconcileOutcome, SyncOutcome, sync_config_global_rules,
    sync_config_group_mappings,
};
pub use resolver::AccessResolver;
pub use role::{AccessSource, AuthSource, GroupRoles, Role, map_groups_to_role, names_match};
pub use session::{Session, SessionId, SessionService};
pub use store::{
    GlobalAccessStore, GroupMappingStore, ProjectAccessStore, ProjectStore, SessionStore,
    TokenStore, UserStore,
};
pub use token::{ApiToken, IssuedToken, TokenAuthenticator, hash_token, parse_bearer};
pub use user::User;
