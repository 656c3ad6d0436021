//! Directory-service (LDAP) authentication.
//!
//! Login is a search-then-bind: the service account locates the entry for
//! the supplied username, then a second bind as that entry's DN verifies
//! the password. Group membership is read from the entry and mapped to a
//! global role through [`GroupRoles`].

use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{Authenticator, Credentials, provision_external};
use crate::error::{AuthenticationError, ConfigurationError, DirectoryError};
use crate::reconcile::AccessReconciler;
use crate::role::{AuthSource, GroupRoles};
use crate::store::UserStore;
use crate::user::User;

/// Placeholder substituted with the escaped username in `user_filter`.
pub const USERNAME_PLACEHOLDER: &str = "{username}";

/// Directory service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// `ldap://` or `ldaps://` URL.
    pub url: String,
    /// Service account used for the user search.
    pub bind_dn: String,
    pub bind_password: String,
    /// Search base for user entries.
    pub base_dn: String,
    /// Filter template, e.g. `(uid={username})`.
    #[serde(default = "default_user_filter")]
    pub user_filter: String,
    /// Multi-valued attribute listing group memberships.
    #[serde(default = "default_group_attribute")]
    pub group_attribute: String,
    #[serde(default = "default_email_attribute")]
    pub email_attribute: String,
    #[serde(default)]
    pub admin_group: String,
    #[serde(default)]
    pub editor_group: String,
    #[serde(default)]
    pub viewer_group: String,
    /// Upper bound on one whole login, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_user_filter() -> String {
    "(uid={username})".to_string()
}

fn default_group_attribute() -> String {
    "memberOf".to_string()
}

fn default_email_attribute() -> String {
    "mail".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

impl DirectoryConfig {
    /// Creates a configuration with defaults for optional fields.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
        base_dn: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            bind_dn: bind_dn.into(),
            bind_password: bind_password.into(),
            base_dn: base_dn.into(),
            user_filter: default_user_filter(),
            group_attribute: default_group_attribute(),
            email_attribute: default_email_attribute(),
            admin_group: String::new(),
            editor_group: String::new(),
            viewer_group: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }

    /// Checks that every required field is usable.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        const SECTION: &str = "directory";
        let required = [
            ("url", &self.url),
            ("bind_dn", &self.bind_dn),
            ("bind_password", &self.bind_password),
            ("base_dn", &self.base_dn),
            ("user_filter", &self.user_filter),
            ("group_attribute", &self.group_attribute),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigurationError::MissingField {
                    section: SECTION,
                    field,
                });
            }
        }
        if !(self.url.starts_with("ldap://") || self.url.starts_with("ldaps://")) {
            return Err(ConfigurationError::InvalidField {
                section: SECTION,
                field: "url",
                reason: "must start with ldap:// or ldaps://".to_string(),
            });
        }
        if !self.user_filter.contains(USERNAME_PLACEHOLDER) {
            return Err(ConfigurationError::InvalidField {
                section: SECTION,
                field: "user_filter",
                reason: format!("must contain {USERNAME_PLACEHOLDER}"),
            });
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidField {
                section: SECTION,
                field: "timeout_seconds",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn group_roles(&self) -> GroupRoles {
        GroupRoles {
            admin_group: self.admin_group.clone(),
            editor_group: self.editor_group.clone(),
            viewer_group: self.viewer_group.clone(),
        }
    }
}

/// Substitutes `username` into `template`, escaping filter metacharacters.
#[must_use]
pub fn render_filter(template: &str, username: &str) -> String {
    template.replace(USERNAME_PLACEHOLDER, &ldap3::ldap_escape(username))
}

/// Expands membership values to both the full DN and its leading RDN value.
///
/// `cn=docs-admins,ou=groups,dc=example,dc=org` matches a configured group
/// of either `docs-admins` or the full DN.
#[must_use]
pub fn group_names(values: &[String]) -> Vec<String> {
    let mut names = Vec::with_capacity(values.len() * 2);
    for value in values {
        names.push(value.clone());
        let Some((first, _)) = value.split_once(',') else {
            continue;
        };
        if let Some((_, rdn_value)) = first.split_once('=') {
            let rdn_value = rdn_value.trim();
            if !rdn_value.is_empty() {
                names.push(rdn_value.to_string());
            }
        }
    }
    names
}

/// One search result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Values of `name`, matched case-insensitively.
    #[must_use]
    pub fn values(&self, name: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }
}

/// Opens connections to the directory.
#[async_trait]
pub trait DirectoryDialer: Send + Sync {
    async fn dial(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectoryConnection>, Report<DirectoryError>>;
}

/// An open directory connection.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Simple bind. Fails with `DirectoryError::Bind` on rejected credentials.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<(), Report<DirectoryError>>;

    /// Subtree search returning at most one entry.
    async fn search_one(
        &mut self,
        base: &str,
        filter: &str,
        attributes: &[&str],
    ) -> Result<Option<DirectoryEntry>, Report<DirectoryError>>;

    /// Unbinds. Errors are ignored.
    async fn close(&mut self);
}

/// What a successful directory login yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryIdentity {
    pub dn: String,
    pub email: Option<String>,
    pub groups: Vec<String>,
}

enum Lookup {
    Found(DirectoryIdentity),
    NoSuchUser,
    BadPassword,
}

/// Authenticates users against a directory service.
pub struct DirectoryAuthenticator {
    config: DirectoryConfig,
    dialer: Arc<dyn DirectoryDialer>,
    users: Arc<dyn UserStore>,
    reconciler: Option<Arc<AccessReconciler>>,
}

impl DirectoryAuthenticator {
    /// Creates an authenticator after validating `config`.
    pub fn new(
        config: DirectoryConfig,
        dialer: Arc<dyn DirectoryDialer>,
        users: Arc<dyn UserStore>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            dialer,
            users,
            reconciler: None,
        })
    }

    /// Reconciles group-derived access after each login.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Arc<AccessReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Runs one directory operation under the configured timeout.
    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, Report<DirectoryError>>>,
    ) -> Result<T, Report<DirectoryError>> {
        match tokio::time::timeout(self.config.timeout(), op).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout.into()),
        }
    }

    /// Dials, looks the user up and always closes the connection again.
    async fn lookup(&self, credentials: &Credentials) -> Result<Lookup, Report<DirectoryError>> {
        let mut conn = self.bounded(self.dialer.dial(&self.config)).await?;
        let result = self.lookup_on(conn.as_mut(), credentials).await;
        if tokio::time::timeout(self.config.timeout(), conn.close())
            .await
            .is_err()
        {
            debug!("directory unbind timed out; dropping connection");
        }
        result
    }

    async fn lookup_on(
        &self,
        conn: &mut dyn DirectoryConnection,
        credentials: &Credentials,
    ) -> Result<Lookup, Report<DirectoryError>> {
        self.bounded(conn.bind(&self.config.bind_dn, &self.config.bind_password))
            .await?;

        let filter = render_filter(&self.config.user_filter, &credentials.username);
        let attributes = [
            self.config.group_attribute.as_str(),
            self.config.email_attribute.as_str(),
        ];
        let Some(entry) = self
            .bounded(conn.search_one(&self.config.base_dn, &filter, &attributes))
            .await?
        else {
            return Ok(Lookup::NoSuchUser);
        };

        match tokio::time::timeout(
            self.config.timeout(),
            conn.bind(&entry.dn, &credentials.password),
        )
        .await
        {
            Err(_) => return Err(DirectoryError::Timeout.into()),
            Ok(Err(report)) => {
                debug!(dn = %entry.dn, error = %report, "user bind rejected");
                return Ok(Lookup::BadPassword);
            }
            Ok(Ok(())) => {}
        }

        Ok(Lookup::Found(DirectoryIdentity {
            email: entry.first(&self.config.email_attribute).map(str::to_string),
            groups: group_names(entry.values(&self.config.group_attribute)),
            dn: entry.dn,
        }))
    }
}

#[async_trait]
impl Authenticator for DirectoryAuthenticator {
    fn name(&self) -> &'static str {
        "ldap"
    }

    #[instrument(skip_all, fields(username = %credentials.username))]
    async fn authenticate(&self, credentials: &Credentials) -> Result<User, AuthenticationError> {
        let username = credentials.username.as_str();
        // An empty password turns the user bind into an unauthenticated bind,
        // which most servers accept.
        if username.is_empty() || credentials.password.is_empty() {
            return Err(AuthenticationError::SecretMismatch {
                username: username.to_string(),
            });
        }

        let identity = match self.lookup(credentials).await {
            Ok(Lookup::Found(identity)) => identity,
            Ok(Lookup::NoSuchUser) => {
                return Err(AuthenticationError::UnknownUser {
                    username: username.to_string(),
                });
            }
            Ok(Lookup::BadPassword) => {
                return Err(AuthenticationError::SecretMismatch {
                    username: username.to_string(),
                });
            }
            Err(report) => {
                warn!(error = %report, "directory lookup failed");
                return Err(AuthenticationError::Upstream {
                    source: AuthSource::Ldap,
                    reason: report.to_string(),
                });
            }
        };

        let Some(role) = self.config.group_roles().resolve(&identity.groups) else {
            return Err(AuthenticationError::AccessDenied {
                username: username.to_string(),
            });
        };

        let user = provision_external(
            self.users.as_ref(),
            AuthSource::Ldap,
            username,
            identity.email.as_deref(),
            role,
        )
        .await?;

        if let Some(reconciler) = &self.reconciler {
            reconciler.spawn(user.clone(), AuthSource::Ldap, identity.groups);
        }
        debug!(dn = %identity.dn, role = %role, "directory login succeeded");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::project::AuthGroupMapping;
    use crate::role::{AccessSource, Role};
    use crate::store::GroupMappingStore;
    use docshelf_core::ProjectId;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct FakeUser {
        dn: &'static str,
        uid: &'static str,
        password: &'static str,
        groups: Vec<&'static str>,
    }

    /// In-memory directory with one service account.
    #[derive(Clone, Default)]
    struct FakeDirectory {
        users: Vec<FakeUser>,
        filters: Arc<Mutex<Vec<String>>>,
        unreachable: bool,
        /// Searches never complete.
        hang_search: bool,
        closes: Arc<AtomicUsize>,
    }

    struct FakeConnection {
        directory: FakeDirectory,
    }

    const SERVICE_DN: &str = "cn=svc,dc=example,dc=org";
    const SERVICE_PASSWORD: &str = "svc-pass";

    #[async_trait]
    impl DirectoryDialer for FakeDirectory {
        async fn dial(
            &self,
            config: &DirectoryConfig,
        ) -> Result<Box<dyn DirectoryConnection>, Report<DirectoryError>> {
            if self.unreachable {
                return Err(DirectoryError::Connect {
                    url: config.url.clone(),
                    reason: "connection refused".to_string(),
                }
                .into());
            }
            Ok(Box::new(FakeConnection {
                directory: self.clone(),
            }))
        }
    }

    #[async_trait]
    impl DirectoryConnection for FakeConnection {
        async fn bind(&mut self, dn: &str, password: &str) -> Result<(), Report<DirectoryError>> {
            let ok = (dn == SERVICE_DN && password == SERVICE_PASSWORD)
                || self
                    .directory
                    .users
                    .iter()
                    .any(|u| u.dn == dn && u.password == password);
            if ok {
                Ok(())
            } else {
                Err(DirectoryError::Bind {
                    dn: dn.to_string(),
                    reason: "invalid credentials".to_string(),
                }
                .into())
            }
        }

        async fn search_one(
            &mut self,
            _base: &str,
            filter: &str,
            _attributes: &[&str],
        ) -> Result<Option<DirectoryEntry>, Report<DirectoryError>> {
            if self.directory.hang_search {
                std::future::pending::<()>().await;
            }
            self.directory
                .filters
                .lock()
                .expect("lock")
                .push(filter.to_string());
            Ok(self
                .directory
                .users
                .iter()
                .find(|u| filter == format!("(uid={})", u.uid))
                .map(|u| DirectoryEntry {
                    dn: u.dn.to_string(),
                    attributes: HashMap::from([
                        (
                            "memberOf".to_string(),
                            u.groups.iter().map(|g| g.to_string()).collect(),
                        ),
                        ("mail".to_string(), vec![format!("{}@example.org", u.uid)]),
                    ]),
                }))
        }

        async fn close(&mut self) {
            self.directory.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> DirectoryConfig {
        let mut config = DirectoryConfig::new(
            "ldap://directory.example.org",
            SERVICE_DN,
            SERVICE_PASSWORD,
            "dc=example,dc=org",
        );
        config.admin_group = "docs-admins".to_string();
        config.editor_group = "docs-editors".to_string();
        config
    }

    fn directory() -> FakeDirectory {
        FakeDirectory {
            users: vec![
                FakeUser {
                    dn: "uid=alice,ou=people,dc=example,dc=org",
                    uid: "alice",
                    password: "wonderland",
                    groups: vec!["cn=docs-admins,ou=groups,dc=example,dc=org"],
                },
                FakeUser {
                    dn: "uid=bob,ou=people,dc=example,dc=org",
                    uid: "bob",
                    password: "builder",
                    groups: vec!["cn=staff,ou=groups,dc=example,dc=org"],
                },
            ],
            ..FakeDirectory::default()
        }
    }

    fn authenticator(directory: FakeDirectory, store: Arc<MemoryStore>) -> DirectoryAuthenticator {
        DirectoryAuthenticator::new(config(), Arc::new(directory), store).expect("valid config")
    }

    #[test]
    fn render_filter_escapes_metacharacters() {
        assert_eq!(render_filter("(uid={username})", "alice"), "(uid=alice)");
        assert_eq!(
            render_filter("(uid={username})", "*)(uid=*").to_ascii_lowercase(),
            "(uid=\\2a\\29\\28uid=\\2a)"
        );
        assert_eq!(
            render_filter("(cn={username})", "a\\b").to_ascii_lowercase(),
            "(cn=a\\5cb)"
        );
    }

    #[test]
    fn group_names_include_leading_rdn_value() {
        let names = group_names(&["cn=Docs-Admins,ou=groups,dc=example,dc=org".to_string()]);
        assert_eq!(
            names,
            vec![
                "cn=Docs-Admins,ou=groups,dc=example,dc=org".to_string(),
                "Docs-Admins".to_string(),
            ]
        );
        assert_eq!(group_names(&["plain".to_string()]), vec!["plain".to_string()]);
    }

    #[test]
    fn validate_reports_first_missing_field() {
        let mut config = config();
        config.bind_dn = String::new();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::MissingField {
                section: "directory",
                field: "bind_dn",
            })
        );
    }

    #[test]
    fn validate_requires_username_placeholder() {
        let mut config = config();
        config.user_filter = "(uid=alice)".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidField {
                field: "user_filter",
                ..
            })
        ));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "url": "ldaps://directory.example.org",
            "bind_dn": "cn=svc,dc=example,dc=org",
            "bind_password": "pw",
            "base_dn": "dc=example,dc=org"
        }"#;
        let config: DirectoryConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.user_filter, "(uid={username})");
        assert_eq!(config.group_attribute, "memberOf");
        assert_eq!(config.email_attribute, "mail");
        assert_eq!(config.timeout_seconds, 10);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn admin_group_member_is_provisioned_as_admin() {
        let store = Arc::new(MemoryStore::new());
        let auth = authenticator(directory(), store.clone());

        let user = auth
            .authenticate(&Credentials::new("alice", "wonderland"))
            .await
            .expect("authenticate");

        assert_eq!(user.role(), Role::Admin);
        assert_eq!(user.auth_source(), AuthSource::Ldap);
        assert_eq!(user.email(), Some("alice@example.org"));
        let stored = store
            .get_by_username("alice")
            .await
            .expect("get")
            .expect("provisioned");
        assert_eq!(stored.id(), user.id());
    }

    #[tokio::test]
    async fn unmapped_member_defaults_to_viewer() {
        let store = Arc::new(MemoryStore::new());
        let user = authenticator(directory(), store)
            .authenticate(&Credentials::new("bob", "builder"))
            .await
            .expect("authenticate");
        assert_eq!(user.role(), Role::Viewer);
    }

    #[tokio::test]
    async fn viewer_group_turns_into_allow_list() {
        let store = Arc::new(MemoryStore::new());
        let mut config = config();
        config.viewer_group = "docs-readers".to_string();
        let auth = DirectoryAuthenticator::new(config, Arc::new(directory()), store).expect("valid");

        let err = auth
            .authenticate(&Credentials::new("bob", "builder"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn wrong_password_fails_user_bind() {
        let store = Arc::new(MemoryStore::new());
        let err = authenticator(directory(), store.clone())
            .authenticate(&Credentials::new("alice", "guess"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::SecretMismatch { .. }));
        assert!(store.get_by_username("alice").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn empty_password_never_reaches_directory() {
        let directory = directory();
        let filters = directory.filters.clone();
        let err = authenticator(directory, Arc::new(MemoryStore::new()))
            .authenticate(&Credentials::new("alice", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::SecretMismatch { .. }));
        assert!(filters.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn unknown_user_fails() {
        let err = authenticator(directory(), Arc::new(MemoryStore::new()))
            .authenticate(&Credentials::new("mallory", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::UnknownUser { .. }));
    }

    #[tokio::test]
    async fn injected_username_is_escaped_before_search() {
        let directory = directory();
        let filters = directory.filters.clone();
        let err = authenticator(directory, Arc::new(MemoryStore::new()))
            .authenticate(&Credentials::new("*", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::UnknownUser { .. }));
        let filters = filters.lock().expect("lock");
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].to_ascii_lowercase(), "(uid=\\2a)");
    }

    #[tokio::test]
    async fn unreachable_directory_is_upstream_error() {
        let directory = FakeDirectory {
            unreachable: true,
            ..directory()
        };
        let err = authenticator(directory, Arc::new(MemoryStore::new()))
            .authenticate(&Credentials::new("alice", "wonderland"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthenticationError::Upstream {
                source: AuthSource::Ldap,
                ..
            }
        ));
        assert_eq!(err.public_message(), "invalid credentials");
    }

    #[tokio::test]
    async fn hung_search_times_out_and_closes_connection() {
        let directory = FakeDirectory {
            hang_search: true,
            ..directory()
        };
        let closes = directory.closes.clone();
        let mut config = config();
        config.timeout_seconds = 1;
        let auth = DirectoryAuthenticator::new(
            config,
            Arc::new(directory),
            Arc::new(MemoryStore::new()),
        )
        .expect("valid config");

        let err = auth
            .authenticate(&Credentials::new("alice", "wonderland"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthenticationError::Upstream {
                source: AuthSource::Ldap,
                ..
            }
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_is_closed_after_failed_bind() {
        let directory = directory();
        let closes = directory.closes.clone();
        let auth = authenticator(directory, Arc::new(MemoryStore::new()));

        assert!(
            auth.authenticate(&Credentials::new("bob", "wrong"))
                .await
                .is_err()
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn login_reconciles_group_mappings() {
        let store = Arc::new(MemoryStore::new());
        let project = ProjectId::new();
        store
            .save(&AuthGroupMapping::new(
                AuthSource::Ldap,
                "docs-admins",
                project,
                Role::Editor,
            ))
            .await
            .expect("mapping");
        let reconciler = Arc::new(AccessReconciler::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let auth = authenticator(directory(), store.clone()).with_reconciler(reconciler);

        let user = auth
            .authenticate(&Credentials::new("alice", "wonderland"))
            .await
            .expect("authenticate");

        let rows = store.wait_for_grants(user.id(), AccessSource::Ldap, 1).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].project_id, project);
        assert_eq!(rows[0].role, Role::Editor);
    }
}
