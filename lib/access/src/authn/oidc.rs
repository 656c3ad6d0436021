//! OAuth2/OIDC identity-provider authentication.
//!
//! Login is a two-phase redirect flow. [`OidcAuthenticator::generate_auth_url`]
//! registers a one-time state and returns the provider URL;
//! [`OidcAuthenticator::handle_callback`] exchanges the returned code, reads
//! the user-info document and provisions the user. The caller validates the
//! state before handling the callback.

use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::provision_external;
use crate::csrf::CsrfStateStore;
use crate::error::{AuthenticationError, ConfigurationError, ProviderError};
use crate::reconcile::AccessReconciler;
use crate::role::{AuthSource, GroupRoles};
use crate::store::UserStore;
use crate::user::User;

/// Configuration for the OIDC identity provider.
///
/// Either `issuer_url` (for discovery) or all three explicit endpoints must
/// be set. Fields with defaults can be omitted when loading from the
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer used for discovery when explicit endpoints are absent.
    #[serde(default)]
    issuer_url: Option<String>,
    #[serde(default)]
    auth_url: Option<String>,
    #[serde(default)]
    token_url: Option<String>,
    #[serde(default)]
    userinfo_url: Option<String>,
    client_id: String,
    client_secret: String,
    /// Callback URL registered with the provider.
    redirect_uri: String,
    /// Comma-separated scopes.
    #[serde(default = "default_scopes")]
    scopes: String,
    #[serde(default = "default_username_claim")]
    username_claim: String,
    #[serde(default = "default_email_claim")]
    email_claim: String,
    /// Flat claim name or dotted path, e.g. `realm_access.roles`.
    #[serde(default = "default_groups_claim")]
    groups_claim: String,
    #[serde(default)]
    admin_group: String,
    #[serde(default)]
    editor_group: String,
    #[serde(default)]
    viewer_group: String,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

fn default_username_claim() -> String {
    "preferred_username".to_string()
}

fn default_email_claim() -> String {
    "email".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

impl OidcConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> OidcConfigBuilder {
        OidcConfigBuilder::new(client_id.into(), client_secret.into(), redirect_uri.into())
    }

    #[must_use]
    pub fn issuer_url(&self) -> Option<&str> {
        self.issuer_url.as_deref()
    }

    #[must_use]
    pub fn auth_url(&self) -> Option<&str> {
        self.auth_url.as_deref()
    }

    #[must_use]
    pub fn token_url(&self) -> Option<&str> {
        self.token_url.as_deref()
    }

    #[must_use]
    pub fn userinfo_url(&self) -> Option<&str> {
        self.userinfo_url.as_deref()
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Scopes to request, parsed from the comma-separated setting.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    #[must_use]
    pub fn username_claim(&self) -> &str {
        &self.username_claim
    }

    #[must_use]
    pub fn email_claim(&self) -> &str {
        &self.email_claim
    }

    #[must_use]
    pub fn groups_claim(&self) -> &str {
        &self.groups_claim
    }

    #[must_use]
    pub fn group_roles(&self) -> GroupRoles {
        GroupRoles {
            admin_group: self.admin_group.clone(),
            editor_group: self.editor_group.clone(),
            viewer_group: self.viewer_group.clone(),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// True when every endpoint is configured and discovery is not needed.
    #[must_use]
    pub fn has_explicit_endpoints(&self) -> bool {
        self.auth_url.is_some() && self.token_url.is_some() && self.userinfo_url.is_some()
    }

    /// Checks that every required field is present and every URL parses.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        const SECTION: &str = "oidc";
        let required = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigurationError::MissingField {
                    section: SECTION,
                    field,
                });
            }
        }

        if self.issuer_url.as_deref().is_none_or(str::is_empty) {
            let endpoints = [
                ("auth_url", &self.auth_url),
                ("token_url", &self.token_url),
                ("userinfo_url", &self.userinfo_url),
            ];
            for (field, value) in endpoints {
                if value.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigurationError::MissingField {
                        section: SECTION,
                        field,
                    });
                }
            }
        }

        let urls = [
            ("issuer_url", self.issuer_url.as_deref()),
            ("auth_url", self.auth_url.as_deref()),
            ("token_url", self.token_url.as_deref()),
            ("userinfo_url", self.userinfo_url.as_deref()),
            ("redirect_uri", Some(self.redirect_uri.as_str())),
        ];
        for (field, value) in urls {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            if let Err(e) = oauth2::url::Url::parse(value) {
                return Err(ConfigurationError::InvalidField {
                    section: SECTION,
                    field,
                    reason: e.to_string(),
                });
            }
        }

        if self.scopes().is_empty() {
            return Err(ConfigurationError::MissingField {
                section: SECTION,
                field: "scopes",
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
}

/// Builder for `OidcConfig`.
#[derive(Debug)]
pub struct OidcConfigBuilder {
    config: OidcConfig,
    scopes: Vec<String>,
}

impl OidcConfigBuilder {
    /// Creates a builder with required fields and default claims.
    #[must_use]
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            config: OidcConfig {
                issuer_url: None,
                auth_url: None,
                token_url: None,
                userinfo_url: None,
                client_id,
                client_secret,
                redirect_uri,
                scopes: String::new(),
                username_claim: default_username_claim(),
                email_claim: default_email_claim(),
                groups_claim: default_groups_claim(),
                admin_group: String::new(),
                editor_group: String::new(),
                viewer_group: String::new(),
                timeout_seconds: default_timeout_seconds(),
            },
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }
    }

    #[must_use]
    pub fn issuer_url(mut self, url: impl Into<String>) -> Self {
        self.config.issuer_url = Some(url.into());
        self
    }

    /// Sets all three endpoints, bypassing discovery.
    #[must_use]
    pub fn endpoints(
        mut self,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        userinfo_url: impl Into<String>,
    ) -> Self {
        self.config.auth_url = Some(auth_url.into());
        self.config.token_url = Some(token_url.into());
        self.config.userinfo_url = Some(userinfo_url.into());
        self
    }

    /// Adds a scope unless already present.
    #[must_use]
    pub fn add_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    #[must_use]
    pub fn username_claim(mut self, claim: impl Into<String>) -> Self {
        self.config.username_claim = claim.into();
        self
    }

    #[must_use]
    pub fn email_claim(mut self, claim: impl Into<String>) -> Self {
        self.config.email_claim = claim.into();
        self
    }

    #[must_use]
    pub fn groups_claim(mut self, claim: impl Into<String>) -> Self {
        self.config.groups_claim = claim.into();
        self
    }

    /// Sets the admin, editor and viewer group names.
    #[must_use]
    pub fn groups(mut self, roles: GroupRoles) -> Self {
        self.config.admin_group = roles.admin_group;
        self.config.editor_group = roles.editor_group;
        self.config.viewer_group = roles.viewer_group;
        self
    }

    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn build(mut self) -> OidcConfig {
        self.config.scopes = self.scopes.join(",");
        self.config
    }
}

/// Protocol operations against the identity provider.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    /// Provider authorization URL carrying `state`.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchanges an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, Report<ProviderError>>;

    /// Fetches the user-info document for `access_token`.
    async fn fetch_user_info(&self, access_token: &str) -> Result<Value, Report<ProviderError>>;
}

/// Looks up a claim by flat name first, then as a dotted path.
#[must_use]
pub fn claim<'a>(document: &'a Value, name: &str) -> Option<&'a Value> {
    if let Some(value) = document.get(name) {
        return Some(value);
    }
    if !name.contains('.') {
        return None;
    }
    name.split('.')
        .try_fold(document, |value, segment| value.get(segment))
}

fn string_claim<'a>(document: &'a Value, name: &str) -> Option<&'a str> {
    claim(document, name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Group memberships from `groups_claim`.
///
/// Accepts an array of strings or a single string. Anything else yields no
/// groups.
#[must_use]
pub fn extract_groups(document: &Value, groups_claim: &str) -> Vec<String> {
    match claim(document, groups_claim) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(group)) => vec![group.clone()],
        _ => Vec::new(),
    }
}

/// Stable username and email from a user-info document.
///
/// The username claim wins; otherwise the local part of the email is used.
pub fn derive_identity(
    document: &Value,
    username_claim: &str,
    email_claim: &str,
) -> Result<(String, Option<String>), AuthenticationError> {
    let email = string_claim(document, email_claim).map(str::to_string);
    if let Some(username) = string_claim(document, username_claim) {
        return Ok((username.to_string(), email));
    }
    let local_part = email
        .as_deref()
        .and_then(|e| e.split('@').next())
        .filter(|local| !local.is_empty())
        .map(str::to_string);
    match local_part {
        Some(username) => Ok((username, email)),
        None => Err(AuthenticationError::MissingClaim {
            claim: username_claim.to_string(),
        }),
    }
}

/// Drives the identity-provider login flow.
pub struct OidcAuthenticator {
    config: OidcConfig,
    client: Arc<dyn IdentityProviderClient>,
    states: CsrfStateStore,
    users: Arc<dyn UserStore>,
    reconciler: Option<Arc<AccessReconciler>>,
}

impl OidcAuthenticator {
    /// Creates an authenticator after validating `config`.
    pub fn new(
        config: OidcConfig,
        client: Arc<dyn IdentityProviderClient>,
        states: CsrfStateStore,
        users: Arc<dyn UserStore>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            client,
            states,
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
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Registers a fresh state and returns the provider authorization URL.
    #[must_use]
    pub fn generate_auth_url(&self) -> String {
        let state = self.states.generate();
        self.client.authorization_url(&state)
    }

    /// Consumes `state`. True only for the first use of an issued state.
    #[must_use]
    pub fn validate_state(&self, state: &str) -> bool {
        self.states.validate(state)
    }

    /// Completes a login from the provider's authorization code.
    #[instrument(skip_all)]
    pub async fn handle_callback(&self, code: &str) -> Result<User, AuthenticationError> {
        let document = tokio::time::timeout(self.config.timeout(), self.fetch_identity(code))
            .await
            .map_err(|_| {
                Report::from(ProviderError::UserInfo {
                    reason: "timed out".to_string(),
                })
            })
            .and_then(|result| result)
            .map_err(|report| {
                warn!(error = %report, "identity provider request failed");
                AuthenticationError::Upstream {
                    source: AuthSource::Oidc,
                    reason: report.to_string(),
                }
            })?;

        let (username, email) = derive_identity(
            &document,
            self.config.username_claim(),
            self.config.email_claim(),
        )?;
        let groups = extract_groups(&document, self.config.groups_claim());

        let Some(role) = self.config.group_roles().resolve(&groups) else {
            return Err(AuthenticationError::AccessDenied { username });
        };

        let user = provision_external(
            self.users.as_ref(),
            AuthSource::Oidc,
            &username,
            email.as_deref(),
            role,
        )
        .await?;

        if let Some(reconciler) = &self.reconciler {
            reconciler.spawn(user.clone(), AuthSource::Oidc, groups);
        }
        debug!(user_id = %user.id(), role = %role, "identity provider login succeeded");
        Ok(user)
    }

    async fn fetch_identity(&self, code: &str) -> Result<Value, Report<ProviderError>> {
        let access_token = self.client.exchange_code(code).await?;
        self.client.fetch_user_info(&access_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::AuthGroupMapping;
    use crate::role::{AccessSource, Role};
    use crate::store::GroupMappingStore;
    use docshelf_core::ProjectId;
    use serde_json::json;

    /// Provider returning a fixed user-info document for code "good".
    struct FakeProvider {
        user_info: Value,
    }

    #[async_trait]
    impl IdentityProviderClient for FakeProvider {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://idp.example.org/authorize?state={state}")
        }

        async fn exchange_code(&self, code: &str) -> Result<String, Report<ProviderError>> {
            if code == "good" {
                Ok("access-token".to_string())
            } else {
                Err(ProviderError::TokenExchange {
                    reason: "invalid_grant".to_string(),
                }
                .into())
            }
        }

        async fn fetch_user_info(&self, _access_token: &str) -> Result<Value, Report<ProviderError>> {
            Ok(self.user_info.clone())
        }
    }

    fn config(roles: GroupRoles) -> OidcConfig {
        OidcConfig::builder("docshelf", "secret", "https://docs.example.org/auth/oidc/callback")
            .endpoints(
                "https://idp.example.org/authorize",
                "https://idp.example.org/token",
                "https://idp.example.org/userinfo",
            )
            .groups_claim("realm_access.roles")
            .groups(roles)
            .build()
    }

    fn authenticator(user_info: Value, roles: GroupRoles) -> (OidcAuthenticator, Arc<crate::memory::MemoryStore>) {
        let store = Arc::new(crate::memory::MemoryStore::new());
        let auth = OidcAuthenticator::new(
            config(roles),
            Arc::new(FakeProvider { user_info }),
            CsrfStateStore::new(),
            store.clone(),
        )
        .expect("valid config");
        (auth, store)
    }

    fn admin_roles() -> GroupRoles {
        GroupRoles {
            admin_group: "docs-admin".to_string(),
            ..GroupRoles::default()
        }
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "issuer_url": "https://idp.example.org/realms/main",
            "client_id": "docshelf",
            "client_secret": "secret",
            "redirect_uri": "https://docs.example.org/auth/oidc/callback"
        }"#;
        let config: OidcConfig = serde_json::from_str(json).expect("deserialize");
        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
        assert_eq!(config.username_claim(), "preferred_username");
        assert_eq!(config.email_claim(), "email");
        assert_eq!(config.groups_claim(), "groups");
        assert!(!config.has_explicit_endpoints());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_add_scope_does_not_duplicate() {
        let config = OidcConfig::builder("id", "secret", "https://app.example.org/cb")
            .issuer_url("https://idp.example.org")
            .add_scope("openid")
            .add_scope("groups")
            .build();
        assert_eq!(config.scopes(), vec!["openid", "email", "profile", "groups"]);
    }

    #[test]
    fn validate_requires_issuer_or_endpoints() {
        let config = OidcConfig::builder("id", "secret", "https://app.example.org/cb").build();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::MissingField {
                section: "oidc",
                field: "auth_url",
            })
        );
    }

    #[test]
    fn validate_rejects_missing_client_secret() {
        let config = OidcConfig::builder("id", "", "https://app.example.org/cb")
            .issuer_url("https://idp.example.org")
            .build();
        assert_eq!(
            config.validate(),
            Err(ConfigurationError::MissingField {
                section: "oidc",
                field: "client_secret",
            })
        );
    }

    #[test]
    fn validate_rejects_unparseable_urls() {
        let config = OidcConfig::builder("id", "secret", "not a url")
            .issuer_url("https://idp.example.org")
            .build();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidField {
                field: "redirect_uri",
                ..
            })
        ));
    }

    #[test]
    fn groups_from_flat_and_nested_claims() {
        let document = json!({
            "groups": ["a", "b"],
            "realm_access": { "roles": ["docs-admin", 7, "offline"] },
            "single": "solo",
            "https://example.org/claims.groups": ["namespaced"],
        });
        assert_eq!(extract_groups(&document, "groups"), vec!["a", "b"]);
        assert_eq!(
            extract_groups(&document, "realm_access.roles"),
            vec!["docs-admin", "offline"]
        );
        assert_eq!(extract_groups(&document, "single"), vec!["solo"]);
        assert_eq!(
            extract_groups(&document, "https://example.org/claims.groups"),
            vec!["namespaced"]
        );
        assert!(extract_groups(&document, "missing.path").is_empty());
    }

    #[test]
    fn username_prefers_username_claim() {
        let document = json!({"preferred_username": "alice", "email": "a.liddell@example.org"});
        let (username, email) =
            derive_identity(&document, "preferred_username", "email").expect("identity");
        assert_eq!(username, "alice");
        assert_eq!(email.as_deref(), Some("a.liddell@example.org"));
    }

    #[test]
    fn username_falls_back_to_email_local_part() {
        let document = json!({"email": "a.liddell@example.org"});
        let (username, _) =
            derive_identity(&document, "preferred_username", "email").expect("identity");
        assert_eq!(username, "a.liddell");
    }

    #[test]
    fn identity_without_username_or_email_fails() {
        let document = json!({"sub": "1234"});
        let err = derive_identity(&document, "preferred_username", "email").unwrap_err();
        assert!(matches!(err, AuthenticationError::MissingClaim { .. }));
    }

    #[test]
    fn auth_url_state_validates_once() {
        let (auth, _) = authenticator(json!({}), GroupRoles::default());
        let url = auth.generate_auth_url();
        let state = url
            .split_once("state=")
            .map(|(_, state)| state.to_string())
            .expect("state in url");

        assert!(auth.validate_state(&state));
        assert!(!auth.validate_state(&state));
    }

    #[tokio::test]
    async fn nested_realm_role_grants_admin() {
        let user_info = json!({
            "preferred_username": "alice",
            "email": "alice@example.org",
            "realm_access": { "roles": ["Docs-Admin"] },
        });
        let (auth, store) = authenticator(user_info, admin_roles());

        let user = auth.handle_callback("good").await.expect("callback");
        assert_eq!(user.username(), "alice");
        assert_eq!(user.role(), Role::Admin);
        assert_eq!(user.auth_source(), AuthSource::Oidc);
        assert!(store.get_by_username("alice").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn viewer_group_denies_non_members() {
        let user_info = json!({"preferred_username": "bob", "realm_access": {"roles": []}});
        let roles = GroupRoles {
            viewer_group: "docs-readers".to_string(),
            ..GroupRoles::default()
        };
        let (auth, store) = authenticator(user_info, roles);

        let err = auth.handle_callback("good").await.unwrap_err();
        assert!(matches!(err, AuthenticationError::AccessDenied { .. }));
        assert!(store.get_by_username("bob").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn failed_exchange_is_upstream_error() {
        let (auth, _) = authenticator(json!({}), GroupRoles::default());
        let err = auth.handle_callback("bad").await.unwrap_err();
        assert!(matches!(
            err,
            AuthenticationError::Upstream {
                source: AuthSource::Oidc,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failed_callback_leaves_state_unconsumed() {
        let (auth, _) = authenticator(json!({}), GroupRoles::default());
        let url = auth.generate_auth_url();
        let (_, state) = url.split_once("state=").expect("state in url");

        assert!(auth.handle_callback("bad").await.is_err());
        assert!(auth.validate_state(state));
    }

    #[tokio::test]
    async fn callback_reconciles_group_mappings() {
        let store = Arc::new(crate::memory::MemoryStore::new());
        let project = ProjectId::new();
        store
            .save(&AuthGroupMapping::new(AuthSource::Oidc, "writers", project, Role::Editor))
            .await
            .expect("mapping");
        let reconciler = Arc::new(AccessReconciler::new(
            store.clone(),
            store.clone(),
            store.clone(),
        ));
        let user_info = json!({
            "preferred_username": "dana",
            "realm_access": { "roles": ["Writers"] },
        });
        let auth = OidcAuthenticator::new(
            config(GroupRoles::default()),
            Arc::new(FakeProvider { user_info }),
            CsrfStateStore::new(),
            store.clone(),
        )
        .expect("valid config")
        .with_reconciler(reconciler);

        let user = auth.handle_callback("good").await.expect("callback");

        let rows = store.wait_for_grants(user.id(), AccessSource::Oidc, 1).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].project_id, project);
        assert_eq!(rows[0].role, Role::Editor);
    }
}
