//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional `docshelf.{toml,yaml,json}`
//! file overlaid with environment variables (`__` separates nested keys,
//! e.g. `SESSION__DURATION_MINUTES`).
//!
//! See [`DirectoryConfig`] and [`OidcConfig`] for provider settings.

use docshelf_access::{AuthSource, ConfigurationError, DirectoryConfig, OidcConfig, Role, SubjectType};
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Socket address to listen on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub local: LocalConfig,

    /// Directory service login. Disabled when absent.
    #[serde(default)]
    pub directory: Option<DirectoryConfig>,

    /// Identity provider login. Disabled when absent.
    #[serde(default)]
    pub oidc: Option<OidcConfig>,

    /// Group mappings managed by configuration.
    #[serde(default)]
    pub group_mappings: Vec<GroupMappingConfig>,

    /// Global access rules managed by configuration.
    #[serde(default)]
    pub global_access_rules: Vec<GlobalAccessRuleConfig>,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Session duration in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Interval between expired-session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

/// Local username/password login.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_local_enabled")]
    pub enabled: bool,

    /// Local admin created at startup if no user with this name exists.
    #[serde(default)]
    pub admin_username: Option<String>,

    #[serde(default)]
    pub admin_password: Option<String>,
}

/// One configuration-managed group mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMappingConfig {
    pub source: AuthSource,
    pub group: String,
    /// Project slug.
    pub project: String,
    pub role: Role,
}

/// One configuration-managed global access rule.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalAccessRuleConfig {
    pub subject_type: SubjectType,
    pub subject: String,
    pub role: Role,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cookie_name() -> String {
    "docshelf_session".to_string()
}

fn default_session_duration_minutes() -> i64 {
    720
}

fn default_secure_cookies() -> bool {
    true
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_local_enabled() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            duration_minutes: default_session_duration_minutes(),
            secure_cookies: default_secure_cookies(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: default_local_enabled(),
            admin_username: None,
            admin_password: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from an optional file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("docshelf").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Checks every enabled section, failing on the first problem.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigurationError::MissingField {
                section: "server",
                field: "database_url",
            });
        }
        self.session.validate()?;
        self.local.validate()?;
        if let Some(directory) = &self.directory {
            directory.validate()?;
        }
        if let Some(oidc) = &self.oidc {
            oidc.validate()?;
        }
        if !self.local.enabled && self.directory.is_none() && self.oidc.is_none() {
            return Err(ConfigurationError::InvalidField {
                section: "local",
                field: "enabled",
                reason: "no login method is enabled".to_string(),
            });
        }

        for mapping in &self.group_mappings {
            if mapping.source == AuthSource::Local {
                return Err(ConfigurationError::InvalidField {
                    section: "group_mappings",
                    field: "source",
                    reason: "local accounts have no groups".to_string(),
                });
            }
            if mapping.group.trim().is_empty() {
                return Err(ConfigurationError::MissingField {
                    section: "group_mappings",
                    field: "group",
                });
            }
            if mapping.project.trim().is_empty() {
                return Err(ConfigurationError::MissingField {
                    section: "group_mappings",
                    field: "project",
                });
            }
        }

        if self
            .global_access_rules
            .iter()
            .any(|rule| rule.subject.trim().is_empty())
        {
            return Err(ConfigurationError::MissingField {
                section: "global_access_rules",
                field: "subject",
            });
        }
        Ok(())
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.cookie_name.trim().is_empty() {
            return Err(ConfigurationError::MissingField {
                section: "session",
                field: "cookie_name",
            });
        }
        if self.duration_minutes <= 0 {
            return Err(ConfigurationError::InvalidField {
                section: "session",
                field: "duration_minutes",
                reason: "must be positive".to_string(),
            });
        }
        if self.cleanup_interval_seconds == 0 {
            return Err(ConfigurationError::InvalidField {
                section: "session",
                field: "cleanup_interval_seconds",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl LocalConfig {
    fn validate(&self) -> Result<(), ConfigurationError> {
        match (&self.admin_username, &self.admin_password) {
            (Some(_), None) => Err(ConfigurationError::MissingField {
                section: "local",
                field: "admin_password",
            }),
            (None, Some(_)) => Err(ConfigurationError::MissingField {
                section: "local",
                field: "admin_username",
            }),
            _ => Ok(()),
        }
    }
}
