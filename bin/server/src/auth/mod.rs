//! Authentication for the docshelf server.
//!
//! This module provides:
//! - Shared application state wiring the access crate to the stores
//! - Cookie-backed session management
//! - Authentication extractors for Axum routes
//! - Login, identity-provider callback and logout routes
//!
//! # Request authentication
//!
//! A request carrying an `Authorization` header is authenticated by API
//! token only; a bad token is never retried against the session cookie.
//! Requests without the header fall back to the session cookie.

pub mod middleware;
pub mod routes;
pub mod session;

use chrono::Duration;
use docshelf_access::{
    AccessReconciler, AccessResolver, AuthChain, ConfigurationError, CsrfStateStore,
    DirectoryAuthenticator, DirectoryConfig, GlobalAccessStore, GroupMappingStore,
    IdentityProviderClient, LocalAuthenticator, MemoryStore, OidcAuthenticator, OidcConfig,
    ProjectAccessStore, ProjectStore, SessionService, SessionStore, TokenAuthenticator,
    TokenStore, UserStore, authn::directory::DirectoryDialer,
};
use std::sync::Arc;

use crate::config::SessionConfig;

pub use middleware::{AuthRejection, RequireAdmin, RequireAuth};
pub use session::SessionManager;

/// Every store the server needs, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub access: Arc<dyn ProjectAccessStore>,
    pub mappings: Arc<dyn GroupMappingStore>,
    pub global: Arc<dyn GlobalAccessStore>,
}

impl Stores {
    /// Every store backed by one in-process [`MemoryStore`].
    #[must_use]
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            tokens: store.clone(),
            projects: store.clone(),
            access: store.clone(),
            mappings: store.clone(),
            global: store,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub sessions: SessionManager,
    /// Password-based authenticators, tried in order.
    pub login: AuthChain,
    /// Identity-provider redirect flow, when configured.
    pub oidc: Option<OidcAuthenticator>,
    pub tokens: TokenAuthenticator,
    pub resolver: AccessResolver,
    pub reconciler: Arc<AccessReconciler>,
}

impl AppState {
    /// Creates state with an empty login chain.
    #[must_use]
    pub fn new(stores: &Stores, session_config: SessionConfig) -> Self {
        let service = SessionService::new(
            stores.sessions.clone(),
            stores.users.clone(),
            Duration::minutes(session_config.duration_minutes),
        );
        let reconciler = Arc::new(AccessReconciler::new(
            stores.mappings.clone(),
            stores.access.clone(),
            stores.global.clone(),
        ));

        Self {
            users: stores.users.clone(),
            projects: stores.projects.clone(),
            sessions: SessionManager::new(service, session_config),
            login: AuthChain::new(),
            oidc: None,
            tokens: TokenAuthenticator::new(stores.tokens.clone(), stores.users.clone()),
            resolver: AccessResolver::new(stores.access.clone(), stores.global.clone()),
            reconciler,
        }
    }

    /// Appends local password login to the chain.
    #[must_use]
    pub fn with_local(mut self) -> Self {
        let local =
            LocalAuthenticator::new(self.users.clone()).with_reconciler(self.reconciler.clone());
        self.login = self.login.with(Arc::new(local));
        self
    }

    /// Appends directory-service login to the chain.
    pub fn with_directory(
        mut self,
        config: DirectoryConfig,
        dialer: Arc<dyn DirectoryDialer>,
    ) -> Result<Self, ConfigurationError> {
        let directory = DirectoryAuthenticator::new(config, dialer, self.users.clone())?
            .with_reconciler(self.reconciler.clone());
        self.login = self.login.with(Arc::new(directory));
        Ok(self)
    }

    /// Enables the identity-provider redirect flow.
    pub fn with_oidc(
        mut self,
        config: OidcConfig,
        client: Arc<dyn IdentityProviderClient>,
    ) -> Result<Self, ConfigurationError> {
        let oidc = OidcAuthenticator::new(config, client, CsrfStateStore::new(), self.users.clone())?
            .with_reconciler(self.reconciler.clone());
        self.oidc = Some(oidc);
        Ok(self)
    }
}
