//! Cookie-backed browser sessions.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use docshelf_access::{SessionId, SessionService, StoreError, User};
use time::Duration as TimeDuration;

use crate::config::SessionConfig;

/// Binds [`SessionService`] to the session cookie.
#[derive(Clone)]
pub struct SessionManager {
    service: SessionService,
    config: SessionConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(service: SessionService, config: SessionConfig) -> Self {
        Self { service, config }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Persists a session for `user` and sets its cookie on `jar`.
    pub async fn create(&self, jar: CookieJar, user: &User) -> Result<CookieJar, StoreError> {
        let session = self.service.create(user.id()).await?;

        let cookie = Cookie::build((self.config.cookie_name.clone(), session.id().to_string()))
            .path("/")
            .http_only(true)
            .secure(self.config.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(TimeDuration::minutes(self.config.duration_minutes));

        Ok(jar.add(cookie))
    }

    /// Resolves the session cookie, if any, to a user.
    ///
    /// Expired sessions are deleted on read.
    pub async fn user_from_jar(&self, jar: &CookieJar) -> Option<User> {
        let cookie = jar.get(&self.config.cookie_name)?;
        self.service
            .user_for(&SessionId::new(cookie.value().to_string()))
            .await
    }

    /// Deletes the current session and clears the cookie.
    ///
    /// Succeeds even when there is no valid session.
    pub async fn destroy(&self, jar: CookieJar) -> CookieJar {
        if let Some(cookie) = jar.get(&self.config.cookie_name) {
            self.service
                .destroy(&SessionId::new(cookie.value().to_string()))
                .await;
        }

        let removal = Cookie::build((self.config.cookie_name.clone(), ""))
            .path("/")
            .max_age(TimeDuration::ZERO);
        jar.add(removal)
    }

    /// Removes every expired session from the store.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        self.service.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use docshelf_access::{AuthSource, MemoryStore, Role, SessionStore, UserStore};
    use std::sync::Arc;

    fn config() -> SessionConfig {
        SessionConfig {
            secure_cookies: false,
            ..SessionConfig::default()
        }
    }

    async fn manager(ttl: Duration) -> (SessionManager, Arc<MemoryStore>, User) {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("alice", AuthSource::Local, Role::Viewer);
        UserStore::create(store.as_ref(), &user).await.expect("create user");
        let service = SessionService::new(store.clone(), store.clone(), ttl);
        (SessionManager::new(service, config()), store, user)
    }

    #[tokio::test]
    async fn created_cookie_is_http_only_and_lax() {
        let (manager, _store, user) = manager(Duration::hours(1)).await;
        let jar = manager.create(CookieJar::new(), &user).await.expect("create");

        let cookie = jar.get("docshelf_session").expect("cookie set");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert!(!cookie.value().is_empty());

        let resolved = manager.user_from_jar(&jar).await.expect("user");
        assert_eq!(resolved.id(), user.id());
    }

    #[tokio::test]
    async fn missing_cookie_yields_no_user() {
        let (manager, _store, _user) = manager(Duration::hours(1)).await;
        assert!(manager.user_from_jar(&CookieJar::new()).await.is_none());
    }

    #[tokio::test]
    async fn expired_session_is_removed_on_read() {
        let (manager, store, user) = manager(Duration::seconds(-1)).await;
        let jar = manager.create(CookieJar::new(), &user).await.expect("create");
        let id = SessionId::new(jar.get("docshelf_session").expect("cookie").value().to_string());

        assert!(manager.user_from_jar(&jar).await.is_none());
        assert!(SessionStore::get(store.as_ref(), &id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn destroy_clears_cookie_and_row() {
        let (manager, store, user) = manager(Duration::hours(1)).await;
        let jar = manager.create(CookieJar::new(), &user).await.expect("create");
        let id = SessionId::new(jar.get("docshelf_session").expect("cookie").value().to_string());

        let jar = manager.destroy(jar).await;
        let cleared = jar.get("docshelf_session").expect("removal cookie");
        assert_eq!(cleared.value(), "");
        assert!(SessionStore::get(store.as_ref(), &id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn destroy_without_session_still_succeeds() {
        let (manager, _store, _user) = manager(Duration::hours(1)).await;
        let jar = manager.destroy(CookieJar::new()).await;
        assert_eq!(jar.get("docshelf_session").map(|c| c.value().to_string()), Some(String::new()));
    }
}
