//! HTTP routes.

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::{AppState, routes};

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Auth routes
        .route("/auth/login", post(routes::login))
        .route("/auth/oidc/login", get(routes::oidc_login))
        .route("/auth/oidc/callback", get(routes::oidc_callback))
        .route("/auth/logout", post(routes::logout))
        // API
        .route("/api/whoami", get(routes::whoami))
        .route("/api/projects/{id}/access", get(routes::project_access))
        .route("/api/tokens", post(routes::issue_token))
        .route("/api/tokens/{id}", delete(routes::revoke_token))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
