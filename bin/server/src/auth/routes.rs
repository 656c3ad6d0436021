//! Authentication routes and the small JSON API built on them.

use axum::{
    Json,
    extract::{Form, Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, TimeDelta, Utc};
use docshelf_access::{AuthSource, AuthenticationError, Credentials, Role, User};
use docshelf_core::{ProjectId, TokenId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AppState, RequireAdmin, RequireAuth};
use crate::error::ApiError;

/// Form body of `POST /auth/login`.
#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

/// Query parameters for the identity-provider callback.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set by the provider when the user denied consent or the request failed.
    error: Option<String>,
}

/// Authenticates a username and password against the login chain.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = Credentials::new(form.username, form.password);
    let user = state.login.authenticate(&credentials).await?;

    let jar = state.sessions.create(jar, &user).await?;
    Ok((jar, Redirect::to("/")))
}

/// Starts the identity-provider flow.
pub async fn oidc_login(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    let oidc = state.oidc.as_ref().ok_or(ApiError::NotFound)?;
    Ok(Redirect::to(&oidc.generate_auth_url()))
}

/// Completes the identity-provider flow.
///
/// The state is checked (and consumed) before anything else.
pub async fn oidc_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let oidc = state.oidc.as_ref().ok_or(ApiError::NotFound)?;

    let state_ok = query
        .state
        .as_deref()
        .is_some_and(|value| oidc.validate_state(value));
    if !state_ok {
        tracing::warn!("identity provider callback with unknown or reused state");
        return Err(AuthenticationError::InvalidCredentials.into());
    }

    if let Some(error) = query.error {
        return Err(AuthenticationError::Upstream {
            source: AuthSource::Oidc,
            reason: error,
        }
        .into());
    }

    let code = query.code.ok_or(AuthenticationError::MissingClaim {
        claim: "code".to_string(),
    })?;
    let user = oidc.handle_callback(&code).await?;

    let jar = state.sessions.create(jar, &user).await?;
    Ok((jar, Redirect::to("/")))
}

/// Logs out the user by deleting their session.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    (state.sessions.destroy(jar).await, Redirect::to("/"))
}

/// The authenticated user as seen by API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct WhoAmI {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub auth_source: AuthSource,
    pub role: Role,
    pub robot: bool,
}

impl From<&User> for WhoAmI {
    fn from(user: &User) -> Self {
        Self {
            id: user.id().to_string(),
            username: user.username().to_string(),
            email: user.email().map(str::to_string),
            auth_source: user.auth_source(),
            role: user.role(),
            robot: user.is_robot(),
        }
    }
}

pub async fn whoami(RequireAuth(user): RequireAuth) -> Json<WhoAmI> {
    Json(WhoAmI::from(&user))
}

/// What the caller may do on one project.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectAccessView {
    pub project: String,
    pub role: Option<Role>,
    pub can_view: bool,
    pub can_upload: bool,
}

/// Reports the caller's access to a project.
///
/// Bearer tokens are checked against the project's scope. Without an
/// `Authorization` header the session cookie is used, and anonymous
/// callers are answered too.
pub async fn project_access(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ProjectAccessView>, ApiError> {
    let project_id: ProjectId = id.parse().map_err(|_| ApiError::NotFound)?;
    let project = state
        .projects
        .get(project_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let user = match headers.get(AUTHORIZATION) {
        Some(value) => {
            let header = value.to_str().map_err(|_| AuthenticationError::InvalidToken)?;
            Some(state.tokens.authenticate_for_project(header, project.id).await?)
        }
        None => {
            state
                .sessions
                .user_from_jar(&CookieJar::from_headers(&headers))
                .await
        }
    };

    let can_view = state.resolver.can_view(&project, user.as_ref()).await?;
    let (role, can_upload) = match &user {
        Some(user) => (
            state.resolver.project_role(&project, user).await?,
            state.resolver.can_upload(&project, user).await?,
        ),
        None => (None, false),
    };

    Ok(Json(ProjectAccessView {
        project: project.slug,
        role,
        can_view,
        can_upload,
    }))
}

/// Longest lifetime an issued token may be given.
pub const MAX_TOKEN_DAYS: i64 = 3650;

/// Body of `POST /api/tokens`.
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub username: String,
    pub name: String,
    /// Project slug the token is bound to; global when absent.
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

/// A newly issued token. The secret is never shown again.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedTokenView {
    pub id: String,
    pub secret: String,
    pub project_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Converts a requested lifetime into an absolute expiry.
fn token_expiry(days: i64) -> Result<DateTime<Utc>, ApiError> {
    if !(1..=MAX_TOKEN_DAYS).contains(&days) {
        return Err(ApiError::BadRequest {
            reason: format!("expires_in_days must be between 1 and {MAX_TOKEN_DAYS}"),
        });
    }
    TimeDelta::try_days(days)
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .ok_or_else(|| ApiError::BadRequest {
            reason: "expires_in_days is out of range".to_string(),
        })
}

/// Issues an API token for any user. Admin only.
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Json(request): Json<IssueTokenRequest>,
) -> Result<(StatusCode, Json<IssuedTokenView>), ApiError> {
    let owner = state
        .users
        .get_by_username(&request.username)
        .await?
        .ok_or(ApiError::NotFound)?;

    let project_id = match request.project.as_deref() {
        Some(slug) => Some(
            state
                .projects
                .get_by_slug(slug)
                .await?
                .ok_or(ApiError::NotFound)?
                .id,
        ),
        None => None,
    };
    let expires_at = request.expires_in_days.map(token_expiry).transpose()?;

    let issued = state
        .tokens
        .issue(owner.id(), request.name, project_id, expires_at)
        .await?;
    tracing::info!(
        admin = %admin.username(),
        owner = %owner.username(),
        token_id = %issued.token.id,
        "API token issued"
    );

    Ok((
        StatusCode::CREATED,
        Json(IssuedTokenView {
            id: issued.token.id.to_string(),
            secret: issued.secret,
            project_id: issued.token.project_id.map(|id| id.to_string()),
            expires_at: issued.token.expires_at,
        }),
    ))
}

/// Revokes an API token. Admin only.
pub async fn revoke_token(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let token_id: TokenId = id.parse().map_err(|_| ApiError::NotFound)?;
    state.tokens.revoke(token_id).await?;
    tracing::info!(admin = %admin.username(), token_id = %token_id, "API token revoked");
    Ok(StatusCode::NO_CONTENT)
}
