//! Authentication extractors for Axum.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use docshelf_access::{AuthenticationError, GENERIC_AUTH_FAILURE, User};
use std::sync::Arc;

use super::AppState;

/// Extractor for requiring an authenticated user.
///
/// A bearer token takes precedence over the session cookie.
pub struct RequireAuth(pub User);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);

        if let Some(header) = parts.headers.get(AUTHORIZATION) {
            let header = header.to_str().map_err(|_| AuthRejection::NotAuthenticated)?;
            return match app_state.tokens.authenticate_header(header).await {
                Ok(user) => Ok(RequireAuth(user)),
                Err(AuthenticationError::Store { details }) => {
                    tracing::error!(error = %details, "token lookup failed");
                    Err(AuthRejection::InternalError)
                }
                Err(err) => {
                    tracing::debug!(reason = %err, "bearer token rejected");
                    Err(AuthRejection::NotAuthenticated)
                }
            };
        }

        let jar = CookieJar::from_headers(&parts.headers);
        app_state
            .sessions
            .user_from_jar(&jar)
            .await
            .map(RequireAuth)
            .ok_or(AuthRejection::NotAuthenticated)
    }
}

/// Extractor for requiring a global admin.
pub struct RequireAdmin(pub User);

impl<S> FromRequestParts<S> for RequireAdmin
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RequireAuth(user) = RequireAuth::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(AuthRejection::AdminRequired);
        }

        Ok(RequireAdmin(user))
    }
}

/// Rejection type for authentication extractors.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthRejection {
    NotAuthenticated,
    AdminRequired,
    InternalError,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::NotAuthenticated => (StatusCode::UNAUTHORIZED, GENERIC_AUTH_FAILURE).into_response(),
            Self::AdminRequired => (StatusCode::FORBIDDEN, "Admin access required").into_response(),
            Self::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
