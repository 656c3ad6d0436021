//! Repositories for users, sessions and API tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docshelf_access::{
    ApiToken, Session, SessionId, SessionStore, StoreError, TokenStore, User, UserStore,
};
use docshelf_core::{TokenId, UserId};
use sqlx::{FromRow, PgPool};

use super::{backend, decode, store_error};

/// Row type for user queries.
#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: Option<String>,
    password_hash: Option<String>,
    auth_source: String,
    role: String,
    robot: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn try_into_user(self) -> Result<User, StoreError> {
        Ok(User::with_all_fields(
            decode("user id", &self.id)?,
            self.username,
            self.email,
            self.password_hash,
            decode("auth source", &self.auth_source)?,
            decode("role", &self.role)?,
            self.robot,
            self.created_at,
            self.updated_at,
        ))
    }
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, auth_source, role, robot, created_at, updated_at";

/// Repository for user operations.
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Creates a new user repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn create(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, auth_source, role, robot, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id().to_string())
        .bind(user.username())
        .bind(user.email())
        .bind(user.password_hash())
        .bind(user.auth_source().as_str())
        .bind(user.role().as_str())
        .bind(user.is_robot())
        .bind(user.created_at())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(store_error("user", user.username()))?;

        Ok(())
    }

    async fn get(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.map(UserRow::try_into_user).transpose()
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

        row.map(UserRow::try_into_user).transpose()
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, role = $4, robot = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(user.id().to_string())
        .bind(user.email())
        .bind(user.password_hash())
        .bind(user.role().as_str())
        .bind(user.is_robot())
        .bind(user.updated_at())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "user",
                key: user.id().to_string(),
            });
        }
        Ok(())
    }

    async fn delete(&self, id: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn try_into_session(self) -> Result<Session, StoreError> {
        Ok(Session::with_all_fields(
            SessionId::new(self.id),
            decode("user id", &self.user_id)?,
            self.created_at,
            self.expires_at,
        ))
    }
}

/// Repository for session operations.
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    /// Creates a new session repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(session.id().as_str())
        .bind(session.user_id().to_string())
        .bind(session.created_at())
        .bind(session.expires_at())
        .execute(&self.pool)
        .await
        .map_err(store_error("session", session.user_id()))?;

        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, created_at, expires_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(SessionRow::try_into_session).transpose()
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected())
    }
}

/// Row type for API token queries.
#[derive(FromRow)]
struct TokenRow {
    id: String,
    token_hash: String,
    user_id: String,
    project_id: Option<String>,
    name: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TokenRow {
    fn try_into_token(self) -> Result<ApiToken, StoreError> {
        Ok(ApiToken {
            id: decode("token id", &self.id)?,
            token_hash: self.token_hash,
            user_id: decode("user id", &self.user_id)?,
            project_id: self
                .project_id
                .as_deref()
                .map(|id| decode("project id", id))
                .transpose()?,
            name: self.name,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

const TOKEN_COLUMNS: &str = "id, token_hash, user_id, project_id, name, expires_at, created_at";

/// Repository for API tokens. Only digests are stored.
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    /// Creates a new token repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for TokenRepository {
    async fn create(&self, token: &ApiToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO api_tokens (id, token_hash, user_id, project_id, name, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(token.id.to_string())
        .bind(&token.token_hash)
        .bind(token.user_id.to_string())
        .bind(token.project_id.map(|id| id.to_string()))
        .bind(&token.name)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_error("api token", token.id))?;

        Ok(())
    }

    async fn get_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>, StoreError> {
        let row: Option<TokenRow> = sqlx::query_as(&format!(
            "SELECT {TOKEN_COLUMNS} FROM api_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(TokenRow::try_into_token).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<ApiToken>, StoreError> {
        let rows: Vec<TokenRow> = sqlx::query_as(&format!(
            "SELECT {TOKEN_COLUMNS} FROM api_tokens WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(TokenRow::try_into_token).collect()
    }

    async fn delete(&self, id: TokenId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM api_tokens WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }
}
