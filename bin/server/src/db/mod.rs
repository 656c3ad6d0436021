//! PostgreSQL-backed store implementations.

mod access;
mod identity;

pub use access::{
    GlobalAccessRepository, GroupMappingRepository, ProjectAccessRepository, ProjectRepository,
};
pub use identity::{SessionRepository, TokenRepository, UserRepository};

use docshelf_access::StoreError;
use sqlx::PgPool;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use crate::auth::Stores;

impl Stores {
    /// Every store backed by one connection pool.
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(UserRepository::new(pool.clone())),
            sessions: Arc::new(SessionRepository::new(pool.clone())),
            tokens: Arc::new(TokenRepository::new(pool.clone())),
            projects: Arc::new(ProjectRepository::new(pool.clone())),
            access: Arc::new(ProjectAccessRepository::new(pool.clone())),
            mappings: Arc::new(GroupMappingRepository::new(pool.clone())),
            global: Arc::new(GlobalAccessRepository::new(pool)),
        }
    }
}

/// Maps a driver error, turning unique violations into `Conflict`.
fn store_error(entity: &'static str, key: impl Display) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        if err
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation())
        {
            return StoreError::Conflict {
                entity,
                key: key.to_string(),
            };
        }
        StoreError::Backend {
            details: err.to_string(),
        }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend {
        details: err.to_string(),
    }
}

/// Parses a text column into a domain value.
fn decode<T>(column: &str, value: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e| StoreError::Backend {
        details: format!("invalid {column} '{value}': {e}"),
    })
}
