//! Postgres access: pool construction, bulk insert batching, and the
//! schedule version lifecycle.

pub mod bulk;
pub mod versions;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("version {0} does not exist")]
    VersionNotFound(i64),
    #[error("another version activation committed first")]
    VersionConflict,
    #[error("no active schedule version")]
    NoActiveVersion,
}

/// Connect a pool sized for the daemon: one connection per in-flight
/// import or realtime transaction plus headroom for maintenance.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string)
        .await
}

/// Map a unique-constraint violation onto a dedicated error, leaving
/// everything else as a plain database error.
pub(crate) fn unique_violation(err: sqlx::Error, mapped: StoreError) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => mapped,
        _ => StoreError::Database(err),
    }
}
