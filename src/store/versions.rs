//! Schedule version lifecycle.
//!
//! A version is created inactive, populated by the importer, then flipped
//! active in a single transaction that deactivates every other row. The
//! partial unique index on `gtfs.versions (is_active) WHERE is_active`
//! backs the at-most-one-active invariant; a second concurrent activation
//! trips it and fails cleanly.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};

use super::{unique_violation, StoreError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleVersion {
    pub version_id: i64,
    pub version_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub source_url: String,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct VersionStore {
    pool: PgPool,
}

impl VersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The single active version, if one exists.
    pub async fn active(&self) -> Result<Option<ScheduleVersion>, StoreError> {
        let version = sqlx::query_as::<_, ScheduleVersion>(
            r#"
            SELECT version_id, version_name, created_at, updated_at, is_active, source_url, description
            FROM gtfs.versions
            WHERE is_active
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(v) = &version {
            debug!(version_id = v.version_id, version_name = %v.version_name, "Found active version");
        }
        Ok(version)
    }

    /// True when the remote archive is newer than the active version, or
    /// when no version is active yet.
    pub async fn has_newer(&self, remote_last_modified: DateTime<Utc>) -> Result<bool, StoreError> {
        let active = self.active().await?;
        let newer = remote_is_newer(active.as_ref().map(|v| v.updated_at), remote_last_modified);
        info!(
            remote_last_modified = %remote_last_modified,
            active_updated_at = ?active.as_ref().map(|v| v.updated_at),
            newer,
            "Compared remote archive against active version"
        );
        Ok(newer)
    }

    /// Insert a new inactive version. `updated_at` records the archive's
    /// last-modified stamp so future newness checks compare against it.
    pub async fn create(
        &self,
        name: &str,
        source_url: &str,
        last_modified: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let description = format!(
            "GTFS data imported from {} at {}",
            source_url,
            last_modified.to_rfc3339()
        );

        let (version_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO gtfs.versions (version_name, source_url, updated_at, is_active, description)
            VALUES ($1, $2, $3, FALSE, $4)
            RETURNING version_id
            "#,
        )
        .bind(name)
        .bind(source_url)
        .bind(last_modified)
        .bind(&description)
        .fetch_one(&self.pool)
        .await?;

        info!(version_id, version_name = name, "Created new inactive version");
        Ok(version_id)
    }

    /// Atomically make `version_id` the only active version.
    pub async fn activate(&self, version_id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE gtfs.versions SET is_active = FALSE WHERE is_active")
            .execute(&mut *tx)
            .await?;

        let done = sqlx::query("UPDATE gtfs.versions SET is_active = TRUE WHERE version_id = $1")
            .bind(version_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_violation(e, StoreError::VersionConflict))?;

        if done.rows_affected() == 0 {
            return Err(StoreError::VersionNotFound(version_id));
        }

        tx.commit()
            .await
            .map_err(|e| unique_violation(e, StoreError::VersionConflict))?;

        info!(version_id, "Activated version");
        Ok(())
    }

    /// Inactive versions older than the `skip_newest` most recent ones,
    /// newest first. These are the garbage-collection candidates.
    pub async fn inactive_versions(
        &self,
        skip_newest: i64,
    ) -> Result<Vec<ScheduleVersion>, StoreError> {
        let versions = sqlx::query_as::<_, ScheduleVersion>(
            r#"
            SELECT version_id, version_name, created_at, updated_at, is_active, source_url, description
            FROM gtfs.versions
            WHERE NOT is_active
            ORDER BY created_at DESC
            OFFSET $1
            "#,
        )
        .bind(skip_newest.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(versions)
    }
}

/// Newness rule shared with the scheduler: a missing active version
/// always counts as outdated; otherwise the remote stamp must strictly
/// exceed the active one.
pub fn remote_is_newer(active_updated_at: Option<DateTime<Utc>>, remote: DateTime<Utc>) -> bool {
    match active_updated_at {
        None => true,
        Some(active) => remote > active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn no_active_version_means_newer() {
        assert!(remote_is_newer(None, ts(1_000)));
    }

    #[test]
    fn strictly_newer_remote_wins() {
        assert!(remote_is_newer(Some(ts(1_000)), ts(1_001)));
    }

    #[test]
    fn equal_timestamp_is_not_newer() {
        assert!(!remote_is_newer(Some(ts(1_000)), ts(1_000)));
    }

    #[test]
    fn older_remote_is_not_newer() {
        assert!(!remote_is_newer(Some(ts(1_000)), ts(999)));
    }
}
