//! Store retention.
//!
//! Realtime rows age out by deleting their feed-message headers; the
//! `ON DELETE CASCADE` constraints remove every descendant. Inactive
//! schedule versions are garbage-collected whole, deleting their tables
//! in referential order before the version row itself.

pub mod scheduler;

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::store::versions::VersionStore;
use crate::store::StoreError;

/// Deletion order honoring the schedule foreign keys.
const SCHEDULE_DELETE_ORDER: &[&str] = &[
    "stop_times",
    "trips",
    "shapes",
    "calendar_dates",
    "calendar",
    "transfers",
    "pathways",
    "levels",
    "stops",
    "routes",
    "agency",
];

const REALTIME_TABLES: &[&str] = &[
    "gtfs_rt.stop_time_updates",
    "gtfs_rt.trip_updates",
    "gtfs_rt.vehicle_positions",
    "gtfs_rt.alert_active_periods",
    "gtfs_rt.alert_informed_entities",
    "gtfs_rt.alert_translations",
    "gtfs_rt.alerts",
    "gtfs_rt.feed_messages",
];

#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-version garbage-collection report. A failed version does not stop
/// the sweep; its error is carried here instead.
#[derive(Debug)]
pub struct VersionCleanupOutcome {
    pub version_id: i64,
    pub version_name: String,
    pub records_deleted: u64,
    pub error: Option<String>,
}

pub struct Maintenance {
    pool: PgPool,
    versions: VersionStore,
}

impl Maintenance {
    pub fn new(pool: PgPool) -> Self {
        Self {
            versions: VersionStore::new(pool.clone()),
            pool,
        }
    }

    /// Delete feed messages older than `window`. One statement; children
    /// cascade. A zero window evicts everything received so far.
    pub async fn purge_stale_realtime(&self, window: Duration) -> Result<u64, RetentionError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let done = sqlx::query("DELETE FROM gtfs_rt.feed_messages WHERE received_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    /// Return space after a large purge. VACUUM cannot run inside a
    /// transaction, so each table is its own statement and failures are
    /// non-fatal.
    pub async fn vacuum_realtime_tables(&self) {
        for table in REALTIME_TABLES {
            let statement = format!("VACUUM {table}");
            if let Err(e) = sqlx::query(&statement).execute(&self.pool).await {
                warn!(table, error = %e, "Failed to vacuum table");
            }
        }
        debug!("Vacuumed realtime tables");
    }

    /// Garbage-collect inactive versions beyond the newest
    /// `keep_inactive`. Each version is deleted in its own transaction;
    /// one poisoned version does not block the rest of the sweep.
    pub async fn prune_schedule_versions(
        &self,
        keep_inactive: i64,
    ) -> Result<Vec<VersionCleanupOutcome>, RetentionError> {
        let candidates = self.versions.inactive_versions(keep_inactive).await?;
        if candidates.is_empty() {
            info!("No schedule versions to clean up");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(candidates.len());
        for version in candidates {
            info!(
                version_id = version.version_id,
                version_name = %version.version_name,
                "Deleting schedule version"
            );
            match self.delete_version(version.version_id).await {
                Ok(records_deleted) => {
                    info!(
                        version_id = version.version_id,
                        records_deleted, "Deleted schedule version"
                    );
                    outcomes.push(VersionCleanupOutcome {
                        version_id: version.version_id,
                        version_name: version.version_name,
                        records_deleted,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(
                        version_id = version.version_id,
                        error = %e,
                        "Failed to delete schedule version"
                    );
                    outcomes.push(VersionCleanupOutcome {
                        version_id: version.version_id,
                        version_name: version.version_name,
                        records_deleted: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    async fn delete_version(&self, version_id: i64) -> Result<u64, RetentionError> {
        let mut tx = self.pool.begin().await?;
        let mut total: u64 = 0;

        for table in SCHEDULE_DELETE_ORDER {
            let statement = format!("DELETE FROM gtfs.{table} WHERE version_id = $1");
            let done = sqlx::query(&statement)
                .bind(version_id)
                .execute(&mut *tx)
                .await?;
            if done.rows_affected() > 0 {
                debug!(table, records = done.rows_affected(), "Deleted version rows");
            }
            total += done.rows_affected();
        }

        sqlx::query("DELETE FROM gtfs.versions WHERE version_id = $1")
            .bind(version_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(total)
    }
}
