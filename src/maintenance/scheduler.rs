//! Periodic retention loops.
//!
//! Two independent tasks: a frequent sweep of aged realtime rows and a
//! daily sweep of inactive schedule versions. Both take the read side of
//! the import lock and skip their cycle while an import holds the write
//! side, so retention never races an in-flight import transaction.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::RetentionConfig;
use crate::ImportLock;

use super::Maintenance;

/// Short grace period after startup before the first realtime sweep.
const REALTIME_INITIAL_DELAY: Duration = Duration::from_secs(60);
/// Longer delay for the version sweep so a startup import can finish.
const SCHEDULE_INITIAL_DELAY: Duration = Duration::from_secs(5 * 60);

pub struct RetentionScheduler {
    maintenance: Maintenance,
    config: RetentionConfig,
    import_lock: ImportLock,
}

impl RetentionScheduler {
    pub fn new(pool: PgPool, config: RetentionConfig, import_lock: ImportLock) -> Self {
        Self {
            maintenance: Maintenance::new(pool),
            config,
            import_lock,
        }
    }

    pub fn start(self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            realtime_interval_secs = self.config.realtime_interval.as_secs(),
            realtime_window_secs = self.config.realtime_window.as_secs(),
            schedule_interval_secs = self.config.schedule_interval.as_secs(),
            keep_inactive_versions = self.config.keep_inactive_versions,
            "Starting retention scheduler"
        );

        let scheduler = Arc::new(self);

        let realtime = scheduler.clone();
        let realtime_cancel = cancel.clone();
        let realtime_handle = tokio::spawn(async move {
            tokio::select! {
                _ = realtime_cancel.cancelled() => return,
                _ = tokio::time::sleep(REALTIME_INITIAL_DELAY) => {}
            }
            realtime.realtime_cycle().await;

            let mut ticker = tokio::time::interval(realtime.config.realtime_interval);
            ticker.tick().await; // immediate tick; covered by the cycle above
            loop {
                tokio::select! {
                    _ = realtime_cancel.cancelled() => {
                        info!("Realtime retention loop stopped");
                        return;
                    }
                    _ = ticker.tick() => realtime.realtime_cycle().await,
                }
            }
        });

        let schedule = scheduler.clone();
        let schedule_cancel = cancel.clone();
        let schedule_handle = tokio::spawn(async move {
            tokio::select! {
                _ = schedule_cancel.cancelled() => return,
                _ = tokio::time::sleep(SCHEDULE_INITIAL_DELAY) => {}
            }
            schedule.schedule_cycle().await;

            let mut ticker = tokio::time::interval(schedule.config.schedule_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = schedule_cancel.cancelled() => {
                        info!("Schedule retention loop stopped");
                        return;
                    }
                    _ = ticker.tick() => schedule.schedule_cycle().await,
                }
            }
        });

        vec![realtime_handle, schedule_handle]
    }

    async fn realtime_cycle(&self) {
        let Ok(_read_guard) = self.import_lock.try_read() else {
            debug!("Skipping realtime retention, import in progress");
            return;
        };

        match self
            .maintenance
            .purge_stale_realtime(self.config.realtime_window)
            .await
        {
            Ok(0) => debug!("No stale realtime data to purge"),
            Ok(deleted) => {
                info!(
                    feed_messages_deleted = deleted,
                    retention_secs = self.config.realtime_window.as_secs(),
                    "Purged stale realtime data"
                );
                self.maintenance.vacuum_realtime_tables().await;
            }
            Err(e) => error!(error = %e, "Realtime retention failed"),
        }
    }

    async fn schedule_cycle(&self) {
        let Ok(_read_guard) = self.import_lock.try_read() else {
            debug!("Skipping schedule retention, import in progress");
            return;
        };

        match self
            .maintenance
            .prune_schedule_versions(self.config.keep_inactive_versions)
            .await
        {
            Ok(outcomes) => {
                let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
                if !outcomes.is_empty() {
                    info!(
                        versions_processed = outcomes.len(),
                        versions_failed = failed,
                        "Schedule version cleanup completed"
                    );
                }
            }
            Err(e) => error!(error = %e, "Schedule version cleanup failed"),
        }
    }
}
