//! Static schedule pipeline.
//!
//! Periodically checks the open-data portal for a newer schedule archive,
//! downloads it, imports it as a fresh inactive version and activates it
//! only on complete success. The previously active version keeps serving
//! until the atomic swap; a failed import leaves an inactive version
//! behind for the maintenance sweep to collect.

pub mod download;
pub mod import;
pub mod metadata;
pub mod model;
pub mod parser;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ScheduleConfig;
use crate::store::versions::VersionStore;
use crate::store::StoreError;
use crate::ImportLock;

use download::{DownloadError, Downloader};
use import::{ImportError, Importer};
use metadata::{DatasetMetadata, MetadataError, MetadataFetcher};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct StaticScheduler {
    config: ScheduleConfig,
    fetcher: MetadataFetcher,
    downloader: Downloader,
    importer: Importer,
    versions: VersionStore,
    import_lock: ImportLock,
}

impl StaticScheduler {
    pub fn new(
        config: ScheduleConfig,
        pool: PgPool,
        client: reqwest::Client,
        import_lock: ImportLock,
    ) -> Self {
        let timezone = config.parsed_timezone();
        Self {
            fetcher: MetadataFetcher::new(client.clone(), config.catalog_base.clone(), timezone),
            downloader: Downloader::new(client),
            importer: Importer::new(pool.clone(), config.default_source_id),
            versions: VersionStore::new(pool),
            import_lock,
            config,
        }
    }

    /// Run the serial check loop until cancellation. The first check
    /// fires immediately; cycle errors are logged and the loop goes on.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            dataset_ref = %self.config.dataset_ref,
            check_interval_secs = self.config.check_interval.as_secs(),
            "Starting schedule check loop"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Schedule check loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_and_update(&cancel).await {
                        error!(error = %e, "Schedule check cycle failed");
                    }
                }
            }
        }
    }

    async fn check_and_update(&self, cancel: &CancellationToken) -> Result<(), ScheduleError> {
        debug!(dataset_ref = %self.config.dataset_ref, "Checking for schedule updates");

        let metadata = self.fetcher.fetch(&self.config.dataset_ref).await?;
        if !self.versions.has_newer(metadata.last_modified).await? {
            debug!("No new schedule version available");
            return Ok(());
        }

        info!(
            last_modified = %metadata.last_modified,
            url = %metadata.url,
            "New schedule version detected, starting import"
        );

        let download_dir = PathBuf::from(&self.config.download_dir);
        let archive_path = download_dir.join(archive_file_name(metadata.last_modified));
        self.downloader.download(&metadata.url, &archive_path).await?;

        let outcome = self.import_archive(&metadata, &archive_path, cancel).await;

        if let Err(e) = tokio::fs::remove_file(&archive_path).await {
            debug!(path = %archive_path.display(), error = %e, "Could not remove downloaded archive");
        }
        outcome
    }

    /// Create a version, import every source under it, then flip the
    /// active pointer. Holds the import write lock across entity import
    /// and activation so retention cannot run concurrently.
    async fn import_archive(
        &self,
        metadata: &DatasetMetadata,
        archive_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ScheduleError> {
        let name = version_name(metadata.last_modified);
        let version_id = self
            .versions
            .create(&name, &metadata.url, metadata.last_modified)
            .await?;

        let scratch_dir =
            PathBuf::from(&self.config.download_dir).join(format!("extract-{version_id}"));
        tokio::fs::create_dir_all(&scratch_dir).await?;

        let _import_guard = self.import_lock.write().await;

        let import_result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(version_id, "Import cancelled, version left inactive");
                None
            }
            result = self.importer.import(archive_path, &scratch_dir, version_id) => Some(result),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&scratch_dir).await {
            debug!(path = %scratch_dir.display(), error = %e, "Could not remove scratch directory");
        }

        let summary = match import_result {
            None => return Ok(()),
            Some(result) => result?,
        };

        self.versions.activate(version_id).await?;

        info!(
            version_id,
            version_name = %name,
            sources = summary.sources.len(),
            total_rows = summary.total_rows(),
            "Imported and activated new schedule version"
        );
        Ok(())
    }
}

fn archive_file_name(last_modified: DateTime<Utc>) -> String {
    format!("gtfs_{}.zip", last_modified.format("%Y%m%d_%H%M%S"))
}

fn version_name(last_modified: DateTime<Utc>) -> String {
    format!("gtfs_{}", last_modified.format("%Y-%m-%d_%H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn archive_and_version_names_derive_from_last_modified() {
        let stamp = Utc.with_ymd_and_hms(2026, 7, 15, 3, 10, 42).unwrap();
        assert_eq!(archive_file_name(stamp), "gtfs_20260715_031042.zip");
        assert_eq!(version_name(stamp), "gtfs_2026-07-15_03:10:42");
    }
}
