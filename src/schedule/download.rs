//! Archive download with atomic placement.
//!
//! The payload streams into a sibling `.part` file which is renamed onto
//! the destination only after the last byte is flushed, so a crashed or
//! failed download never leaves a truncated archive at the final path.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Large archives over slow links; well above the feed-fetch timeout.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Upper bound on an archive download (500 MB).
const MAX_DOWNLOAD_SIZE: u64 = 500 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("download returned HTTP {0}")]
    Http(reqwest::StatusCode),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download exceeded size limit at {0} bytes")]
    TooLarge(u64),
}

pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Stream `url` to `dest`, returning the number of bytes written.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = part_path(dest);

        info!(url, dest = %dest.display(), "Starting download");

        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(DownloadError::Http(response.status()));
        }

        let total = response.content_length();
        if let Some(total) = total {
            if total > MAX_DOWNLOAD_SIZE {
                return Err(DownloadError::TooLarge(total));
            }
        }

        let mut file = tokio::fs::File::create(&temp).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut last_log = Instant::now();

        let outcome: Result<(), DownloadError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                written += chunk.len() as u64;
                if written > MAX_DOWNLOAD_SIZE {
                    return Err(DownloadError::TooLarge(written));
                }
                file.write_all(&chunk).await?;

                if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                    match total {
                        Some(total) if total > 0 => debug!(
                            bytes_downloaded = written,
                            total_bytes = total,
                            progress_percent = format!("{:.1}", written as f64 / total as f64 * 100.0),
                            "Download progress"
                        ),
                        _ => debug!(bytes_downloaded = written, "Download progress"),
                    }
                    last_log = Instant::now();
                }
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        drop(file);

        if let Err(e) = outcome {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&temp, dest).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        info!(url, dest = %dest.display(), size_bytes = written, "Download completed");
        Ok(written)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
