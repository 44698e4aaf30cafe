//! GTFS-realtime feed consumer.
//!
//! One polling task per configured endpoint, all drawing fetch tokens
//! from a shared per-minute budget. Decoded messages fan into a bounded
//! channel toward the processor; when the channel is full the result is
//! dropped with a warning rather than blocking the ticker. Each endpoint
//! keeps its last decoded message with its ETag, so unchanged feeds are
//! answered from cache (and revalidated with `If-None-Match` once the
//! cache entry goes stale).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gtfs_realtime::FeedMessage;
use prost::Message;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EndpointConfig, RealtimeConfig};

pub const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const FEED_CHANNEL_CAPACITY: usize = 1000;

const FEED_TIMEOUT: Duration = Duration::from_secs(30);
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);
const RATE_LIMIT_REFILL_INTERVAL: Duration = Duration::from_secs(60);
/// Upper bound on a feed response body (50 MB).
const MAX_FEED_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("rate limit exceeded")]
    RateLimit,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed returned HTTP {0}")]
    Remote(reqwest::StatusCode),
    #[error("feed not modified but nothing cached")]
    NotModifiedWithoutCache,
    #[error("feed response too large: {0} bytes")]
    TooLarge(usize),
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// One poll outcome, successful or not, pushed into the fan-in channel.
pub struct FeedResult {
    pub endpoint: EndpointConfig,
    pub message: Option<Arc<FeedMessage>>,
    pub fetched_at: chrono::DateTime<Utc>,
    pub error: Option<FeedError>,
}

struct CacheEntry {
    message: Arc<FeedMessage>,
    etag: Option<String>,
    cached_at: Instant,
}

/// Token bucket refilled to capacity once a minute. Every fetch consumes
/// one permit; a poller that cannot get one within the wait window skips
/// to its next tick.
struct RateLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl RateLimiter {
    fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    async fn acquire(&self) -> Result<(), FeedError> {
        match tokio::time::timeout(RATE_LIMIT_WAIT, self.permits.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                Ok(())
            }
            Ok(Err(_)) | Err(_) => Err(FeedError::RateLimit),
        }
    }

    fn refill(&self) {
        let missing = self.capacity.saturating_sub(self.permits.available_permits());
        if missing > 0 {
            self.permits.add_permits(missing);
        }
    }
}

pub struct RealtimeConsumer {
    config: RealtimeConfig,
    client: reqwest::Client,
    limiter: RateLimiter,
    cache: RwLock<HashMap<String, CacheEntry>>,
    results_tx: mpsc::Sender<FeedResult>,
}

impl RealtimeConsumer {
    pub fn new(
        config: RealtimeConfig,
        client: reqwest::Client,
        results_tx: mpsc::Sender<FeedResult>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_per_min as usize);
        Self {
            config,
            client,
            limiter,
            cache: RwLock::new(HashMap::new()),
            results_tx,
        }
    }

    /// Spawn the refill ticker and one poller per endpoint.
    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        info!(
            endpoints = self.config.endpoints.len(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            rate_limit_per_min = self.config.rate_limit_per_min,
            "Starting realtime consumer"
        );

        let mut handles = Vec::with_capacity(self.config.endpoints.len() + 1);

        let refill_consumer = self.clone();
        let refill_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RATE_LIMIT_REFILL_INTERVAL);
            // The bucket starts full; skip the immediate tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = refill_cancel.cancelled() => return,
                    _ = ticker.tick() => refill_consumer.limiter.refill(),
                }
            }
        }));

        for endpoint in self.config.endpoints.clone() {
            let consumer = self.clone();
            let poll_cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                consumer.poll_endpoint(endpoint, poll_cancel).await;
            }));
        }

        handles
    }

    async fn poll_endpoint(&self, endpoint: EndpointConfig, cancel: CancellationToken) {
        info!(endpoint = %endpoint.name, url = %endpoint.url, "Starting endpoint polling");

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(endpoint = %endpoint.name, "Endpoint polling stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let result = self.fetch_feed(&endpoint).await;
                    match self.results_tx.try_send(result) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(endpoint = %endpoint.name, "Feed channel full, dropping result");
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(endpoint = %endpoint.name, "Feed channel closed, stopping poller");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn fetch_feed(&self, endpoint: &EndpointConfig) -> FeedResult {
        let fetched_at = Utc::now();
        match self.fetch_message(endpoint).await {
            Ok(message) => FeedResult {
                endpoint: endpoint.clone(),
                message: Some(message),
                fetched_at,
                error: None,
            },
            Err(error) => FeedResult {
                endpoint: endpoint.clone(),
                message: None,
                fetched_at,
                error: Some(error),
            },
        }
    }

    async fn fetch_message(&self, endpoint: &EndpointConfig) -> Result<Arc<FeedMessage>, FeedError> {
        // A fresh cache entry is served without spending a token.
        let cached_etag = {
            let cache = self.cache.read().await;
            match cache.get(&endpoint.name) {
                Some(entry) if entry.cached_at.elapsed() < self.config.cache_expiration => {
                    debug!(endpoint = %endpoint.name, "Serving feed from cache");
                    return Ok(entry.message.clone());
                }
                Some(entry) => entry.etag.clone(),
                None => None,
            }
        };

        self.limiter.acquire().await?;

        let mut request = self
            .client
            .get(&endpoint.url)
            .timeout(FEED_TIMEOUT)
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/x-protobuf");
        if let Some(etag) = &cached_etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            let cache = self.cache.read().await;
            return match cache.get(&endpoint.name) {
                Some(entry) => {
                    debug!(endpoint = %endpoint.name, "Feed not modified, using cached version");
                    Ok(entry.message.clone())
                }
                None => Err(FeedError::NotModifiedWithoutCache),
            };
        }

        if response.status() != reqwest::StatusCode::OK {
            return Err(FeedError::Remote(response.status()));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await?;
        if body.len() > MAX_FEED_SIZE {
            return Err(FeedError::TooLarge(body.len()));
        }
        let message = Arc::new(FeedMessage::decode(body.as_ref())?);

        {
            let mut cache = self.cache.write().await;
            cache.insert(
                endpoint.name.clone(),
                CacheEntry {
                    message: message.clone(),
                    etag,
                    cached_at: Instant::now(),
                },
            );
        }

        debug!(
            endpoint = %endpoint.name,
            entities = message.entity.len(),
            "Fetched feed"
        );
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_exhausts_and_refills() {
        let limiter = RateLimiter::new(2);
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        // Bucket empty: the third acquire waits out the timeout and fails.
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, FeedError::RateLimit));

        limiter.refill();
        limiter.acquire().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn refill_tops_up_to_capacity_not_beyond() {
        let limiter = RateLimiter::new(3);
        limiter.acquire().await.unwrap();
        limiter.refill();
        limiter.refill();
        assert_eq!(limiter.permits.available_permits(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_a_permit_freed_in_time() {
        let limiter = Arc::new(RateLimiter::new(1));
        limiter.acquire().await.unwrap();

        let waiter = limiter.clone();
        let handle = tokio::spawn(async move { waiter.acquire().await });

        // Refill before the 5 s wait window expires.
        tokio::time::sleep(Duration::from_secs(1)).await;
        limiter.refill();

        handle.await.unwrap().unwrap();
    }
}
