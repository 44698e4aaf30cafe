//! Realtime pipeline: endpoint pollers fanning into a serial DB writer.

pub mod consumer;
pub mod processor;

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ConfigError, RealtimeConfig};

use consumer::{RealtimeConsumer, FEED_CHANNEL_CAPACITY};
use processor::{ProcessError, RealtimeProcessor};

pub struct RealtimeManager {
    config: RealtimeConfig,
    client: reqwest::Client,
}

impl RealtimeManager {
    pub fn new(config: RealtimeConfig, client: reqwest::Client) -> Result<Self, ConfigError> {
        if config.api_key.is_empty() {
            return Err(ConfigError::MissingVar("GTFS_RT_API_KEY"));
        }
        if config.endpoints.is_empty() {
            return Err(ConfigError::InvalidVar {
                var: "GTFS_RT_ENDPOINTS",
                value: "no endpoints configured".into(),
            });
        }
        config.validate()?;
        Ok(Self { config, client })
    }

    /// Wire the fan-in channel, start the pollers and the processor.
    pub async fn start(
        self,
        pool: PgPool,
        cancel: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, ProcessError> {
        let (results_tx, results_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);

        let processor = RealtimeProcessor::new(pool).await?;
        let consumer = Arc::new(RealtimeConsumer::new(self.config, self.client, results_tx));

        let mut handles = consumer.start(cancel);
        let processor_cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            processor.run(results_rx, processor_cancel).await;
        }));

        info!("Realtime pipeline started");
        Ok(handles)
    }
}
