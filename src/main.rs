//! Process entry point.
//!
//! Wires the static schedule pipeline, the realtime pipeline and the
//! retention scheduler together, owns the cancellation token, and tears
//! everything down on Ctrl-C with the connection pool closed last.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transit_ingest::config::{Config, LoggingConfig};
use transit_ingest::maintenance::scheduler::RetentionScheduler;
use transit_ingest::realtime::RealtimeManager;
use transit_ingest::schedule::StaticScheduler;
use transit_ingest::{store, ImportLock};

const USER_AGENT: &str = concat!("transit-ingest/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        dataset_ref = %config.schedule.dataset_ref,
        realtime_endpoints = config.realtime.endpoints.len(),
        "Transit ingest service starting"
    );

    let pool = match store::connect(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    let migrator = sqlx::migrate!("./migrations");
    if let Err(e) = migrator.run(&pool).await {
        tracing::error!(error = %e, "Failed to run database migrations");
        std::process::exit(1);
    }
    tracing::info!(
        migrations = migrator.migrations.len(),
        "Database migrations applied"
    );

    let client = match reqwest::Client::builder().user_agent(USER_AGENT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let import_lock: ImportLock = Arc::new(RwLock::new(()));
    let mut handles = Vec::new();

    let scheduler = StaticScheduler::new(
        config.schedule.clone(),
        pool.clone(),
        client.clone(),
        import_lock.clone(),
    );
    let scheduler_cancel = cancel.clone();
    handles.push(tokio::spawn(async move {
        scheduler.run(scheduler_cancel).await;
    }));

    if config.realtime.enabled() {
        match RealtimeManager::new(config.realtime.clone(), client) {
            Ok(manager) => match manager.start(pool.clone(), &cancel).await {
                Ok(mut realtime_handles) => handles.append(&mut realtime_handles),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start realtime pipeline, continuing without it");
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Invalid realtime configuration");
                std::process::exit(1);
            }
        }
    } else {
        tracing::info!("Realtime pipeline disabled (no API key configured)");
    }

    handles.extend(
        RetentionScheduler::new(pool.clone(), config.retention.clone(), import_lock.clone())
            .start(&cancel),
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Could not listen for shutdown signal, stopping"),
    }
    cancel.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    pool.close().await;
    tracing::info!("Transit ingest service stopped");
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},sqlx=warn", logging.level).into());

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter);

    match logging.file_path.as_deref() {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(Arc::new(file)),
                    )
                    .init();
            }
            Err(e) => {
                registry.init();
                tracing::warn!(path, error = %e, "Could not open log file, console only");
            }
        },
        None => registry.init(),
    }
}
