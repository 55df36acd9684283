//! Sensor Pipeline
//!
//! Asynchronous sensor-reading pipeline:
//! - bounded reading queue (in-process or Redpanda)
//! - inference worker pool with one anomaly model per sensor kind
//! - time-series store (in-memory or ClickHouse)
//! - periodic pruning of devices that have gone silent

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use model_registry::{ModelConfig, ModelRegistry};
use pipeline_core::{validate_reading, Error, Reading};
use reading_queue::{MemoryQueue, QueueBackend, QueueConfig, ReadingQueue, RedpandaQueue};
use telemetry::{health, init_tracing_from_env, metrics};
use timeseries_store::{
    ClickHouseClient, ClickHouseStore, MemoryStore, ReadingStore, StoreBackend, StoreConfig,
};
use worker::{WorkerConfig, WorkerScheduler};

/// Application configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    worker: WorkerConfig,

    #[serde(default)]
    queue: QueueConfig,

    #[serde(default)]
    store: StoreConfig,

    #[serde(default)]
    model: ModelConfig,

    /// Read newline-delimited JSON readings from stdin
    #[serde(default)]
    stdin_producer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    // rustls 0.23+ requires explicit crypto provider selection before any TLS use
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!("Starting Sensor Pipeline v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(
        queue = ?config.queue.backend,
        store = ?config.store.backend,
        workers = config.worker.worker_count,
        retention_secs = config.worker.retention_threshold_secs,
        "Loaded configuration"
    );

    // Reading queue
    let (queue, redpanda): (Arc<dyn ReadingQueue>, Option<Arc<RedpandaQueue>>) =
        match config.queue.backend {
            QueueBackend::Memory => {
                health().queue.set_healthy();
                (Arc::new(MemoryQueue::new(config.queue.capacity)), None)
            }
            QueueBackend::Redpanda => {
                let queue = Arc::new(RedpandaQueue::new(
                    config.queue.redpanda.clone(),
                    config.queue.capacity,
                ));
                let _flush_handle = queue.clone().start_flush_task();
                check_redpanda(&config.queue).await;
                (queue.clone(), Some(queue))
            }
        };

    // Time-series store
    let store: Arc<dyn ReadingStore> = match config.store.backend {
        StoreBackend::Memory => {
            health().store.set_healthy();
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Clickhouse => {
            let client = ClickHouseClient::new(config.store.clickhouse.clone())
                .context("Failed to create ClickHouse client")?;

            if let Err(e) = timeseries_store::health::init_schema(&client).await {
                // Schema might already exist; the health check decides.
                error!(error = %e, "Failed to initialize ClickHouse schema");
            }
            check_clickhouse(&client).await;

            Arc::new(ClickHouseStore::new(client))
        }
    };

    info!(status = ?health().status(), "Startup health checks complete");

    let registry = Arc::new(ModelRegistry::new(config.model.clone()));

    let scheduler = WorkerScheduler::new(config.worker.clone(), queue.clone(), registry, store)
        .context("Invalid worker configuration")?;
    let workers = scheduler.start();

    if config.stdin_producer {
        tokio::spawn(run_stdin_producer(queue.clone()));
        info!("Reading newline-delimited JSON readings from stdin");
    }

    shutdown_signal().await;

    info!("Shutting down...");
    let abandoned = workers.shutdown().await;
    if abandoned > 0 {
        warn!(count = abandoned, "Readings dropped at shutdown");
    }

    // Produce anything still staged for the topic
    if let Some(redpanda) = redpanda {
        match redpanda.flush().await {
            Ok(count) if count > 0 => info!(count = count, "Flushed staged readings"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to flush staged readings"),
        }
    }

    let snapshot = metrics().snapshot();
    info!(
        persisted = snapshot.readings_persisted,
        dropped = snapshot.readings_dropped,
        anomalies = snapshot.anomalies_detected,
        rows_pruned = snapshot.rows_pruned,
        "Shutdown complete"
    );
    Ok(())
}

/// Load configuration from defaults, file and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables, e.g. PIPELINE_WORKER__WORKER_COUNT
        .add_source(
            config::Environment::default()
                .prefix("PIPELINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Lists and secrets are easier to set flat
    if let Ok(brokers) = std::env::var("PIPELINE_REDPANDA_BROKERS") {
        config.queue.redpanda.brokers = brokers.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(username) = std::env::var("PIPELINE_REDPANDA_SASL_USERNAME") {
        config.queue.redpanda.sasl_username = Some(username);
    }
    if let Ok(password) = std::env::var("PIPELINE_REDPANDA_SASL_PASSWORD") {
        config.queue.redpanda.sasl_password = Some(password);
    }
    if let Ok(url) = std::env::var("PIPELINE_CLICKHOUSE_URL") {
        config.store.clickhouse.url = url;
    }
    if let Ok(username) = std::env::var("PIPELINE_CLICKHOUSE_USERNAME") {
        config.store.clickhouse.username = Some(username);
    }
    if let Ok(password) = std::env::var("PIPELINE_CLICKHOUSE_PASSWORD") {
        config.store.clickhouse.password = Some(password);
    }

    if config.queue.capacity == 0 {
        return Err(Error::config("queue.capacity must be greater than zero").into());
    }
    if config.worker.worker_count == 0 {
        return Err(Error::config("worker.worker_count must be greater than zero").into());
    }

    Ok(config)
}

/// Check Redpanda on startup.
async fn check_redpanda(config: &QueueConfig) {
    if reading_queue::health::check_connection(&config.redpanda).await {
        health().queue.set_healthy();
        info!("Redpanda connection: healthy");
    } else {
        health().queue.set_unhealthy("Connection failed");
        error!("Redpanda connection: unhealthy");
    }
}

/// Check ClickHouse on startup.
async fn check_clickhouse(client: &ClickHouseClient) {
    if timeseries_store::health::check_connection(client).await {
        health().store.set_healthy();
        info!("ClickHouse connection: healthy");
    } else {
        health().store.set_unhealthy("Connection failed");
        error!("ClickHouse connection: unhealthy");
    }
}

/// Feeds readings from stdin, one JSON object per line.
///
/// Invalid lines and readings rejected by a full queue are logged and skipped.
async fn run_stdin_producer(queue: Arc<dyn ReadingQueue>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0u64;
    let mut rejected = 0u64;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read stdin");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_reading(line) {
            Ok(reading) => match queue.enqueue(reading).await {
                Ok(()) => accepted += 1,
                Err(e) => {
                    rejected += 1;
                    warn!(code = e.code(), error = %e, "Reading rejected");
                }
            },
            Err(e) => {
                rejected += 1;
                warn!(code = e.code(), error = %e, "Invalid reading line");
            }
        }
    }

    info!(accepted = accepted, rejected = rejected, "Stdin producer finished");
}

fn parse_reading(line: &str) -> pipeline_core::Result<Reading> {
    if line.len() > pipeline_core::limits::MAX_READING_BYTES {
        return Err(Error::validation(format!(
            "reading exceeds {} bytes",
            pipeline_core::limits::MAX_READING_BYTES
        )));
    }
    let reading: Reading = serde_json::from_str(line)?;
    validate_reading(&reading)?;
    Ok(reading)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
