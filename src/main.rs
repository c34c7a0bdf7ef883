//! Market Relay Binary
//!
//! Starts the ingestion and fan-out pipeline.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `WS_URL`: Upstream WebSocket URL
//! - `WS_API_KEY`: Upstream API key
//! - `DATABASE_URL`: Postgres connection string
//! - `REDIS_ADDR`: Redis `host:port`
//!
//! ## Optional
//! - `REDIS_PASSWORD`, `REDIS_DB`, `REDIS_TTL` (default: 24h)
//! - `WS_SERVER_ADDR`: Downstream listen address (default: :8080)
//! - `BATCH_SIZE` (default: 100), `WORKER_COUNT` (default: 10)
//! - `FLUSH_INTERVAL` (default: 2s)
//! - `SUBSCRIPTION_SYMBOLS`: CSV symbol list (default: USDSGD)
//! - `LOG_LEVEL`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use market_relay::application::ports::{SnapshotSource, TenantDirectory};
use market_relay::infrastructure::ops;
use market_relay::{
    FanoutServer, IngestClient, IngestConfig, PgStore, QUEUE_CAPACITY, ReconnectConfig,
    RedisCache, ServiceConfig, WorkerPool, WorkerPoolConfig, bounded, init_metrics,
    init_telemetry,
};

/// Graceful shutdown timeout per component.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    init_telemetry();

    let _metrics_handle = init_metrics();

    tracing::info!("Starting market-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Fatal-path startup: both sinks must be reachable before any task runs.
    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    let cache = Arc::new(RedisCache::connect(&config.redis).await?);

    // Listeners are bound up front so a bind failure is fatal.
    let fanout_listener = TcpListener::bind(&config.ws_server_addr).await?;
    let ops_listener = TcpListener::bind(ops::OPS_ADDR).await?;

    let (queue_tx, queue_rx) = bounded(QUEUE_CAPACITY);

    let worker_handles = WorkerPool::spawn(
        &WorkerPoolConfig {
            batch_size: config.batch_size,
            worker_count: config.worker_count,
            flush_interval: config.flush_interval,
        },
        queue_rx,
        Arc::clone(&store),
        Arc::clone(&cache),
        shutdown_token.clone(),
    );

    let ingest = IngestClient::new(
        IngestConfig {
            url: config.ws_url.clone(),
            api_key: config.ws_api_key.clone(),
            symbols: config.subscription_symbols.clone(),
            reconnect: ReconnectConfig::default(),
        },
        queue_tx,
        shutdown_token.clone(),
    );
    let ingest_handle = tokio::spawn(ingest.run());

    let fanout = FanoutServer::new(
        Arc::clone(&store) as Arc<dyn TenantDirectory>,
        Arc::clone(&cache) as Arc<dyn SnapshotSource>,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = fanout.run(fanout_listener).await {
            tracing::error!(error = %e, "fan-out server error");
        }
    });

    let ops_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = ops::serve(ops_listener, ops_cancel).await {
            tracing::error!(error = %e, "operational server error");
        }
    });

    tracing::info!("market-relay ready");

    await_shutdown(shutdown_token).await;

    // Workers drain their current batch with one flush before exiting.
    for handle in worker_handles {
        let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await;
    }
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, ingest_handle).await;

    tracing::info!("market-relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        ws_server_addr = %config.ws_server_addr,
        batch_size = config.batch_size,
        worker_count = config.worker_count,
        flush_interval_ms = config.flush_interval.as_millis(),
        redis_ttl_secs = config.redis.ttl.as_secs(),
        symbols = ?config.subscription_symbols,
        "Configuration loaded"
    );
}

/// Wait for a shutdown signal (SIGTERM or SIGINT), then cancel every task.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
