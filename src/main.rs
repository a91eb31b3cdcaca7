//! Bull Queue Exporter
//!
//! Serves queue-depth gauges for every queue under the configured key prefix.
//! The HTTP listener starts immediately; the store connects in the background
//! and `/health` reports 503 until it is ready.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | HOST | 0.0.0.0 | Bind host |
//! | PORT | 3000 | Bind port |
//! | PROM_PREFIX | bull | Metric name prefix |
//! | BULL_PREFIX | bull | Queue key prefix |
//! | BULL_QUEUES | - | Explicit comma-separated queue list |
//! | REDIS_HOST | 127.0.0.1 | Store host |
//! | REDIS_PORT | 6379 | Store port |
//! | REDIS_DB | 0:default | `index:label` list |
//! | REDIS_USERNAME | - | Store username |
//! | REDIS_PASSWORD | - | Store password |
//! | REDIS_TLS | false | TLS towards the store |
//! | REDIS_CA | - | Base64 PEM CA bundle |
//! | REDIS_SENTINEL_ENABLED | false | Resolve the master through Sentinel |
//! | REDIS_SENTINEL_HOSTS | - | Sentinel `host:port` list |
//! | REDIS_NAMESPACE | - | Sentinel master name |
//! | REDIS_SENTINEL_PASSWORD | - | Sentinel password |
//! | REDIS_SENTINEL_TLS | false | TLS towards Sentinels |
//! | REDIS_SENTINEL_CA | - | Base64 PEM CA for Sentinels |
//! | COMPLETED_WINDOW_SECONDS | - | Windowed completed-count widths |
//! | REDIS_COMMAND_TIMEOUT_MS | 5000 | Connect and command timeout |
//! | REDIS_RECONNECT_INTERVAL_MS | 1000 | Reconnect period |
//! | LOG_FORMAT | text | `text` or `json` |
//! | RUST_LOG | info | Log filter |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use bull_exporter::observability::init_tracing;
use bull_exporter::server::{build_router, shutdown_signal};
use bull_exporter::{Collector, ExporterConfig, RedisQueueStore};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match ExporterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // No subscriber yet
            eprintln!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    init_tracing(config.log_format)?;

    let store = Arc::new(RedisQueueStore::new(config.redis.clone()));
    let supervisor = store.spawn_supervisor(config.databases.clone());

    let collector = Arc::new(Collector::new(Arc::clone(&store), &config));
    let app = build_router(collector);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            store.close();
            return Err(e.into());
        }
    };

    info!(
        addr = %addr,
        databases = config.databases.len(),
        key_prefix = %config.key_prefix,
        "Bull exporter listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close();
    supervisor.abort();
    info!("Shutdown complete");
    Ok(())
}
