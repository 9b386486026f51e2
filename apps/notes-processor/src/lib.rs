//! Notes Processor Service
//!
//! A background worker that consumes note records from a Redis stream as
//! part of a consumer group, with delayed retries, stuck-message recovery,
//! a dead letter queue, and idempotent processing.
//!
//! ## Architecture
//!
//! ```text
//! Redis Stream (notes_stream)
//!   ↓ (Consumer Group: notes_processors)
//! StreamWorker<NoteLogProcessor>
//!   ↓ on failure: delay queue → back onto notes_stream
//!   ↓ budget exhausted: notes_stream_dlq
//! processed_notes set (idempotency)
//! ```
//!
//! ## Features
//!
//! - Consumer group support for horizontal scaling
//! - Automatic retry with exponential backoff and jitter
//! - Dead letter queue for records that exhaust their retries
//! - Graceful shutdown handling
//! - Health/metrics endpoint and a liveness file for supervisors
//!
//! ## Configuration
//!
//! Environment variables, all optional:
//! - `REDIS_HOST`: broker URL (default: `redis://redis:6379`)
//! - `MAX_RETRIES`, `IDLE_TIME_MS`, `BASE_DELAY_SEC`, `MAX_DELAY_SECONDS`:
//!   retry and recovery tuning
//! - `HEALTH_PORT`: HTTP port for probes and metrics (default: 8080)
//! - `HEALTH_FILE`: liveness file path (default: `/tmp/healthy`)
//! - `CONSUMER_NAME`: consumer identity override (default: `worker-{HOSTNAME}`)
//! - `APP_ENV`: `production` switches logs to JSON
//! - `RUST_LOG`: log filter override (e.g. `stream_worker=trace`)

mod processor;

use axum::Router;
use eyre::{Result, WrapErr, eyre};
use processor::NoteLogProcessor;
use std::str::FromStr;
use stream_worker::{
    HealthState, LivenessFile, StreamWorker, WorkerConfig, connect_with_unbounded_retry,
    health_router, metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Default broker location inside the compose/k8s network.
const DEFAULT_REDIS_URL: &str = "redis://redis:6379";

/// Initialize tracing: JSON output for log aggregation when
/// `APP_ENV=production`, pretty-printed with module targets otherwise.
///
/// The default filter keeps the redis client quieter than the worker;
/// `RUST_LOG` overrides it. A second call keeps the existing subscriber,
/// so embedding `run()` in tests is safe.
fn init_tracing(production: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if production {
            EnvFilter::new("info,redis=warn")
        } else {
            EnvFilter::new("debug,redis=info")
        }
    });

    if production {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .ok();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .try_init()
            .ok();
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a numeric environment variable, falling back to the default when
/// unset. A set-but-unparseable value is an error, not a silent fallback.
fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .wrap_err_with(|| format!("Failed to parse environment variable '{key}'")),
        Err(_) => Ok(default),
    }
}

/// Load the worker configuration from the environment.
///
/// The defaults match the deployed stream layout (`notes_stream` +
/// `notes_processors`).
fn worker_config_from_env() -> Result<WorkerConfig> {
    Ok(WorkerConfig::new()
        .with_max_retries(env_parse("MAX_RETRIES", 3)?)
        .with_idle_time_ms(env_parse("IDLE_TIME_MS", 60_000)?)
        .with_backoff(
            env_parse("BASE_DELAY_SEC", 2)?,
            env_parse("MAX_DELAY_SECONDS", 60)?,
        ))
}

/// Start the health and metrics HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the notes processor worker
///
/// This is the main entry point for the worker. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Connects to Redis, retrying until the broker is reachable
/// 3. Starts the health server in the background
/// 4. Runs the worker loop with graceful shutdown handling
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the health port can't
/// be bound, or the worker loses its broker for good.
pub async fn run() -> Result<()> {
    let production = env_or_default("APP_ENV", "development").eq_ignore_ascii_case("production");
    init_tracing(production);

    // Initialize Prometheus metrics
    metrics::init_metrics();

    info!(production = production, "Starting notes processor service");

    let health_port: u16 = env_parse("HEALTH_PORT", 8080)?;

    let worker_config = worker_config_from_env().wrap_err("Failed to load worker configuration")?;
    info!(
        stream = %worker_config.stream_key,
        group = %worker_config.group_name,
        consumer = %worker_config.consumer_name,
        max_retries = worker_config.max_retries,
        idle_time_ms = worker_config.idle_time_ms,
        "Worker configuration loaded"
    );

    let redis_url = env_or_default("REDIS_HOST", DEFAULT_REDIS_URL);
    let liveness = LivenessFile::new(env_or_default("HEALTH_FILE", LivenessFile::DEFAULT_PATH));

    // Blocks until the broker answers a PING, touching the liveness file
    // so the supervisor keeps us alive while Redis comes up
    info!("Connecting to Redis...");
    let redis = connect_with_unbounded_retry(&redis_url, &liveness).await;
    info!("Connected to Redis successfully");

    // Set up a shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    // Start health server in background
    let health_state = HealthState::new(redis.clone(), &worker_config);
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    // Run the worker
    info!("Starting note record processor...");
    let worker = StreamWorker::new(redis, NoteLogProcessor, worker_config, liveness);
    worker
        .run(shutdown_rx)
        .await
        .map_err(|e| eyre!("{}", e))?;

    info!("Notes processor service stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_prefers_set_value() {
        // Var names are unique per test; cargo runs tests in parallel
        unsafe { std::env::set_var("NP_TEST_SET_NUM", "7") };
        let value: u64 = env_parse("NP_TEST_SET_NUM", 42).unwrap();
        assert_eq!(value, 7);
        unsafe { std::env::remove_var("NP_TEST_SET_NUM") };
    }

    #[test]
    fn test_env_parse_defaults_when_unset() {
        let value: u32 = env_parse("NP_TEST_UNSET_NUM", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        unsafe { std::env::set_var("NP_TEST_BAD_NUM", "not-a-number") };
        let result: Result<u32> = env_parse("NP_TEST_BAD_NUM", 42);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("NP_TEST_BAD_NUM"));
        unsafe { std::env::remove_var("NP_TEST_BAD_NUM") };
    }

    #[test]
    fn test_worker_config_defaults_without_env() {
        let config = worker_config_from_env().unwrap();
        assert_eq!(config.stream_key, "notes_stream");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.idle_time_ms, 60_000);
        assert_eq!(config.base_delay_secs, 2);
        assert_eq!(config.max_delay_secs, 60);
    }
}
