//! Health signals: the liveness file for the external supervisor and the
//! axum handlers for liveness, readiness, and Prometheus scrapes.

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use redis::aio::ConnectionManager;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::config::WorkerConfig;
use crate::consumer::StreamConsumer;
use crate::metrics;

/// Liveness timestamp file watched by an external supervisor.
///
/// Touched on every loop iteration and on every connect attempt, so a
/// hung worker stops refreshing it and gets restarted.
#[derive(Clone)]
pub struct LivenessFile {
    path: PathBuf,
}

impl LivenessFile {
    pub const DEFAULT_PATH: &'static str = "/tmp/healthy";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current unix timestamp. Failures are logged, never fatal:
    /// a missed heartbeat at worst triggers a supervisor restart.
    pub fn touch(&self) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(path = %self.path.display(), error = %e, "Failed to create liveness dir");
                return;
            }
        }
        let stamp = crate::delay_queue::unix_now_secs().to_string();
        if let Err(e) = std::fs::write(&self.path, stamp) {
            warn!(path = %self.path.display(), error = %e, "Failed to touch liveness file");
        }
    }
}

impl Default for LivenessFile {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

/// Shared state for the health endpoints.
#[derive(Clone)]
pub struct HealthState {
    redis: Arc<ConnectionManager>,
    consumer: StreamConsumer,
    consumer_name: String,
    group_name: String,
}

impl HealthState {
    pub fn new(redis: ConnectionManager, config: &WorkerConfig) -> Self {
        Self {
            redis: Arc::new(redis.clone()),
            consumer: StreamConsumer::new(redis, config.clone()),
            consumer_name: config.consumer_name.clone(),
            group_name: config.group_name.clone(),
        }
    }

    /// PING the broker and reflect the result in the connectivity gauge.
    pub async fn is_connected_to_broker(&self) -> bool {
        let mut conn = (*self.redis).clone();
        let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        let connected = matches!(result, Ok(ref pong) if pong == "PONG");
        metrics::set_redis_connected(connected);
        connected
    }

    /// Total group-pending count, mirrored into the lag gauge.
    /// Returns -1 when the broker can't answer.
    pub async fn pending_lag(&self) -> i64 {
        match self.consumer.pending_lag().await {
            Ok(lag) => {
                metrics::set_consumer_lag(&self.group_name, lag as f64);
                lag as i64
            }
            Err(_) => -1,
        }
    }
}

/// Liveness/health probe handler.
///
/// Reports broker connectivity and the group's pending lag; 503 when the
/// broker is unreachable.
pub async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let redis_ok = state.is_connected_to_broker().await;
    let lag = state.pending_lag().await;

    let code = if redis_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": if redis_ok { "healthy" } else { "unhealthy" },
            "consumer": state.consumer_name,
            "redis_connected": redis_ok,
            "consumer_lag": lag,
        })),
    )
}

/// Readiness probe handler.
///
/// Checks if Redis is connected and ready.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if state.is_connected_to_broker().await {
        Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "redis": "ok" }
            })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "redis": "unreachable" }
            })),
        ))
    }
}

/// Prometheus metrics endpoint handler.
///
/// Refreshes the lag gauge before rendering so scrapes see current state.
pub async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    state.pending_lag().await;

    match metrics::get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create the health router.
///
/// - `/health`, `/healthz` - broker connectivity + lag
/// - `/ready`, `/readyz` - readiness probe
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_touch_writes_timestamp() {
        let dir = std::env::temp_dir().join(format!("liveness-test-{}", std::process::id()));
        let file = LivenessFile::new(dir.join("healthy"));

        file.touch();

        let contents = std::fs::read_to_string(file.path()).unwrap();
        let stamp: f64 = contents.parse().unwrap();
        assert!(stamp > 0.0);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_liveness_touch_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("liveness-test2-{}", std::process::id()));
        let file = LivenessFile::new(dir.join("healthy"));

        file.touch();
        file.touch();

        assert!(file.path().exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_default_path() {
        let file = LivenessFile::default();
        assert_eq!(file.path(), Path::new("/tmp/healthy"));
    }
}
