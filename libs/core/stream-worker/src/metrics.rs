//! Prometheus metrics for worker observability.
//!
//! ## Available Metrics
//!
//! - `messages_processed_total{event_type}` - Counter of successfully processed records
//! - `retries_total` - Counter of scheduled retries
//! - `dlq_total` - Counter of records dead-lettered
//! - `processing_duration_ms{event_type}` - Histogram of business-hook duration
//! - `consumer_lag{group}` - Gauge of the group's pending count
//! - `redis_connected` - Gauge, 1 when the broker is reachable

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency
pub mod names {
    pub const MESSAGES_PROCESSED: &str = "messages_processed_total";
    pub const RETRIES: &str = "retries_total";
    pub const DLQ: &str = "dlq_total";
    pub const PROCESSING_DURATION: &str = "processing_duration_ms";
    pub const CONSUMER_LAG: &str = "consumer_lag";
    pub const REDIS_CONNECTED: &str = "redis_connected";
}

/// Bucket boundaries for the processing-duration histogram, in milliseconds.
pub const DURATION_BUCKETS_MS: [f64; 10] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at application startup.
/// Returns the PrometheusHandle for rendering metrics.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full(names::PROCESSING_DURATION.to_string()),
                    &DURATION_BUCKETS_MS,
                )
                .expect("duration buckets are non-empty")
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Get the global Prometheus handle.
///
/// Returns None if metrics haven't been initialized.
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Record a successfully processed message.
pub fn record_message_processed(event_type: &str) {
    counter!(
        names::MESSAGES_PROCESSED,
        "event_type" => event_type.to_string()
    )
    .increment(1);
}

/// Record the business-hook duration in milliseconds.
pub fn record_processing_duration(event_type: &str, duration_ms: f64) {
    histogram!(
        names::PROCESSING_DURATION,
        "event_type" => event_type.to_string()
    )
    .record(duration_ms);
}

/// Record a scheduled retry.
pub fn record_retry() {
    counter!(names::RETRIES).increment(1);
}

/// Record a record sent to the DLQ.
pub fn record_dlq() {
    counter!(names::DLQ).increment(1);
}

/// Update the consumer-group lag gauge.
pub fn set_consumer_lag(group: &str, lag: f64) {
    gauge!(
        names::CONSUMER_LAG,
        "group" => group.to_string()
    )
    .set(lag);
}

/// Update the broker connectivity gauge.
pub fn set_redis_connected(connected: bool) {
    gauge!(names::REDIS_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_match_dashboard_queries() {
        assert_eq!(names::MESSAGES_PROCESSED, "messages_processed_total");
        assert_eq!(names::RETRIES, "retries_total");
        assert_eq!(names::DLQ, "dlq_total");
        assert_eq!(names::PROCESSING_DURATION, "processing_duration_ms");
        assert_eq!(names::CONSUMER_LAG, "consumer_lag");
        assert_eq!(names::REDIS_CONNECTED, "redis_connected");
    }

    #[test]
    fn test_duration_buckets_are_sorted() {
        let mut sorted = DURATION_BUCKETS_MS;
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, DURATION_BUCKETS_MS);
    }

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        // Safe to call before init_metrics; the facade drops the samples.
        record_message_processed("notes.created");
        record_processing_duration("notes.created", 12.5);
        record_retry();
        record_dlq();
        set_consumer_lag("notes_processors", 3.0);
        set_redis_connected(true);
    }
}
