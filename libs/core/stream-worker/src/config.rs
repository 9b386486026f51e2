//! Worker configuration
//!
//! Stream keys and processing limits, with builder methods for overrides.

use uuid::Uuid;

/// Configuration for the stream worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Main stream the worker consumes from
    pub stream_key: String,

    /// Consumer group name
    pub group_name: String,

    /// Consumer name within the group, stable per host
    pub consumer_name: String,

    /// Dead letter stream for records that exhausted their retry budget
    pub dlq_key: String,

    /// Sorted set mapping retry member ids to due times
    pub retry_schedule_key: String,

    /// Hash mapping retry member ids to serialized retry fields
    pub retry_payload_key: String,

    /// Set of note ids that have been successfully processed
    pub processed_set_key: String,

    /// Retry budget: a record whose incremented retry count exceeds this goes to the DLQ
    pub max_retries: u32,

    /// Minimum idle time in milliseconds before a pending record is reclaimed
    pub idle_time_ms: u64,

    /// Base delay in seconds for the first retry
    pub base_delay_secs: u64,

    /// Cap on the exponential retry delay in seconds
    pub max_delay_secs: u64,

    /// Blocking read timeout in milliseconds
    pub block_ms: u64,

    /// Maximum due retries moved back to the stream per loop iteration
    pub drain_batch_size: usize,

    /// Approximate cap on DLQ stream length (MAXLEN ~)
    pub dlq_max_length: i64,
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self {
            stream_key: "notes_stream".to_string(),
            group_name: "notes_processors".to_string(),
            consumer_name: default_consumer_name(),
            dlq_key: "notes_stream_dlq".to_string(),
            retry_schedule_key: "notes_stream_retry_schedule".to_string(),
            retry_payload_key: "notes_stream_retry_payloads".to_string(),
            processed_set_key: "processed_notes".to_string(),
            max_retries: 3,
            idle_time_ms: 60_000,
            base_delay_secs: 2,
            max_delay_secs: 60,
            block_ms: 1000,
            drain_batch_size: 25,
            dlq_max_length: 10_000,
        }
    }

    /// Set the main stream key (DLQ and retry keys are derived from it)
    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.dlq_key = format!("{key}_dlq");
        self.retry_schedule_key = format!("{key}_retry_schedule");
        self.retry_payload_key = format!("{key}_retry_payloads");
        self.stream_key = key;
        self
    }

    /// Set the consumer group name
    pub fn with_group_name(mut self, group: impl Into<String>) -> Self {
        self.group_name = group.into();
        self
    }

    /// Set the consumer name
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    /// Set the processed set key
    pub fn with_processed_set_key(mut self, key: impl Into<String>) -> Self {
        self.processed_set_key = key.into();
        self
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the idle threshold for reclaiming stuck records
    pub fn with_idle_time_ms(mut self, idle_time_ms: u64) -> Self {
        self.idle_time_ms = idle_time_ms;
        self
    }

    /// Set the retry backoff envelope
    pub fn with_backoff(mut self, base_delay_secs: u64, max_delay_secs: u64) -> Self {
        self.base_delay_secs = base_delay_secs;
        self.max_delay_secs = max_delay_secs;
        self
    }

    /// Set the blocking read timeout
    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms;
        self
    }

    /// Set the per-iteration drain batch size
    pub fn with_drain_batch_size(mut self, size: usize) -> Self {
        self.drain_batch_size = size;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a consumer name that is stable across restarts of the same host.
///
/// CONSUMER_NAME wins when set; otherwise `worker-{HOSTNAME}` so that
/// auto-claim attributes ownership deterministically on k8s, with a random
/// name as the last resort.
fn default_consumer_name() -> String {
    if let Ok(name) = std::env::var("CONSUMER_NAME") {
        if !name.is_empty() {
            return name;
        }
    }
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.is_empty() => format!("worker-{host}"),
        _ => format!("worker-{}", Uuid::new_v4()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::new();

        assert_eq!(config.stream_key, "notes_stream");
        assert_eq!(config.group_name, "notes_processors");
        assert_eq!(config.dlq_key, "notes_stream_dlq");
        assert_eq!(config.retry_schedule_key, "notes_stream_retry_schedule");
        assert_eq!(config.retry_payload_key, "notes_stream_retry_payloads");
        assert_eq!(config.processed_set_key, "processed_notes");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.idle_time_ms, 60_000);
        assert_eq!(config.base_delay_secs, 2);
        assert_eq!(config.max_delay_secs, 60);
        assert_eq!(config.block_ms, 1000);
        assert_eq!(config.drain_batch_size, 25);
        assert!(!config.consumer_name.is_empty());
    }

    #[test]
    fn test_builder_pattern() {
        let config = WorkerConfig::new()
            .with_stream_key("orders_stream")
            .with_group_name("order_workers")
            .with_consumer_name("worker-1")
            .with_max_retries(5)
            .with_idle_time_ms(100)
            .with_backoff(0, 10)
            .with_block_ms(50)
            .with_drain_batch_size(10);

        assert_eq!(config.stream_key, "orders_stream");
        assert_eq!(config.dlq_key, "orders_stream_dlq");
        assert_eq!(config.retry_schedule_key, "orders_stream_retry_schedule");
        assert_eq!(config.retry_payload_key, "orders_stream_retry_payloads");
        assert_eq!(config.group_name, "order_workers");
        assert_eq!(config.consumer_name, "worker-1");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.idle_time_ms, 100);
        assert_eq!(config.base_delay_secs, 0);
        assert_eq!(config.block_ms, 50);
        assert_eq!(config.drain_batch_size, 10);
    }
}
