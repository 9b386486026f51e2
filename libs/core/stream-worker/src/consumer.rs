//! Redis stream consumer: group management, reads, acks, claims, DLQ writes.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use chrono::{SecondsFormat, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimReply, StreamPendingReply, StreamReadOptions, StreamReadReply,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw string->string field map, the broker-boundary form of a record.
pub type FieldMap = HashMap<String, String>;

/// Redis stream consumer for one (stream, group, consumer) triple.
///
/// Wraps every stream operation the worker needs: consumer-group creation,
/// blocking group reads, acknowledgment, idle-claim of stuck records, DLQ
/// appends, and the group's pending count for lag reporting.
#[derive(Clone)]
pub struct StreamConsumer {
    redis: Arc<ConnectionManager>,
    config: WorkerConfig,
}

impl StreamConsumer {
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self {
            redis: Arc::new(redis),
            config,
        }
    }

    /// Get a reference to the Redis connection manager.
    pub fn redis(&self) -> &ConnectionManager {
        &self.redis
    }

    /// Ensure the consumer group exists.
    ///
    /// Creates the stream as well if it doesn't exist (MKSTREAM). A
    /// BUSYGROUP response means another worker won the race; that is fine.
    pub async fn ensure_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = (*self.redis).clone();

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_key)
            .arg(&self.config.group_name)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => {
                info!("Created consumer group '{}'", self.config.group_name);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group '{}' already exists", self.config.group_name);
                Ok(())
            }
            Err(e) => Err(StreamError::ConsumerGroup(e.to_string())),
        }
    }

    /// Blocking read of at most one new record for this consumer.
    ///
    /// Uses the `>` cursor so only never-delivered entries are returned.
    /// A BLOCK timeout with no traffic yields `None`.
    pub async fn read_new(&self) -> Result<Option<(String, FieldMap)>, StreamError> {
        let mut conn = (*self.redis).clone();

        let opts = StreamReadOptions::default()
            .group(&self.config.group_name, &self.config.consumer_name)
            .count(1)
            .block(self.config.block_ms as usize);

        let result: Result<StreamReadReply, _> = conn
            .xread_options(&[&self.config.stream_key], &[">"], &opts)
            .await;

        match result {
            Ok(reply) => {
                for stream_key in reply.keys {
                    if let Some(message) = stream_key.ids.into_iter().next() {
                        return Ok(Some((message.id, string_map(&message.map))));
                    }
                }
                Ok(None)
            }
            Err(e) => {
                let err_str = e.to_string().to_lowercase();
                // BLOCK timeout surfaces as a nil/timeout parse, not traffic
                if err_str.contains("timed out")
                    || err_str.contains("timeout")
                    || err_str.contains("nil")
                {
                    Ok(None)
                } else {
                    Err(StreamError::Redis(e))
                }
            }
        }
    }

    /// Acknowledge a record.
    pub async fn ack(&self, message_id: &str) -> Result<(), StreamError> {
        let mut conn = (*self.redis).clone();

        let _: () = conn
            .xack(
                &self.config.stream_key,
                &self.config.group_name,
                &[message_id],
            )
            .await?;

        debug!(message_id = %message_id, "Acknowledged message");
        Ok(())
    }

    /// Append a field map to the main stream. Returns the broker-assigned id.
    pub async fn append(&self, fields: &FieldMap) -> Result<String, StreamError> {
        let mut conn = (*self.redis).clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.config.stream_key).arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }

        let message_id: String = cmd.query_async(&mut conn).await?;
        debug!(message_id = %message_id, "Appended record to stream");
        Ok(message_id)
    }

    /// Write a dead-letter entry for a record that exhausted its retries.
    ///
    /// The entry carries the original stream id, the raw failing field map
    /// as JSON, and an RFC 3339 UTC timestamp. The DLQ trims itself with
    /// MAXLEN ~.
    pub async fn append_dlq(
        &self,
        original_message_id: &str,
        raw_fields: &FieldMap,
    ) -> Result<String, StreamError> {
        let mut conn = (*self.redis).clone();

        let payload = serde_json::to_string(raw_fields)?;
        let failed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let dlq_id: String = redis::cmd("XADD")
            .arg(&self.config.dlq_key)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.dlq_max_length)
            .arg("*")
            .arg("original_message_id")
            .arg(original_message_id)
            .arg("payload")
            .arg(&payload)
            .arg("failed_at")
            .arg(&failed_at)
            .query_async(&mut conn)
            .await?;

        warn!(
            original_message_id = %original_message_id,
            dlq_id = %dlq_id,
            "Moved record to DLQ"
        );
        Ok(dlq_id)
    }

    /// Claim records pending longer than the configured idle threshold.
    ///
    /// XAUTOCLAIM transfers ownership to this consumer and bumps the
    /// broker's delivery counter; the caller feeds the claimed records
    /// through the normal handler.
    pub async fn claim_stuck(&self) -> Result<Vec<(String, FieldMap)>, StreamError> {
        let mut conn = (*self.redis).clone();

        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_key)
            .arg(&self.config.group_name)
            .arg(&self.config.consumer_name)
            .arg(self.config.idle_time_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(100)
            .query_async(&mut conn)
            .await?;

        let claimed: Vec<(String, FieldMap)> = reply
            .claimed
            .into_iter()
            .map(|message| (message.id, string_map(&message.map)))
            .collect();

        if !claimed.is_empty() {
            info!(
                count = claimed.len(),
                consumer = %self.config.consumer_name,
                "Claimed stuck messages"
            );
        }

        Ok(claimed)
    }

    /// Total pending (delivered but unacknowledged) count for the group.
    pub async fn pending_lag(&self) -> Result<usize, StreamError> {
        let mut conn = (*self.redis).clone();

        let reply: StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_key)
            .arg(&self.config.group_name)
            .query_async(&mut conn)
            .await?;

        Ok(reply.count())
    }
}

/// Convert a stream entry's value map into the string->string field map.
fn string_map(map: &HashMap<String, redis::Value>) -> FieldMap {
    let mut fields = FieldMap::with_capacity(map.len());
    for (key, value) in map {
        let text = match value {
            redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
            redis::Value::SimpleString(s) => s.clone(),
            redis::Value::Int(i) => i.to_string(),
            _ => continue,
        };
        fields.insert(key.clone(), text);
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_map_conversion() {
        let mut raw = HashMap::new();
        raw.insert(
            "note_id".to_string(),
            redis::Value::BulkString(b"n1".to_vec()),
        );
        raw.insert(
            "event".to_string(),
            redis::Value::SimpleString("notes.created".to_string()),
        );
        raw.insert("retry_count".to_string(), redis::Value::Int(2));
        raw.insert("junk".to_string(), redis::Value::Nil);

        let fields = string_map(&raw);

        assert_eq!(fields.get("note_id").map(String::as_str), Some("n1"));
        assert_eq!(fields.get("event").map(String::as_str), Some("notes.created"));
        assert_eq!(fields.get("retry_count").map(String::as_str), Some("2"));
        assert!(!fields.contains_key("junk"));
    }
}
