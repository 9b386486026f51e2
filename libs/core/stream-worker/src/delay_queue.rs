//! Time-delayed redelivery queue built on a sorted set + hash pair.
//!
//! A retry member lives in two keys: the schedule zset maps
//! `{stream_id}:{retry_count}` to its due time (unix seconds), and the
//! payload hash maps the same member id to the serialized retry fields.
//! Enqueue writes the hash entry before the zset entry so any observer of
//! a scheduled member can find its payload; drain pops due members with a
//! single server-side script so two workers never claim the same member.

use crate::consumer::FieldMap;
use crate::error::StreamError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Atomic select-and-remove of due members. Runs as one script so that
/// concurrent drains partition the due set instead of double-claiming.
const POP_DUE_SCRIPT: &str = r"
local zset_key = KEYS[1]
local now_score = ARGV[1]
local limit = tonumber(ARGV[2])
local members = redis.call('ZRANGEBYSCORE', zset_key, '-inf', now_score, 'LIMIT', 0, limit)
if #members > 0 then
  redis.call('ZREM', zset_key, unpack(members))
end
return members
";

/// Delay queue holding records until their retry time arrives.
#[derive(Clone)]
pub struct DelayQueue {
    redis: Arc<ConnectionManager>,
    pop_script: Arc<Script>,
    schedule_key: String,
    payload_key: String,
    stream_key: String,
}

impl DelayQueue {
    pub fn new(
        redis: ConnectionManager,
        schedule_key: impl Into<String>,
        payload_key: impl Into<String>,
        stream_key: impl Into<String>,
    ) -> Self {
        Self {
            redis: Arc::new(redis),
            pop_script: Arc::new(Script::new(POP_DUE_SCRIPT)),
            schedule_key: schedule_key.into(),
            payload_key: payload_key.into(),
            stream_key: stream_key.into(),
        }
    }

    /// Schedule a field map for redelivery at `due_ts` (unix seconds).
    ///
    /// Hash first, zset second. Inverting the order opens a window where a
    /// drain sees the member but not its payload.
    pub async fn enqueue(
        &self,
        fields: &FieldMap,
        due_ts: f64,
        member: &str,
    ) -> Result<(), StreamError> {
        let blob = serde_json::to_string(fields)?;
        let mut conn = (*self.redis).clone();

        let _: () = conn.hset(&self.payload_key, member, &blob).await?;
        let _: () = conn.zadd(&self.schedule_key, member, due_ts).await?;

        Ok(())
    }

    /// Move up to `max_items` due members back onto the main stream.
    ///
    /// Per-member problems (orphaned hash entry, unparseable payload, a
    /// failing XADD) are logged and skipped so one poisoned member cannot
    /// stall the queue; the hash entry is deleted either way. Returns the
    /// number of records moved.
    pub async fn drain(&self, max_items: usize) -> Result<usize, StreamError> {
        let mut conn = (*self.redis).clone();

        let members: Vec<String> = self
            .pop_script
            .key(&self.schedule_key)
            .arg(unix_now_secs())
            .arg(max_items)
            .invoke_async(&mut conn)
            .await?;

        if members.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&self.payload_key)
            .arg(&members)
            .query_async(&mut conn)
            .await?;

        let mut moved = 0;
        for (member, payload) in members.iter().zip(payloads) {
            let Some(blob) = payload else {
                warn!(member = %member, "Retry member has no payload, dropping orphan");
                let _: () = conn.hdel(&self.payload_key, member).await?;
                continue;
            };

            match self.reappend(&mut conn, &blob).await {
                Ok(()) => moved += 1,
                Err(e) => {
                    warn!(member = %member, error = %e, "Failed to move due retry back to stream")
                }
            }
            let _: () = conn.hdel(&self.payload_key, member).await?;
        }

        if moved > 0 {
            info!(count = moved, "Moved due retries back to stream");
        }
        Ok(moved)
    }

    async fn reappend(
        &self,
        conn: &mut ConnectionManager,
        blob: &str,
    ) -> Result<(), StreamError> {
        let decoded: serde_json::Map<String, Value> = serde_json::from_str(blob)?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_key).arg("*");

        let mut field_count = 0;
        for (key, value) in &decoded {
            let text = match value {
                Value::String(s) if !s.is_empty() => s.clone(),
                Value::String(_) | Value::Null => continue,
                other => other.to_string(),
            };
            cmd.arg(key).arg(text);
            field_count += 1;
        }

        if field_count == 0 {
            return Err(StreamError::Processing(
                "retry payload had no usable fields".to_string(),
            ));
        }

        let _: String = cmd.query_async(conn).await?;
        Ok(())
    }
}

/// Current wall-clock time as unix seconds.
pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_sane() {
        let now = unix_now_secs();
        // After 2020, before 2100
        assert!(now > 1_577_836_800.0);
        assert!(now < 4_102_444_800.0);
    }
}
