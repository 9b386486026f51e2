//! Processed-id set: converts at-least-once delivery into effectively-once work.

use crate::error::StreamError;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::warn;

/// Membership index of note ids that have been successfully processed.
///
/// Records without an id are never members: they keep plain at-least-once
/// semantics rather than getting a synthesized key, which would break
/// deduplication across retries.
#[derive(Clone)]
pub struct ProcessedSet {
    redis: Arc<ConnectionManager>,
    set_key: String,
}

impl ProcessedSet {
    pub fn new(redis: ConnectionManager, set_key: impl Into<String>) -> Self {
        Self {
            redis: Arc::new(redis),
            set_key: set_key.into(),
        }
    }

    /// Check whether a note id has already been processed.
    pub async fn seen(&self, note_id: Option<&str>) -> Result<bool, StreamError> {
        let Some(id) = note_id else {
            return Ok(false);
        };

        let mut conn = (*self.redis).clone();
        let member: bool = conn.sismember(&self.set_key, id).await?;
        Ok(member)
    }

    /// Record a note id as processed.
    ///
    /// Best-effort: a transient failure is logged and swallowed, and the
    /// record is still acknowledged.
    pub async fn mark(&self, note_id: &str) {
        let mut conn = (*self.redis).clone();
        if let Err(e) = conn.sadd::<_, _, ()>(&self.set_key, note_id).await {
            warn!(note_id = %note_id, error = %e, "Failed to mark note as processed");
        }
    }
}
