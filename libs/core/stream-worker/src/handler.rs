//! Message handling: normalize, dedupe, invoke the business hook, route
//! the outcome to ack, delayed retry, or the DLQ.

use crate::backoff::BackoffPolicy;
use crate::config::WorkerConfig;
use crate::consumer::{FieldMap, StreamConsumer};
use crate::delay_queue::{DelayQueue, unix_now_secs};
use crate::error::StreamError;
use crate::idempotency::ProcessedSet;
use crate::metrics;
use crate::record::{NoteRecord, normalize};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// The business hook applied to each normalized record.
///
/// Return `Ok(())` for success. Any error routes the record through the
/// retry schedule and, once the budget is spent, to the DLQ.
///
/// # Example
///
/// ```rust,ignore
/// struct IndexProcessor {
///     search: Arc<SearchClient>,
/// }
///
/// #[async_trait]
/// impl RecordProcessor for IndexProcessor {
///     async fn process(&self, record: &NoteRecord) -> Result<(), StreamError> {
///         self.search.index(record.note_id.as_deref(), &record.payload).await?;
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "IndexProcessor"
///     }
/// }
/// ```
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    /// Process a single normalized record.
    async fn process(&self, record: &NoteRecord) -> Result<(), StreamError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;
}

/// Orchestrates the lifecycle of one delivered record.
///
/// Both fresh deliveries and records reclaimed from crashed workers flow
/// through [`MessageHandler::handle`] with identical semantics. Every
/// record that enters is acknowledged exactly once: after success, after
/// its retry is scheduled, or after it lands in the DLQ. A broker failure
/// before the ack leaves the record pending for the recovery sweeper.
pub struct MessageHandler<P> {
    consumer: StreamConsumer,
    delay_queue: DelayQueue,
    processed: ProcessedSet,
    backoff: BackoffPolicy,
    processor: Arc<P>,
    max_retries: u32,
}

impl<P: RecordProcessor> MessageHandler<P> {
    pub fn new(
        consumer: StreamConsumer,
        delay_queue: DelayQueue,
        processed: ProcessedSet,
        processor: Arc<P>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            consumer,
            delay_queue,
            processed,
            backoff: BackoffPolicy::new(config.base_delay_secs, config.max_delay_secs),
            processor,
            max_retries: config.max_retries,
        }
    }

    /// Handle one delivered record.
    pub async fn handle(&self, message_id: &str, raw_fields: &FieldMap) -> Result<(), StreamError> {
        let record = normalize(raw_fields);

        if self.processed.seen(record.note_id.as_deref()).await? {
            info!(
                message_id = %message_id,
                note_id = ?record.note_id,
                trace_id = ?record.trace_id,
                "Duplicate message skipped"
            );
            self.consumer.ack(message_id).await?;
            return Ok(());
        }

        let start = Instant::now();
        match self.processor.process(&record).await {
            Ok(()) => {
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                metrics::record_message_processed(&record.event);
                metrics::record_processing_duration(&record.event, duration_ms);

                if let Some(note_id) = record.note_id.as_deref() {
                    self.processed.mark(note_id).await;
                }

                self.consumer.ack(message_id).await?;
                info!(
                    message_id = %message_id,
                    note_id = ?record.note_id,
                    trace_id = ?record.trace_id,
                    retry_count = record.retry_count,
                    duration_ms = duration_ms,
                    "Message processed"
                );
                Ok(())
            }
            Err(e) => {
                self.route_failure(message_id, raw_fields, &record, e).await
            }
        }
    }

    /// Schedule a retry or dead-letter the record, then acknowledge it.
    async fn route_failure(
        &self,
        message_id: &str,
        raw_fields: &FieldMap,
        record: &NoteRecord,
        cause: StreamError,
    ) -> Result<(), StreamError> {
        let attempt = record.retry_count + 1;

        if attempt <= self.max_retries {
            let delay_secs = self.backoff.delay_secs(attempt);
            let due_ts = unix_now_secs() + delay_secs as f64;
            let member = format!("{message_id}:{attempt}");

            metrics::record_retry();
            warn!(
                message_id = %message_id,
                note_id = ?record.note_id,
                trace_id = ?record.trace_id,
                retry_count = attempt,
                delay_seconds = delay_secs,
                error = %cause,
                "Retry scheduled"
            );

            let retry_fields = retry_fields(record, attempt);
            self.delay_queue.enqueue(&retry_fields, due_ts, &member).await?;
        } else {
            metrics::record_dlq();
            error!(
                message_id = %message_id,
                note_id = ?record.note_id,
                trace_id = ?record.trace_id,
                retry_count = record.retry_count,
                error = %cause,
                "Retry budget exhausted, sending to DLQ"
            );

            self.consumer.append_dlq(message_id, raw_fields).await?;
        }

        self.consumer.ack(message_id).await?;
        Ok(())
    }
}

/// Build the field map a retried record re-enters the stream with.
///
/// Event, ids, and the verbatim payload survive the round trip; the empty
/// placeholders for missing ids are dropped at drain time.
fn retry_fields(record: &NoteRecord, attempt: u32) -> FieldMap {
    let mut fields = FieldMap::with_capacity(5);
    fields.insert("event".to_string(), record.event.clone());
    fields.insert(
        "note_id".to_string(),
        record.note_id.clone().unwrap_or_default(),
    );
    fields.insert(
        "trace_id".to_string(),
        record.trace_id.clone().unwrap_or_default(),
    );
    fields.insert("retry_count".to_string(), attempt.to_string());
    fields.insert("payload".to_string(), record.payload.clone());
    fields
}
