//! The worker run loop: liveness, retry drain, blocking read, handling,
//! and stuck-message recovery, with cooperative shutdown.

use crate::config::WorkerConfig;
use crate::consumer::StreamConsumer;
use crate::delay_queue::DelayQueue;
use crate::error::StreamError;
use crate::handler::{MessageHandler, RecordProcessor};
use crate::health::LivenessFile;
use crate::idempotency::ProcessedSet;
use crate::metrics;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Consecutive connection-classified failures after which the loop gives
/// up and surfaces the error so the supervisor restarts the process.
const MAX_CONSECUTIVE_CONNECTION_ERRORS: u32 = 10;

/// Cap on the sleep between failed iterations.
const MAX_ERROR_BACKOFF_SECS: u64 = 30;

/// A stream worker bound to one consumer group.
///
/// Each iteration, in order: signal liveness, move due retries back onto
/// the stream, block-read one new record and handle it, then reclaim and
/// handle records stuck on dead consumers. Per-record failures never stop
/// the loop; only a persistently unreachable broker does.
pub struct StreamWorker<P> {
    consumer: StreamConsumer,
    delay_queue: DelayQueue,
    handler: MessageHandler<P>,
    liveness: LivenessFile,
    config: WorkerConfig,
    processor_name: &'static str,
}

impl<P: RecordProcessor> StreamWorker<P> {
    pub fn new(
        redis: ConnectionManager,
        processor: P,
        config: WorkerConfig,
        liveness: LivenessFile,
    ) -> Self {
        let processor = Arc::new(processor);
        let processor_name = processor.name();

        let consumer = StreamConsumer::new(redis.clone(), config.clone());
        let delay_queue = DelayQueue::new(
            redis.clone(),
            &config.retry_schedule_key,
            &config.retry_payload_key,
            &config.stream_key,
        );
        let processed = ProcessedSet::new(redis, &config.processed_set_key);
        let handler = MessageHandler::new(
            consumer.clone(),
            delay_queue.clone(),
            processed,
            processor,
            &config,
        );

        Self {
            consumer,
            delay_queue,
            handler,
            liveness,
            config,
            processor_name,
        }
    }

    /// Get a reference to the consumer, e.g. for seeding health state.
    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    /// Run the worker loop until shutdown is signalled or the broker is lost.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            consumer = %self.config.consumer_name,
            stream = %self.config.stream_key,
            group = %self.config.group_name,
            processor = %self.processor_name,
            "Starting stream worker"
        );

        self.consumer.ensure_consumer_group().await?;
        self.liveness.touch();

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            self.liveness.touch();

            match self.tick().await {
                Ok(()) => {
                    if consecutive_errors > 0 {
                        info!("Broker recovered after {} errors", consecutive_errors);
                    }
                    consecutive_errors = 0;
                    metrics::set_redis_connected(true);
                }
                Err(e) => {
                    consecutive_errors += 1;

                    if e.is_nogroup_error() {
                        warn!("Consumer group missing, recreating...");
                        if let Err(create_err) = self.consumer.ensure_consumer_group().await {
                            error!(error = %create_err, "Failed to recreate consumer group");
                        }
                    } else if e.is_connection_error() {
                        metrics::set_redis_connected(false);

                        if consecutive_errors >= MAX_CONSECUTIVE_CONNECTION_ERRORS {
                            error!(
                                error = %e,
                                consecutive_errors = consecutive_errors,
                                "Broker unreachable, exiting for supervisor restart"
                            );
                            return Err(e);
                        }

                        let backoff_secs = std::cmp::min(
                            2u64.pow(consecutive_errors.min(5)),
                            MAX_ERROR_BACKOFF_SECS,
                        );
                        warn!(
                            error = %e,
                            consecutive_errors = consecutive_errors,
                            backoff_secs = backoff_secs,
                            "Redis connection error, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    } else {
                        error!(error = %e, "Error in worker iteration");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        info!("Stream worker stopped");
        Ok(())
    }

    /// One loop iteration: drain due retries, read and handle one new
    /// record, then sweep for stuck records.
    async fn tick(&self) -> Result<(), StreamError> {
        self.delay_queue.drain(self.config.drain_batch_size).await?;

        if let Some((message_id, fields)) = self.consumer.read_new().await? {
            self.handler.handle(&message_id, &fields).await?;
        }

        self.sweep().await
    }

    /// Reclaim records idle beyond the threshold and feed them through the
    /// handler. The retry budget lives in the record's own retry_count, so
    /// reclaimed records get no special treatment.
    async fn sweep(&self) -> Result<(), StreamError> {
        let reclaimed = self.consumer.claim_stuck().await?;
        for (message_id, fields) in reclaimed {
            self.handler.handle(&message_id, &fields).await?;
        }
        Ok(())
    }
}
