//! Stream Worker - Reliable Redis Streams processing core
//!
//! A library for building Redis Streams workers with:
//! - Consumer group support for horizontal scaling
//! - Time-delayed redelivery with exponential backoff and jitter
//! - Atomic delay-queue drain so concurrent workers never double-deliver
//! - Stuck-message recovery via idle-time auto-claim
//! - Dead letter queue for records that exhaust their retry budget
//! - Idempotency via a processed-id set (effectively-once processing)
//! - Graceful shutdown handling
//! - Health endpoints and a liveness file for external supervisors
//!
//! # Architecture
//!
//! ```text
//! Redis Stream (notes_stream)
//!   ↓ (Consumer Group: notes_processors)
//! StreamWorker<P>
//!   ↓ (normalize + dedupe)
//! RecordProcessor
//!   ↓ (on failure)              ↓ (budget exhausted)
//! Delay queue (zset + hash) → DLQ Stream (notes_stream_dlq)
//!   ↓ (due)
//! back onto notes_stream
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use stream_worker::{
//!     LivenessFile, NoteRecord, RecordProcessor, StreamError, StreamWorker, WorkerConfig,
//! };
//!
//! struct MyProcessor;
//!
//! #[async_trait]
//! impl RecordProcessor for MyProcessor {
//!     async fn process(&self, record: &NoteRecord) -> Result<(), StreamError> {
//!         // Apply the business effect
//!         Ok(())
//!     }
//!     fn name(&self) -> &'static str { "MyProcessor" }
//! }
//!
//! let liveness = LivenessFile::default();
//! let redis = connect_with_unbounded_retry(&url, &liveness).await;
//! let worker = StreamWorker::new(redis, MyProcessor, WorkerConfig::new(), liveness);
//! worker.run(shutdown_rx).await?;
//! ```

mod backoff;
mod config;
mod connection;
mod consumer;
mod delay_queue;
mod error;
mod handler;
mod health;
mod idempotency;
pub mod metrics;
mod record;
mod worker;

pub use backoff::BackoffPolicy;
pub use config::WorkerConfig;
pub use connection::{connect_with_unbounded_retry, try_connect};
pub use consumer::{FieldMap, StreamConsumer};
pub use delay_queue::{DelayQueue, unix_now_secs};
pub use error::StreamError;
pub use handler::{MessageHandler, RecordProcessor};
pub use health::{HealthState, LivenessFile, health_handler, health_router, metrics_handler, ready_handler};
pub use idempotency::ProcessedSet;
pub use record::{DEFAULT_EVENT, NoteRecord, normalize};
pub use worker::StreamWorker;

/// Result type alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
