//! The business hook applied to each note record.

use async_trait::async_trait;
use std::time::Duration;
use stream_worker::{NoteRecord, RecordProcessor, StreamError};
use tracing::info;

/// Idempotent note processing. Replace with real logic.
pub struct NoteLogProcessor;

#[async_trait]
impl RecordProcessor for NoteLogProcessor {
    async fn process(&self, record: &NoteRecord) -> Result<(), StreamError> {
        info!(
            note_id = ?record.note_id,
            trace_id = ?record.trace_id,
            retry_count = record.retry_count,
            event = %record.event,
            "Processing note"
        );

        // Simulate work
        tokio::time::sleep(Duration::from_millis(200)).await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "NoteLogProcessor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_processor_accepts_any_record() {
        let record = NoteRecord {
            event: "notes.created".to_string(),
            note_id: Some("n1".to_string()),
            trace_id: None,
            retry_count: 0,
            payload: r#"{"title":"hi"}"#.to_string(),
        };

        assert!(NoteLogProcessor.process(&record).await.is_ok());
        assert_eq!(NoteLogProcessor.name(), "NoteLogProcessor");
    }
}
