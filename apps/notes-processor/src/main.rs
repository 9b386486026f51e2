//! Notes Processor Service - Entry Point
//!
//! Background worker that processes note records from the Redis stream.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    notes_processor::run().await
}
