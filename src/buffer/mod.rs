/// Bounded FIFO between ingestion and the background worker
pub mod ingestion_buffer;

pub use ingestion_buffer::IngestionBuffer;
