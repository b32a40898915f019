//! Batched ingestion into the durable store and the flat export

mod pipeline;
mod types;

pub use pipeline::IngestionPipeline;
pub use types::{CrawlSummary, IngestionResult, InsertOutcome, Record, RecordFilter};
