use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::discovery::{ItemIdentifier, ListingSnapshot, ProgressEvent};
use crate::error::Result;
use crate::ingest::{InsertOutcome, Record, RecordFilter};

/// Reveal-more affordances a listing may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    LoadMore,
    NextPage,
}

/// Drives a dynamic listing forward. Owns no item state.
#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    /// Items visible right now
    async fn current_snapshot(&mut self) -> Result<ListingSnapshot>;

    async fn has_load_more_control(&mut self) -> Result<bool>;

    async fn has_next_control(&mut self) -> Result<bool>;

    async fn activate_control(&mut self, kind: ControlKind) -> Result<()>;

    async fn scroll_advance(&mut self) -> Result<()>;

    async fn has_end_of_results_signal(&mut self) -> Result<bool>;

    /// Result count advertised by the listing, if it shows one
    async fn advertised_total(&mut self) -> Result<Option<usize>> {
        Ok(None)
    }
}

/// Produces the full record for one identifier.
#[async_trait]
pub trait DetailFetcher: Send + Sync {
    async fn fetch(&mut self, identifier: &ItemIdentifier) -> Result<Record>;
}

/// Indexed store whose uniqueness constraint on the identifier is authoritative.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create tables and indexes; safe to call repeatedly
    async fn provision(&self) -> Result<()>;

    /// Insert-many with continue-on-conflict
    ///
    /// An `Err` means nothing can be assumed about the batch; replaying it
    /// is safe because conflicting rows come back as duplicates.
    async fn insert_batch(&self, records: &[Record]) -> Result<InsertOutcome>;

    async fn upsert(&self, record: &Record) -> Result<()>;

    async fn find_by_keys(&self, filter: &RecordFilter, limit: u32) -> Result<Vec<Record>>;

    async fn count_all(&self) -> Result<u64>;

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Append-only secondary sink.
#[async_trait]
pub trait FlatExport: Send + Sync {
    async fn append(&mut self, records: &[Record]) -> Result<()>;
}

/// Observer for discovery progress. Never affects control flow.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}
