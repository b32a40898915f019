//! Batched, deduplicating ingestion with flat-export checkpoints

use std::mem;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::{CrawlSummary, IngestionResult, InsertOutcome, Record};
use crate::config::IngestConfig;
use crate::discovery::ItemIdentifier;
use crate::error::{HarvestError, Result};
use crate::traits::{DurableStore, FlatExport};

/// Buffers records into batches for the durable store and checkpoints them
/// to the flat export.
///
/// Single owner of the open batch and the export buffer. Batches keep the
/// order in which records were accepted.
pub struct IngestionPipeline<S, E> {
    store: S,
    export: E,
    config: IngestConfig,
    batch: Vec<Record>,
    pending_export: Vec<Record>,
    batch_seq: u32,
    summary: CrawlSummary,
}

impl<S, E> IngestionPipeline<S, E>
where
    S: DurableStore,
    E: FlatExport,
{
    pub fn new(store: S, export: E, config: IngestConfig) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            store,
            export,
            batch: Vec::with_capacity(batch_size),
            pending_export: Vec::with_capacity(config.checkpoint_every),
            config,
            batch_seq: 0,
            summary: CrawlSummary::start(),
        }
    }

    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }

    pub fn note_discovered(&mut self, discovered: usize) {
        self.summary.discovered = discovered;
    }

    /// Count a detail fetch that was given up on.
    pub fn record_fetch_error(&mut self, identifier: &ItemIdentifier, err: &HarvestError) {
        warn!("Skipping {}: {}", identifier, err);
        self.summary.count_fetch_error();
    }

    /// Add a record to the open batch.
    ///
    /// Flushes before returning when the batch is full. An `Err` is a batch
    /// that could not be written even after the retry; the pipeline stays
    /// usable and the records remain in the flat export.
    pub async fn accept(&mut self, record: Record) -> Result<Option<IngestionResult>> {
        self.summary.fetched += 1;

        self.pending_export.push(record.clone());
        if self.pending_export.len() >= self.config.checkpoint_every {
            if let Err(e) = self.checkpoint().await {
                warn!(
                    "Flat export append failed, keeping {} records for the next checkpoint: {}",
                    self.pending_export.len(),
                    e
                );
            }
        }

        self.batch.push(record);
        if self.batch.len() >= self.config.batch_size.max(1) {
            return self.flush().await;
        }
        Ok(None)
    }

    /// Append buffered records to the flat export.
    ///
    /// On failure the buffer is kept, so the next checkpoint retries it.
    pub async fn checkpoint(&mut self) -> Result<usize> {
        if self.pending_export.is_empty() {
            return Ok(0);
        }
        self.export.append(&self.pending_export).await?;
        let written = self.pending_export.len();
        self.pending_export.clear();
        debug!("Checkpointed {} records to flat export", written);
        Ok(written)
    }

    /// Write the open batch, if any.
    pub async fn flush(&mut self) -> Result<Option<IngestionResult>> {
        if self.batch.is_empty() {
            return Ok(None);
        }
        let records = mem::replace(
            &mut self.batch,
            Vec::with_capacity(self.config.batch_size.max(1)),
        );
        self.write_batch(records).await.map(Some)
    }

    /// Flush everything still buffered and close the summary.
    pub async fn finalize(mut self) -> CrawlSummary {
        if let Err(e) = self.flush().await {
            error!("Final batch lost from store: {}", e);
        }
        if let Err(e) = self.checkpoint().await {
            error!(
                "Final flat export append failed, {} records not exported: {}",
                self.pending_export.len(),
                e
            );
        }

        self.summary.finish();
        info!(
            batch_id = %self.summary.batch_id,
            "Ingestion finished: fetched={} inserted={} duplicates={} errors={} in {}ms",
            self.summary.fetched,
            self.summary.inserted,
            self.summary.duplicates,
            self.summary.errors,
            self.summary.duration_ms
        );
        self.summary
    }

    async fn write_batch(&mut self, records: Vec<Record>) -> Result<IngestionResult> {
        self.batch_seq += 1;
        let batch_id = format!("{}-{:05}", self.summary.batch_id, self.batch_seq);

        let outcome = match self.try_insert(&records).await {
            Ok(outcome) => outcome,
            Err(first) => {
                warn!(
                    "Batch {} write failed, retrying in {:?}: {}",
                    batch_id, self.config.retry_backoff, first
                );
                sleep(self.config.retry_backoff).await;

                match self.try_insert(&records).await {
                    Ok(outcome) => outcome,
                    Err(second) => {
                        error!(
                            "Batch {} dropped after retry ({} records): {}",
                            batch_id,
                            records.len(),
                            second
                        );
                        self.summary.absorb(&IngestionResult {
                            batch_id: batch_id.clone(),
                            inserted: 0,
                            duplicates: 0,
                            failed: records.len(),
                        });
                        return Err(HarvestError::StoreWriteFailure {
                            batch_id,
                            records: records.len(),
                            message: second.to_string(),
                        });
                    }
                }
            }
        };

        let result = IngestionResult {
            batch_id,
            inserted: outcome.inserted,
            duplicates: outcome.duplicates,
            failed: outcome.failed,
        };
        self.summary.absorb(&result);
        info!(
            "Batch {}: inserted={} duplicates={} failed={}",
            result.batch_id, result.inserted, result.duplicates, result.failed
        );
        Ok(result)
    }

    async fn try_insert(&self, records: &[Record]) -> Result<InsertOutcome> {
        let timeout = self.config.write_timeout;
        match tokio::time::timeout(timeout, self.store.insert_batch(records)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Timeout(format!(
                "batch write after {timeout:?}"
            ))),
        }
    }
}
