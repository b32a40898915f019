//! One crawl: discovery, then sequential detail fetches, then finalize

use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FetchConfig, HarvestConfig};
use crate::discovery::{DiscoveryLoop, ItemIdentifier, TracingProgress};
use crate::error::{HarvestError, Result};
use crate::ingest::{CrawlSummary, IngestionPipeline, Record};
use crate::traits::{DetailFetcher, DurableStore, FlatExport, ProgressSink, SurfaceDriver};

/// Single sequential worker over one listing.
pub struct Crawler<D, F, S, E> {
    driver: D,
    fetcher: F,
    store: S,
    export: E,
    config: HarvestConfig,
    progress: Arc<dyn ProgressSink>,
}

impl<D, F, S, E> Crawler<D, F, S, E>
where
    D: SurfaceDriver,
    F: DetailFetcher,
    S: DurableStore,
    E: FlatExport,
{
    pub fn new(driver: D, fetcher: F, store: S, export: E, config: HarvestConfig) -> Self {
        Self {
            driver,
            fetcher,
            store,
            export,
            config,
            progress: Arc::new(TracingProgress),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Run the crawl.
    ///
    /// Fails only when the store cannot be provisioned or the listing never
    /// shows content. Everything else lands in the summary counters.
    pub async fn run(self, cancel: &CancellationToken) -> Result<CrawlSummary> {
        let Crawler {
            mut driver,
            mut fetcher,
            store,
            export,
            config,
            progress,
        } = self;

        store.provision().await?;

        let mut discovery = DiscoveryLoop::new(config.discovery.clone()).with_progress(progress);
        let outcome = discovery.run(&mut driver, cancel).await?;
        info!(
            "Discovery finished ({:?}): {} items in {} iterations, {:?}",
            outcome.termination,
            outcome.items.len(),
            outcome.iterations,
            outcome.elapsed
        );
        if !outcome.termination.is_complete() {
            warn!("Discovered set is partial ({:?})", outcome.termination);
        }

        let mut pipeline = IngestionPipeline::new(store, export, config.ingest.clone());
        pipeline.note_discovered(outcome.items.len());

        let items = outcome.items;
        let total = items.len();

        for (index, identifier) in items.identifiers().enumerate() {
            if cancel.is_cancelled() {
                info!("Crawl cancelled after {} of {} items", index, total);
                break;
            }
            if index > 0 {
                sleep(config.fetch.request_delay).await;
            }

            let summary = items.summary(identifier);
            match fetch_with_retry(&mut fetcher, identifier, &config.fetch).await {
                Ok(mut record) => {
                    if let Some(summary) = summary {
                        record.merge_summary(summary);
                    }
                    if let Err(e) = pipeline.accept(record).await {
                        warn!("{}", e);
                    }
                }
                Err(e) => {
                    if let Some(summary) = summary.filter(|s| !s.title.is_empty()) {
                        debug!("Failed item was listed as {:?}", summary.title);
                    }
                    pipeline.record_fetch_error(identifier, &e);
                }
            }

            if (index + 1) % 100 == 0 {
                debug!("Fetched {}/{}", index + 1, total);
            }
        }

        Ok(pipeline.finalize().await)
    }
}

/// One attempt plus `fetch_retries`, each bounded by `fetch_timeout`.
async fn fetch_with_retry<F>(
    fetcher: &mut F,
    identifier: &ItemIdentifier,
    config: &FetchConfig,
) -> Result<Record>
where
    F: DetailFetcher + ?Sized,
{
    let attempts = config.fetch_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(config.fetch_timeout, fetcher.fetch(identifier)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Timeout(format!(
                "fetch of {identifier} after {:?}",
                config.fetch_timeout
            ))),
        };

        match result {
            Ok(record) => return Ok(record),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let backoff = config.fetch_backoff * 2u32.saturating_pow(attempt - 1);
                debug!(
                    "Fetch attempt {}/{} for {} failed, retrying in {:?}: {}",
                    attempt, attempts, identifier, backoff, e
                );
                sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscoveryConfig, IngestConfig};
    use crate::ingest::RecordFilter;
    use std::time::Duration;
    use crate::testing::{record, MemoryExport, MemoryStore, ScriptedFetcher, ScriptedSurface};
    use async_trait::async_trait;

    fn fast_config(batch_size: usize) -> HarvestConfig {
        HarvestConfig::default()
            .with_discovery(
                DiscoveryConfig::default()
                    .with_settle_delay(Duration::ZERO)
                    .with_initial_wait(Duration::from_millis(20), Duration::from_millis(5)),
            )
            .with_fetch(
                FetchConfig::default()
                    .with_request_delay(Duration::ZERO)
                    .with_retries(2, Duration::ZERO),
            )
            .with_ingest(
                IngestConfig::default()
                    .with_batch_size(batch_size)
                    .with_retry_backoff(Duration::ZERO),
            )
    }

    #[tokio::test]
    async fn test_crawl_counts_every_outcome() {
        let store = MemoryStore::new();
        let export = MemoryExport::new();
        let surface = ScriptedSurface::growing(4, 2).with_end_signal_after(0);
        let fetcher = ScriptedFetcher::failing(&["item-5"]);

        let summary = Crawler::new(surface, fetcher, store.clone(), export.clone(), fast_config(5))
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.discovered, 12);
        assert_eq!(summary.fetched, 11);
        assert_eq!(summary.inserted, 11);
        assert_eq!(summary.fetch_errors, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(store.identifiers().len(), 11);
        assert_eq!(export.identifiers().len(), 11);
    }

    #[tokio::test]
    async fn test_listing_fields_fill_the_record() {
        let store = MemoryStore::new();
        let surface = ScriptedSurface::growing(3, 1).with_end_signal_after(0);

        Crawler::new(
            surface,
            ScriptedFetcher::default(),
            store.clone(),
            MemoryExport::new(),
            fast_config(10),
        )
        .run(&CancellationToken::new())
        .await
        .unwrap();

        let filter = RecordFilter::by_identifiers([ItemIdentifier::new("item-4")]);
        let rows = store.find_by_keys(&filter, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attribute("rank"), Some("4"));
        // the detail title is kept
        assert_eq!(rows[0].title, "title item-4");
    }

    #[tokio::test]
    async fn test_flaky_fetch_is_retried() {
        let mut fetcher = ScriptedFetcher::flaky("x", 2);
        let config = FetchConfig::default().with_retries(2, Duration::ZERO);

        let record = fetch_with_retry(&mut fetcher, &"x".into(), &config).await.unwrap();
        assert_eq!(record.identifier.as_str(), "x");
        assert_eq!(fetcher.attempts("x"), 3);

        let mut fetcher = ScriptedFetcher::flaky("y", 3);
        assert!(fetch_with_retry(&mut fetcher, &"y".into(), &config).await.is_err());
        assert_eq!(fetcher.attempts("y"), 3);
    }

    struct SlowFetcher;

    #[async_trait]
    impl DetailFetcher for SlowFetcher {
        async fn fetch(&mut self, identifier: &ItemIdentifier) -> Result<Record> {
            sleep(Duration::from_secs(5)).await;
            Ok(record(identifier.as_str()))
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout_counts_as_failure() {
        let config = FetchConfig::default()
            .with_retries(1, Duration::ZERO)
            .with_timeout(Duration::from_millis(10));

        let err = fetch_with_retry(&mut SlowFetcher, &"z".into(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Timeout(_)));
    }

    /// Raises the stop signal after a number of fetches.
    struct CancellingFetcher {
        after: usize,
        fetched: usize,
        token: CancellationToken,
    }

    #[async_trait]
    impl DetailFetcher for CancellingFetcher {
        async fn fetch(&mut self, identifier: &ItemIdentifier) -> Result<Record> {
            self.fetched += 1;
            if self.fetched >= self.after {
                self.token.cancel();
            }
            Ok(record(identifier.as_str()))
        }
    }

    #[tokio::test]
    async fn test_cancel_flushes_what_was_fetched() {
        let store = MemoryStore::new();
        let export = MemoryExport::new();
        let cancel = CancellationToken::new();
        let surface = ScriptedSurface::growing(10, 2).with_end_signal_after(0);
        let fetcher = CancellingFetcher {
            after: 13,
            fetched: 0,
            token: cancel.clone(),
        };

        let summary = Crawler::new(surface, fetcher, store.clone(), export.clone(), fast_config(100))
            .run(&cancel)
            .await
            .unwrap();

        assert_eq!(summary.discovered, 30);
        assert_eq!(summary.fetched, 13);
        assert_eq!(store.identifiers().len(), 13);
        assert_eq!(export.identifiers().len(), 13);
    }

    #[tokio::test]
    async fn test_empty_listing_aborts_before_fetching() {
        let store = MemoryStore::new();
        let surface = ScriptedSurface::growing(0, 0);

        let err = Crawler::new(
            surface,
            ScriptedFetcher::default(),
            store.clone(),
            MemoryExport::new(),
            fast_config(5),
        )
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

        assert!(matches!(err, HarvestError::NoInitialContent { .. }));
        assert_eq!(store.insert_calls(), 0);
    }
}
