use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::info;

use crate::browser::{BrowserSession, ChromiumDetailFetcher, ChromiumSurfaceDriver, DetailSelectors, SurfaceSelectors};
use crate::config::HarvestConfig;
use crate::crawl::Crawler;
use crate::error::HarvestError;
use crate::export::CsvExport;
use crate::ingest::CrawlSummary;
use crate::store::SqliteStore;

/// One listing to crawl
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub listing_url: String,
    pub surface: SurfaceSelectors,
    pub detail: DetailSelectors,
    pub config: HarvestConfig,
    pub cancel: CancellationToken,
}

impl CrawlRequest {
    pub fn new(
        listing_url: impl Into<String>,
        surface: SurfaceSelectors,
        detail: DetailSelectors,
    ) -> Self {
        Self {
            listing_url: listing_url.into(),
            surface,
            detail,
            config: HarvestConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: HarvestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// tower::Service running one crawl per request.
///
/// Requests served by clones of a service built with [`HarvestService::with_store`]
/// share that store's pool; otherwise each request connects on its own.
#[derive(Debug, Clone, Default)]
pub struct HarvestService {
    store: Option<SqliteStore>,
}

impl HarvestService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: SqliteStore) -> Self {
        Self { store: Some(store) }
    }
}

impl Service<CrawlRequest> for HarvestService {
    type Response = CrawlSummary;
    type Error = HarvestError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CrawlRequest) -> Self::Future {
        info!("Crawl request received: {}", req.listing_url);
        let shared_store = self.store.clone();

        Box::pin(async move {
            let CrawlRequest {
                listing_url,
                surface,
                detail,
                config,
                cancel,
            } = req;
            config.validate()?;

            // an unreachable store aborts before the browser starts
            let store = match shared_store {
                Some(store) => store,
                None => SqliteStore::connect(&config.database_url, config.max_connections).await?,
            };
            let export = CsvExport::new(&config.export_path, config.export_columns.clone());

            let session = BrowserSession::launch(&config.browser).await?;
            let result: Result<CrawlSummary, HarvestError> = async {
                let listing_page = session.new_page("about:blank").await?;
                let detail_page = session.new_page("about:blank").await?;

                let driver = ChromiumSurfaceDriver::new(listing_page, surface);
                driver.open(&listing_url).await?;
                let fetcher = ChromiumDetailFetcher::new(detail_page, detail)
                    .with_ready_timeout(config.fetch.fetch_timeout);

                Crawler::new(driver, fetcher, store, export, config)
                    .run(&cancel)
                    .await
            }
            .await;
            session.close().await;

            let summary = result?;
            info!(
                "Crawl complete: discovered={} inserted={} duplicates={} errors={} ({}ms)",
                summary.discovered,
                summary.inserted,
                summary.duplicates,
                summary.errors,
                summary.duration_ms
            );
            Ok(summary)
        })
    }
}
