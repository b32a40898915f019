//! Listing harvester
//!
//! - Drives an infinite-scroll / paginated listing until every item is found
//! - Fetches each item's detail page, one at a time
//! - Writes records in batches to SQLite (at most once per identifier) and
//!   checkpoints them to an append-only CSV export
//!
//! # Usage
//!
//! ```rust,ignore
//! use listing_harvester::{CrawlRequest, DetailSelectors, HarvestConfig, HarvestService, SurfaceSelectors};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let surface = SurfaceSelectors::new("article.listing", "a.listing-link")
//!         .with_load_more("button.load-more")
//!         .with_end_marker_text("no more results");
//!     let detail = DetailSelectors::new("h1")
//!         .with_field("price", ".price")
//!         .with_field("year", "[data-spec=year]");
//!
//!     let config = HarvestConfig::from_env().unwrap().with_export_columns(["price", "year"]);
//!     let request = CrawlRequest::new("https://cars.example/used", surface, detail)
//!         .with_config(config);
//!
//!     let summary = HarvestService::new().call(request).await.unwrap();
//!     println!("inserted {} of {} discovered", summary.inserted, summary.discovered);
//! }
//! ```
//!
//! The collaborators behind the crawl are traits ([`SurfaceDriver`],
//! [`DetailFetcher`], [`DurableStore`], [`FlatExport`]); [`Crawler`] runs
//! against any implementation of them.

pub mod browser;
pub mod config;
pub mod crawl;
pub mod discovery;
pub mod error;
pub mod export;
pub mod ingest;
pub mod service;
pub mod store;
pub mod traits;

#[cfg(test)]
mod testing;

// Main types re-exported
pub use browser::{BrowserSession, ChromiumDetailFetcher, ChromiumSurfaceDriver, DetailSelectors, SurfaceSelectors};
pub use config::{BrowserOptions, DiscoveryConfig, FetchConfig, HarvestConfig, IngestConfig};
pub use crawl::Crawler;
pub use discovery::{
    ChannelProgress, DiscoveredSet, DiscoveryLoop, DiscoveryOutcome, DiscoveryState, ItemIdentifier,
    ItemSummary, ListingSnapshot, ProgressEvent, Termination, TracingProgress,
};
pub use error::{HarvestError, Result};
pub use export::CsvExport;
pub use ingest::{CrawlSummary, IngestionPipeline, IngestionResult, InsertOutcome, Record, RecordFilter};
pub use service::{CrawlRequest, HarvestService};
pub use store::SqliteStore;
pub use traits::{ControlKind, DetailFetcher, DurableStore, FlatExport, ProgressSink, SurfaceDriver};
