use listing_harvester::{CrawlRequest, DetailSelectors, HarvestConfig, HarvestService, SurfaceSelectors};
use tokio_util::sync::CancellationToken;
use tower::Service;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("info,listing_harvester=debug")
        .init();

    let url = std::env::var("LISTING_URL").expect("LISTING_URL environment variable not set");
    let item = std::env::var("LISTING_ITEM_SELECTOR").unwrap_or_else(|_| "article".into());
    let link = std::env::var("LISTING_LINK_SELECTOR").unwrap_or_else(|_| "a".into());

    let surface = SurfaceSelectors::new(item, link)
        .with_load_more("button.load-more")
        .with_next_page("a[rel=next]")
        .with_end_marker_text("no more results");
    let detail = DetailSelectors::new("h1")
        .with_field("price", ".price")
        .with_field("year", "[data-spec=year]")
        .with_field("odometer_km", "[data-spec=odometer]");

    let config = HarvestConfig::from_env()
        .expect("invalid HARVEST_* configuration")
        .with_export_columns(["price", "year", "odometer_km"]);

    // Ctrl-C stops the crawl; whatever was fetched is still written
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    println!("=== Listing crawl: {} ===", url);
    let request = CrawlRequest::new(url, surface, detail)
        .with_config(config)
        .with_cancel(cancel);

    match HarvestService::new().call(request).await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary).unwrap());
        }
        Err(e) => {
            eprintln!("Crawl failed: {}", e);
        }
    }
}
