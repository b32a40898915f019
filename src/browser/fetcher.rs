use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::Page;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::debug;

use crate::discovery::ItemIdentifier;
use crate::error::{HarvestError, Result};
use crate::ingest::Record;
use crate::traits::DetailFetcher;

const READY_POLL_INTERVAL_MS: u64 = 250;

/// Field name -> CSS selector on a detail page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailSelectors {
    pub title: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl DetailSelectors {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, selector: impl Into<String>) -> Self {
        self.fields.insert(name.into(), selector.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    title: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

/// Loads each identifier as a URL in its own page and maps it to a [`Record`].
pub struct ChromiumDetailFetcher {
    page: Arc<Page>,
    selectors: DetailSelectors,
    ready_timeout: Duration,
}

impl ChromiumDetailFetcher {
    pub fn new(page: Arc<Page>, selectors: DetailSelectors) -> Self {
        Self {
            page,
            selectors,
            ready_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    async fn wait_ready(&self, identifier: &ItemIdentifier) -> Result<()> {
        let start = Instant::now();
        loop {
            let state = self
                .page
                .evaluate("document.readyState")
                .await
                .map_err(|e| HarvestError::JavaScript(e.to_string()))?
                .into_value::<String>()
                .unwrap_or_default();
            if state == "complete" {
                return Ok(());
            }
            if start.elapsed() >= self.ready_timeout {
                return Err(HarvestError::fetch(
                    identifier,
                    format!("page not ready after {:?} (state={state})", self.ready_timeout),
                ));
            }
            sleep(Duration::from_millis(READY_POLL_INTERVAL_MS)).await;
        }
    }
}

#[async_trait]
impl DetailFetcher for ChromiumDetailFetcher {
    async fn fetch(&mut self, identifier: &ItemIdentifier) -> Result<Record> {
        self.page
            .goto(identifier.as_str())
            .await
            .map_err(|e| HarvestError::fetch(identifier, e.to_string()))?;
        self.wait_ready(identifier).await?;

        let script = format!(
            r#"
            (() => {{
                const cfg = {};
                const text = sel => {{
                    if (!sel) return '';
                    const el = document.querySelector(sel);
                    return el ? el.textContent.trim() : '';
                }};
                const fields = {{}};
                for (const [name, sel] of Object.entries(cfg.fields || {{}})) {{
                    const value = text(sel);
                    if (value) fields[name] = value;
                }}
                return {{ title: text(cfg.title), fields }};
            }})()
            "#,
            serde_json::to_string(&self.selectors)?
        );

        let raw: RawDetail = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(|e| HarvestError::JavaScript(e.to_string()))?
            .into_value()
            .map_err(|e| HarvestError::fetch(identifier, format!("unexpected detail payload: {e}")))?;

        if raw.title.is_empty() && raw.fields.is_empty() {
            return Err(HarvestError::fetch(identifier, "detail page has no content"));
        }
        debug!("Fetched {} ({} fields)", identifier, raw.fields.len());

        Ok(Record {
            identifier: identifier.clone(),
            title: raw.title,
            source_url: Some(identifier.to_string()),
            attributes: raw.fields,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_selectors_builder_and_serde() {
        let selectors = DetailSelectors::new("h1.title")
            .with_field("price", ".price")
            .with_field("odometer_km", "[data-spec=odometer]");

        let json = serde_json::to_value(&selectors).unwrap();
        assert_eq!(json["title"], "h1.title");
        assert_eq!(json["fields"]["price"], ".price");

        let back: DetailSelectors = serde_json::from_value(json).unwrap();
        assert_eq!(back.fields.len(), 2);
    }

    #[test]
    fn test_raw_detail_tolerates_missing_fields() {
        let raw: RawDetail = serde_json::from_str(r#"{ "title": "Civic 2019" }"#).unwrap();
        assert_eq!(raw.title, "Civic 2019");
        assert!(raw.fields.is_empty());
    }
}
