//! Ingestion data model

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::{ItemIdentifier, ItemSummary};

/// Fully-detailed item produced by a detail fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identifier: ItemIdentifier,
    pub title: String,
    pub source_url: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

impl Record {
    pub fn new(identifier: ItemIdentifier, title: impl Into<String>) -> Self {
        Self {
            identifier,
            title: title.into(),
            source_url: None,
            attributes: BTreeMap::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = at;
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Fill gaps from the listing card. Values from the detail page win.
    pub fn merge_summary(&mut self, summary: &ItemSummary) {
        if self.title.is_empty() {
            self.title = summary.title.clone();
        }
        for (key, value) in &summary.fields {
            if !value.is_empty() {
                self.attributes
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
    }
}

/// Store-side result of one insert-many call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    /// Rows rejected for reasons other than a key conflict
    pub failed: usize,
}

/// Per-batch outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionResult {
    pub batch_id: String,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Query for [`crate::traits::DurableStore::find_by_keys`]
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Empty matches every identifier
    pub identifiers: Vec<ItemIdentifier>,
    pub fetched_after: Option<DateTime<Utc>>,
    /// Attribute equality constraints
    pub attributes: BTreeMap<String, String>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_identifiers(ids: impl IntoIterator<Item = ItemIdentifier>) -> Self {
        Self {
            identifiers: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn fetched_after(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_after = Some(at);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Totals for one crawl invocation; the only artifact handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub discovered: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// `fetch_errors + write_failures`
    pub errors: usize,
    pub fetch_errors: usize,
    /// Records lost to failed batch writes (still present in the flat export)
    pub write_failures: usize,
    pub batch_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl CrawlSummary {
    pub fn start() -> Self {
        let start_time = Utc::now();
        Self {
            discovered: 0,
            fetched: 0,
            inserted: 0,
            duplicates: 0,
            errors: 0,
            fetch_errors: 0,
            write_failures: 0,
            batch_id: format!("crawl_{}", start_time.format("%Y%m%d_%H%M%S_%3f")),
            start_time,
            end_time: None,
            duration_ms: 0,
        }
    }

    pub(crate) fn absorb(&mut self, result: &IngestionResult) {
        self.inserted += result.inserted;
        self.duplicates += result.duplicates;
        self.write_failures += result.failed;
        self.errors = self.fetch_errors + self.write_failures;
    }

    pub(crate) fn count_fetch_error(&mut self) {
        self.fetch_errors += 1;
        self.errors = self.fetch_errors + self.write_failures;
    }

    pub(crate) fn finish(&mut self) {
        let end = Utc::now();
        self.duration_ms = (end - self.start_time).num_milliseconds().max(0) as u64;
        self.end_time = Some(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_error_total_tracks_both_sources() {
        let mut summary = CrawlSummary::start();
        summary.count_fetch_error();
        summary.absorb(&IngestionResult {
            batch_id: "b-1".into(),
            inserted: 3,
            duplicates: 1,
            failed: 2,
        });

        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.fetch_errors, 1);
        assert_eq!(summary.write_failures, 2);
        assert_eq!(summary.errors, 3);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let mut summary = CrawlSummary::start();
        summary.finish();
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("batchId").is_some());
        assert!(json.get("durationMs").is_some());
        assert!(json.get("endTime").unwrap().is_string());
    }

    #[test]
    fn test_record_builder() {
        let record = Record::new("https://x/cars/9".into(), "Civic")
            .with_attribute("year", "2019")
            .with_source_url("https://x/cars/9");
        assert_eq!(record.attribute("year"), Some("2019"));
        assert_eq!(record.attribute("price"), None);
        assert_eq!(record.source_url.as_deref(), Some("https://x/cars/9"));
    }

    #[test]
    fn test_merge_summary_keeps_detail_values() {
        let mut summary = ItemSummary::titled("Honda Civic 2019");
        summary.fields.insert("price".into(), "$18,500".into());
        summary.fields.insert("city".into(), "Toronto".into());
        summary.fields.insert("fuel".into(), String::new());

        let mut record = Record::new("https://x/cars/9".into(), "").with_attribute("price", "$18,000");
        record.merge_summary(&summary);

        assert_eq!(record.title, "Honda Civic 2019");
        assert_eq!(record.attribute("price"), Some("$18,000"));
        assert_eq!(record.attribute("city"), Some("Toronto"));
        assert_eq!(record.attribute("fuel"), None);
    }
}
