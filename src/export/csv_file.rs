use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::SecondsFormat;
use tracing::debug;

use crate::error::Result;
use crate::ingest::Record;
use crate::traits::FlatExport;

const FIXED_COLUMNS: [&str; 4] = ["identifier", "title", "source_url", "fetched_at"];

/// Append-only CSV file; the header is written once per file.
#[derive(Debug, Clone)]
pub struct CsvExport {
    path: PathBuf,
    columns: Vec<String>,
}

impl CsvExport {
    /// `columns` are attribute keys written after the fixed columns.
    pub fn new(path: impl Into<PathBuf>, columns: Vec<String>) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.columns.iter().cloned())
            .collect()
    }

    fn row(&self, record: &Record) -> Vec<String> {
        let mut row = vec![
            record.identifier.to_string(),
            record.title.clone(),
            record.source_url.clone().unwrap_or_default(),
            record
                .fetched_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        ];
        row.extend(
            self.columns
                .iter()
                .map(|c| record.attribute(c).unwrap_or_default().to_string()),
        );
        row
    }
}

#[async_trait]
impl FlatExport for CsvExport {
    async fn append(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let needs_header = fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(self.headers())?;
        }
        for record in records {
            writer.write_record(self.row(record))?;
        }
        writer.flush()?;

        debug!("Appended {} rows to {:?}", records.len(), self.path);
        Ok(())
    }
}
