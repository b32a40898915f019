//! SQLite durable store
//!
//! `identifier` is the primary key, so the database itself rejects a second
//! insert of the same item.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use crate::discovery::ItemIdentifier;
use crate::error::{HarvestError, Result};
use crate::ingest::{InsertOutcome, Record, RecordFilter};
use crate::traits::DurableStore;

const CREATE_RECORDS_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        identifier TEXT PRIMARY KEY NOT NULL,
        title TEXT NOT NULL,
        source_url TEXT,
        attributes TEXT NOT NULL DEFAULT '{}',
        fetched_at TEXT NOT NULL,
        ingested_at TEXT NOT NULL
    )
"#;

const CREATE_FETCHED_AT_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_fetched_at ON records (fetched_at)";

const INSERT_SQL: &str = r#"
    INSERT INTO records (identifier, title, source_url, attributes, fetched_at, ingested_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(identifier) DO NOTHING
"#;

const UPSERT_SQL: &str = r#"
    INSERT INTO records (identifier, title, source_url, attributes, fetched_at, ingested_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(identifier) DO UPDATE SET
        title = excluded.title,
        source_url = excluded.source_url,
        attributes = excluded.attributes,
        fetched_at = excluded.fetched_at
"#;

/// Pool-backed store. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a bounded pool; the database file and its directory are created
    /// when missing.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        // every in-memory connection is its own database
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        let pool = pool_options.connect_with(options).await?;

        info!("Connected to {}", database_url);
        Ok(Self { pool })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn provision(&self) -> Result<()> {
        sqlx::query(CREATE_RECORDS_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_FETCHED_AT_INDEX_SQL)
            .execute(&self.pool)
            .await?;
        debug!("records table ready");
        Ok(())
    }

    async fn insert_batch(&self, records: &[Record]) -> Result<InsertOutcome> {
        let ingested_at = timestamp(Utc::now());
        let mut outcome = InsertOutcome::default();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let attributes = serde_json::to_string(&record.attributes)?;
            let result = sqlx::query(INSERT_SQL)
                .bind(record.identifier.as_str())
                .bind(&record.title)
                .bind(record.source_url.as_deref())
                .bind(attributes)
                .bind(timestamp(record.fetched_at))
                .bind(&ingested_at)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => outcome.duplicates += 1,
                Ok(_) => outcome.inserted += 1,
                Err(e) => {
                    warn!("Insert of {} rejected: {}", record.identifier, e);
                    outcome.failed += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn upsert(&self, record: &Record) -> Result<()> {
        sqlx::query(UPSERT_SQL)
            .bind(record.identifier.as_str())
            .bind(&record.title)
            .bind(record.source_url.as_deref())
            .bind(serde_json::to_string(&record.attributes)?)
            .bind(timestamp(record.fetched_at))
            .bind(timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_keys(&self, filter: &RecordFilter, limit: u32) -> Result<Vec<Record>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT identifier, title, source_url, attributes, fetched_at FROM records WHERE 1 = 1",
        );

        if !filter.identifiers.is_empty() {
            query.push(" AND identifier IN (");
            let mut ids = query.separated(", ");
            for id in &filter.identifiers {
                ids.push_bind(id.as_str().to_string());
            }
            ids.push_unseparated(")");
        }
        if let Some(after) = filter.fetched_after {
            query.push(" AND fetched_at > ").push_bind(timestamp(after));
        }
        for (key, value) in &filter.attributes {
            query
                .push(" AND json_extract(attributes, ")
                .push_bind(json_path(key))
                .push(") = ")
                .push_bind(value.clone());
        }
        query
            .push(" ORDER BY fetched_at, identifier LIMIT ")
            .push_bind(i64::from(limit));

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count_all(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM records")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM records WHERE fetched_at < ?1")
            .bind(timestamp(cutoff))
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!("Deleted {} records fetched before {}", deleted, cutoff);
        Ok(deleted)
    }
}

/// Fixed-width UTC text, so string order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', ""))
}

fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let identifier: String = row.try_get("identifier")?;
    let attributes: String = row.try_get("attributes")?;
    let fetched_at: String = row.try_get("fetched_at")?;
    let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
        .map_err(|e| HarvestError::Database(sqlx::Error::Decode(Box::new(e))))?
        .with_timezone(&Utc);

    Ok(Record {
        identifier: ItemIdentifier::new(identifier),
        title: row.try_get("title")?,
        source_url: row.try_get("source_url")?,
        attributes: serde_json::from_str(&attributes)?,
        fetched_at,
    })
}
