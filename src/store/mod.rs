//! Durable store adapters

mod sqlite;

pub use sqlite::SqliteStore;
