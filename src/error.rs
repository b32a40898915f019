use thiserror::Error;

use crate::discovery::ItemIdentifier;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("browser initialization failed: {0}")]
    BrowserInit(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    JavaScript(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("listing produced no items within {waited_ms}ms")]
    NoInitialContent { waited_ms: u64 },

    #[error("surface action missed: {0}")]
    SurfaceActionMiss(String),

    #[error("fetch failed for {identifier}: {message}")]
    Fetch {
        identifier: ItemIdentifier,
        message: String,
    },

    #[error("batch {batch_id} could not be written ({records} records): {message}")]
    StoreWriteFailure {
        batch_id: String,
        records: usize,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("export error: {0}")]
    Export(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("file I/O error: {0}")]
    FileIO(#[from] std::io::Error),
}

impl HarvestError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarvestError::Timeout(_)
                | HarvestError::Navigation(_)
                | HarvestError::JavaScript(_)
                | HarvestError::Fetch { .. }
                | HarvestError::SurfaceActionMiss(_)
                | HarvestError::Database(_)
        )
    }

    pub fn fetch(identifier: &ItemIdentifier, message: impl Into<String>) -> Self {
        HarvestError::Fetch {
            identifier: identifier.clone(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
