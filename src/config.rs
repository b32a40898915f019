use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Discovery loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Max wait for the first non-empty snapshot
    pub initial_wait: Duration,
    /// Poll interval while loading
    pub poll_interval: Duration,
    /// Delay after every advance before re-snapshotting
    pub settle_delay: Duration,
    /// Bound on a single surface action
    pub action_timeout: Duration,
    /// Consecutive failed scrolls tolerated before they count as non-growing
    #[serde(default = "default_scroll_retries")]
    pub scroll_retries: u32,
    /// Consecutive non-growing iterations before draining
    pub stagnation_threshold: u32,
    /// Stagnant iterations past the threshold before giving up without an end signal
    pub drain_checks: u32,
    /// Hard iteration cap
    pub max_iterations: u32,
    pub progress_every_items: usize,
    pub progress_every_iterations: u32,
    /// Known result count, used only for ETA
    pub expected_total: Option<usize>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(20),
            poll_interval: Duration::from_millis(500),
            settle_delay: Duration::from_millis(1500),
            action_timeout: Duration::from_secs(10),
            scroll_retries: default_scroll_retries(),
            stagnation_threshold: 5,
            drain_checks: 2,
            max_iterations: 2000,
            progress_every_items: 1000,
            progress_every_iterations: 100,
            expected_total: None,
        }
    }
}

fn default_scroll_retries() -> u32 {
    2
}

impl DiscoveryConfig {
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_scroll_retries(mut self, retries: u32) -> Self {
        self.scroll_retries = retries;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_initial_wait(mut self, wait: Duration, poll_interval: Duration) -> Self {
        self.initial_wait = wait;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stagnation(mut self, threshold: u32, drain_checks: u32) -> Self {
        self.stagnation_threshold = threshold;
        self.drain_checks = drain_checks;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_progress(mut self, every_items: usize, every_iterations: u32) -> Self {
        self.progress_every_items = every_items;
        self.progress_every_iterations = every_iterations;
        self
    }

    pub fn with_expected_total(mut self, total: usize) -> Self {
        self.expected_total = Some(total);
        self
    }
}

/// Detail fetch tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Mandatory pause between two detail fetches
    pub request_delay: Duration,
    pub fetch_timeout: Duration,
    /// Retries after the first attempt
    pub fetch_retries: u32,
    /// First retry backoff, doubled per attempt
    pub fetch_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(800),
            fetch_timeout: Duration::from_secs(30),
            fetch_retries: 2,
            fetch_backoff: Duration::from_millis(1000),
        }
    }
}

impl FetchConfig {
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.fetch_retries = retries;
        self.fetch_backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

/// Ingestion pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub batch_size: usize,
    /// Accepted records per flat-export append
    pub checkpoint_every: usize,
    pub write_timeout: Duration,
    /// Pause before the single whole-batch retry
    pub retry_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            checkpoint_every: 10,
            write_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

impl IngestConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Falls back to CHROME_PATH / CHROMIUM_PATH, then `chromium`
    pub chrome_path: Option<PathBuf>,
    /// CDP request timeout
    pub request_timeout: Duration,
    pub window_size: (u32, u32),
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            request_timeout: Duration::from_secs(60),
            window_size: (1280, 2000),
        }
    }
}

/// Top-level crawl configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub export_path: PathBuf,
    /// Attribute columns written to the flat export
    pub export_columns: Vec<String>,
    pub discovery: DiscoveryConfig,
    pub fetch: FetchConfig,
    pub ingest: IngestConfig,
    pub browser: BrowserOptions,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/listing.db".to_string(),
            max_connections: 5,
            export_path: PathBuf::from("./data/extracted.csv"),
            export_columns: Vec::new(),
            discovery: DiscoveryConfig::default(),
            fetch: FetchConfig::default(),
            ingest: IngestConfig::default(),
            browser: BrowserOptions::default(),
        }
    }
}

impl HarvestConfig {
    pub fn new(database_url: impl Into<String>, export_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.into(),
            export_path: export_path.into(),
            ..Default::default()
        }
    }

    pub fn with_export_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.export_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.browser.headless = headless;
        self
    }

    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    /// Defaults overridden by `HARVEST_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("HARVEST_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(path) = lookup("HARVEST_EXPORT_PATH") {
            config.export_path = PathBuf::from(path);
        }
        if let Some(columns) = lookup("HARVEST_EXPORT_COLUMNS") {
            config.export_columns = columns
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_MAX_CONNECTIONS")? {
            config.max_connections = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_BATCH_SIZE")? {
            config.ingest.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_MAX_ITERATIONS")? {
            config.discovery.max_iterations = v;
        }
        if let Some(v) = parse_var(&lookup, "HARVEST_STAGNATION_THRESHOLD")? {
            config.discovery.stagnation_threshold = v;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "HARVEST_REQUEST_DELAY_MS")? {
            config.fetch.request_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "HARVEST_SETTLE_DELAY_MS")? {
            config.discovery.settle_delay = Duration::from_millis(ms);
        }
        if let Some(headless) = parse_var(&lookup, "HARVEST_HEADLESS")? {
            config.browser.headless = headless;
        }
        if let Some(path) = lookup("CHROME_PATH").or_else(|| lookup("CHROMIUM_PATH")) {
            config.browser.chrome_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            return Err(HarvestError::Config("batch_size must be at least 1".into()));
        }
        if self.ingest.checkpoint_every == 0 {
            return Err(HarvestError::Config(
                "checkpoint_every must be at least 1".into(),
            ));
        }
        if self.discovery.stagnation_threshold == 0 {
            return Err(HarvestError::Config(
                "stagnation_threshold must be at least 1".into(),
            ));
        }
        if self.discovery.max_iterations == 0 {
            return Err(HarvestError::Config(
                "max_iterations must be at least 1".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(HarvestError::Config(
                "max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HarvestError::Config(format!("{key}: invalid value {raw:?}"))),
    }
}
