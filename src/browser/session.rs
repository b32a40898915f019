use std::path::PathBuf;
use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BrowserOptions;
use crate::error::{HarvestError, Result};

/// A launched browser and its CDP event handler task.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
}

impl BrowserSession {
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        info!("Launching browser (headless={})", options.headless);

        // one profile directory per session
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        let user_data_dir = std::env::temp_dir().join(format!("listing-harvester-{}", unique_id));

        let chrome_path = options
            .chrome_path
            .clone()
            .or_else(|| std::env::var("CHROME_PATH").ok().map(PathBuf::from))
            .or_else(|| std::env::var("CHROMIUM_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("chromium"));

        let (width, height) = options.window_size;
        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(&user_data_dir)
            .window_size(width, height)
            .request_timeout(options.request_timeout)
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if !options.headless {
            builder = builder.with_head();
        }

        let config = builder.build().map_err(HarvestError::BrowserInit)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::BrowserInit(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        info!("Browser ready");
        Ok(Self {
            browser,
            handler,
            user_data_dir,
        })
    }

    pub async fn new_page(&self, url: &str) -> Result<Arc<Page>> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| HarvestError::Navigation(format!("{url}: {e}")))?;
        Ok(Arc::new(page))
    }

    /// Close the browser and remove its temporary profile.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        self.handler.abort();
        if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
            debug!("Failed to remove {:?}: {}", self.user_data_dir, e);
        }
        info!("Browser closed");
    }
}
