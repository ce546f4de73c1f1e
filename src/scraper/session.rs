use crate::config::ScraperConfig;
use async_trait::async_trait;
use fantoccini::ClientBuilder;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, ScrapeError, WebDriverPage};

/// Chrome flags applied to every session regardless of headless mode.
pub const STABILITY_FLAGS: [&str; 4] = [
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--window-size=1920,1080",
];

/// WebDriver capabilities for a Chrome session.
pub fn chrome_capabilities(headless: bool) -> Map<String, Value> {
    let mut args: Vec<&str> = Vec::with_capacity(STABILITY_FLAGS.len() + 1);
    if headless {
        args.push("--headless=new");
    }
    args.extend(STABILITY_FLAGS);

    let mut caps = Map::new();
    caps.insert("browserName".to_string(), json!("chrome"));
    caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
    caps
}

/// Connects to a running chromedriver (or any W3C WebDriver endpoint).
pub struct WebDriverLauncher {
    config: ScraperConfig,
}

impl WebDriverLauncher {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        // 500ms, 1s, 2s ... capped at 5s
        ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(5))
            .take(self.config.connect_attempts.saturating_sub(1))
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    type Page = WebDriverPage;

    async fn open(&self) -> Result<WebDriverPage, ScrapeError> {
        let url = self.config.webdriver_url.clone();
        let caps = chrome_capabilities(self.config.headless);
        info!(
            "Opening browser session at {} (headless: {})",
            url, self.config.headless
        );

        let mut attempt = 0u32;
        let client = Retry::start(self.backoff(), || {
            attempt += 1;
            let mut builder = ClientBuilder::native();
            builder.capabilities(caps.clone());
            let url = url.clone();
            async move {
                debug!("WebDriver connect attempt {}", attempt);
                builder.connect(&url).await.inspect_err(|e| {
                    warn!("WebDriver connect attempt {} failed: {}", attempt, e);
                })
            }
        })
        .await
        .map_err(|source| ScrapeError::Session { url: url.clone(), source })?;

        Ok(WebDriverPage::new(
            client,
            self.config.landing_url.clone(),
            self.config.timeout(),
        ))
    }
}
