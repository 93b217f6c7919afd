//! Runtime settings.
//!
//! Settings come from an optional YAML file; every key may be omitted and
//! falls back to its default. Command-line flags override the file.
//!
//! ```yaml
//! listing_url: "https://en.toram.jp/information/?type_code=all&page={page}"
//! database_path: data/toram_news.sqlite
//! seen_links_path: data/seen_links.txt
//! crawl_interval_secs: 60
//! delivery_interval_secs: 5
//! webhook_url: "https://discord.com/api/webhooks/…"
//! ```

use crate::cli::Cli;
use crate::errors::ConfigError;
use crate::scrapers::listing::PAGE_PLACEHOLDER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Listing URL template; `{page}` is replaced by the page number.
    pub listing_url: String,
    pub database_path: PathBuf,
    pub seen_links_path: PathBuf,
    pub crawl_interval_secs: u64,
    pub delivery_interval_secs: u64,
    /// Pause between detail fetches and between notification parts.
    pub pacing_millis: u64,
    pub max_listing_pages: u32,
    pub request_timeout_secs: u64,
    pub fetch_retries: usize,
    pub webhook_url: Option<String>,
    /// On a first start, deliver articles that were stored before delivery
    /// ever ran instead of skipping them.
    pub deliver_backlog: bool,
    /// Category used when an article page has no category icon.
    pub default_category: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listing_url: "https://en.toram.jp/information/?type_code=all&page={page}".to_string(),
            database_path: PathBuf::from("data/toram_news.sqlite"),
            seen_links_path: PathBuf::from("data/seen_links.txt"),
            crawl_interval_secs: 60,
            delivery_interval_secs: 5,
            pacing_millis: 1000,
            max_listing_pages: 998,
            request_timeout_secs: 30,
            fetch_retries: 3,
            webhook_url: None,
            deliver_backlog: false,
            default_category: "en.toram.jp".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or the defaults when no path is given.
    #[instrument(level = "info")]
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let settings = Self::from_yaml(&text)?;
        info!("Loaded configuration file");
        Ok(settings)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(path) = &cli.database {
            self.database_path = path.clone();
        }
        if let Some(path) = &cli.seen_links {
            self.seen_links_path = path.clone();
        }
        if let Some(url) = &cli.webhook_url {
            self.webhook_url = Some(url.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.listing_url.contains(PAGE_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "listing_url must contain {PAGE_PLACEHOLDER}"
            )));
        }
        if self.crawl_interval_secs == 0 || self.delivery_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "intervals must be at least one second".to_string(),
            ));
        }
        if self.max_listing_pages == 0 {
            return Err(ConfigError::Invalid(
                "max_listing_pages must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn crawl_interval(&self) -> Duration {
        Duration::from_secs(self.crawl_interval_secs)
    }

    pub fn delivery_interval(&self) -> Duration {
        Duration::from_secs(self.delivery_interval_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
