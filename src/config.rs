//! Configuration file parser.
//!
//! One TOML file describes the aggregation (`[planet]`) and the
//! subscription list (`[[feed]]`). All planet keys are optional and
//! fall back to defaults; unknown keys are ignored so a config can be
//! shared across versions.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::channel::ChannelConfig;
use crate::feed::fetcher::FetchConfig;

/// Refuse to parse configs beyond this size; a real one is a few KB.
const MAX_CONFIG_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file too large: {0}")]
    TooLarge(String),
}

/// The `[planet]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlanetSection {
    /// Directory holding one cache file per feed.
    pub cache_dir: PathBuf,

    /// First-sync visibility threshold. 0 shows a new feed's whole
    /// backlog.
    pub new_feed_items: usize,

    /// Default item cap for listings. 0 = unlimited.
    pub items_per_page: usize,

    /// Default max-days window for listings. 0 = unlimited.
    pub days_per_page: i64,

    /// Aggregation-wide include pattern.
    pub filter: Option<String>,

    /// Aggregation-wide exclude pattern.
    pub exclude: Option<String>,

    /// Concurrent fetch limit.
    pub concurrency: usize,

    /// Per-fetch timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for PlanetSection {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            new_feed_items: 10,
            items_per_page: 60,
            days_per_page: 0,
            filter: None,
            exclude: None,
            concurrency: 10,
            timeout_secs: 30,
        }
    }
}

/// One `[[feed]]` block.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    pub url: String,

    /// Display name override.
    #[serde(default)]
    pub name: Option<String>,

    /// Per-channel include pattern.
    #[serde(default)]
    pub filter: Option<String>,

    /// Per-channel exclude pattern.
    #[serde(default)]
    pub exclude: Option<String>,

    /// Keep the channel out of aggregated views.
    #[serde(default)]
    pub hidden: bool,
}

impl From<&FeedSection> for ChannelConfig {
    fn from(feed: &FeedSection) -> Self {
        ChannelConfig {
            url: feed.url.clone(),
            name: feed.name.clone(),
            filter: feed.filter.clone(),
            exclude: feed.exclude.clone(),
            hidden: feed.hidden,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub planet: PlanetSection,

    #[serde(rename = "feed")]
    pub feeds: Vec<FeedSection>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > MAX_CONFIG_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "{} is {} bytes (limit {})",
                path.display(),
                metadata.len(),
                MAX_CONFIG_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: std::time::Duration::from_secs(self.planet.timeout_secs),
            ..FetchConfig::default()
        }
    }
}
