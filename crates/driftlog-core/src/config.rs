use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::clock::DEFAULT_SKEW_THRESHOLD_MS;
use crate::index::IndexOptions;
use crate::trim::TrimPolicy;

/// Serializable log settings.
///
/// Every field has a default, so an empty file (or no file) is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Resolved-entry LRU size.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Page size of sorted index iteration.
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
    /// Default timeout for block fetches, in milliseconds.
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,
    /// Joins stop inserting once the log holds this many entries.
    #[serde(default)]
    pub max_length: Option<u64>,
    /// Verify every joined entry's signatures.
    #[serde(default)]
    pub verify_signatures: bool,
    /// Remote timestamps further ahead than this are logged as skewed.
    #[serde(default = "default_skew_threshold_ms")]
    pub skew_threshold_ms: u64,
    /// Applied after every append and join.
    #[serde(default)]
    pub trim: Option<TrimPolicy>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            fetch_size: default_fetch_size(),
            fetch_timeout_ms: None,
            max_length: None,
            verify_signatures: false,
            skew_threshold_ms: default_skew_threshold_ms(),
            trim: None,
        }
    }
}

impl LogConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML for this struct.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse log config")
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            cache_capacity: self.cache_capacity,
            fetch_size: self.fetch_size,
            fetch_timeout: self.fetch_timeout(),
        }
    }
}

/// Load a log config file, falling back to defaults when it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_log_config(path: &Path) -> Result<LogConfig> {
    if !path.exists() {
        return Ok(LogConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<LogConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_cache_capacity() -> usize {
    10
}

const fn default_fetch_size() -> usize {
    64
}

const fn default_skew_threshold_ms() -> u64 {
    DEFAULT_SKEW_THRESHOLD_MS
}
