//! Typed configuration from environment variables and TOML.
//!
//! `Config` loads once at startup and fails fast if required vars are
//! missing. `BatchConfig` is the batching snapshot the coordinator runs
//! against; it can be replaced at runtime, and every replacement is
//! validated first.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub batch: BatchConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut batch = BatchConfig::default();
        if let Some(enabled) = optional_var::<bool>("TALLY_BATCHING_ENABLED")? {
            batch.batching_enabled = enabled;
        }
        if let Some(size) = optional_var::<usize>("TALLY_MAX_BATCH_SIZE")? {
            batch.max_batch_size = size;
        }
        if let Some(ms) = optional_var::<u64>("TALLY_FLUSH_INTERVAL_MS")? {
            batch.flush_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = optional_var::<u64>("TALLY_MAX_WAIT_MS")? {
            batch.max_wait = Duration::from_millis(ms);
        }
        batch.validate()?;

        Ok(Self {
            database_path: PathBuf::from(required_var("TALLY_DB_PATH")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            batch,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

/// Batching parameters shared by both categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// When false every submit flushes immediately (batch size 1).
    pub batching_enabled: bool,
    /// Flush as soon as this many events are pending in a category.
    pub max_batch_size: usize,
    /// Period of the scheduler tick.
    pub flush_interval: Duration,
    /// Flush a non-empty batch once its oldest event is this old.
    pub max_wait: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            max_batch_size: 10,
            flush_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(5),
        }
    }
}

/// On-disk shape: a `[batch]` table, every key optional.
#[derive(Debug, Default, Deserialize)]
struct BatchFile {
    #[serde(default)]
    batch: BatchTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchTable {
    batching_enabled: Option<bool>,
    max_batch_size: Option<usize>,
    flush_interval_ms: Option<u64>,
    max_wait_ms: Option<u64>,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be greater than 0".to_string()));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::Config("flush_interval must be greater than 0".to_string()));
        }
        if self.max_wait.is_zero() {
            return Err(Error::Config("max_wait must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Overlay a TOML `[batch]` table onto `self` and validate the result.
    pub fn merge_toml_str(self, content: &str) -> Result<Self> {
        let file: BatchFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad batch config: {e}")))?;
        let table = file.batch;

        let merged = Self {
            batching_enabled: table.batching_enabled.unwrap_or(self.batching_enabled),
            max_batch_size: table.max_batch_size.unwrap_or(self.max_batch_size),
            flush_interval: table
                .flush_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(self.flush_interval),
            max_wait: table
                .max_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(self.max_wait),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Parse a TOML `[batch]` table over the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::default().merge_toml_str(content)
    }

    /// Read a TOML file and overlay it onto `self`.
    pub fn merge_file(self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read batch config {}: {e}", path.display()))
        })?;
        self.merge_toml_str(&content)
    }
}
