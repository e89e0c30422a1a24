//! Configuration module for CloudVault.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults. Credential material is out
//! of scope here; adapters receive it separately.

use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for CloudVault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub parallelism: ParallelismConfig,
    pub rate_limiting: RateLimitingConfig,
    pub materialization: MaterializationMode,
    pub url_cache: UrlCacheConfig,
    pub logging: LoggingConfig,
}

/// Fan-out bounds for the collection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelismConfig {
    /// Concurrent item fetches per streaming collection.
    pub item_fetch: usize,
    /// Buffered records on each collection's output channel.
    pub collection_buffer: usize,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            item_fetch: 4,
            collection_buffer: 16,
        }
    }
}

/// How added items are materialized into the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationMode {
    /// Fetch content at stream time.
    Eager,
    /// Defer content fetch until the storage consumer asks; items the
    /// deduplication layer already holds never touch the network.
    #[default]
    Lazy,
}

/// Window-based limiting strategy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterStrategyKind {
    /// Counter reset at fixed window boundaries.
    FixedWindow,
    /// Rolling window over individual request timestamps.
    #[default]
    SlidingWindow,
}

/// Remote API rate-limiting settings, per service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    pub strategy: LimiterStrategyKind,
    /// Window length in seconds.
    pub window_secs: u64,
    pub mail_requests_per_window: u32,
    pub drive_requests_per_window: u32,
    pub site_requests_per_window: u32,
    pub groups_requests_per_window: u32,
}

impl Default for RateLimitingConfig {
    /// Defaults derived from the provider's published throttling profile:
    /// mail endpoints throttle far earlier than drive content downloads.
    fn default() -> Self {
        Self {
            strategy: LimiterStrategyKind::SlidingWindow,
            window_secs: 60,
            mail_requests_per_window: 240,
            drive_requests_per_window: 600,
            site_requests_per_window: 300,
            groups_requests_per_window: 240,
        }
    }
}

/// Download-URL cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCacheConfig {
    /// Seconds after which a cached download URL is considered stale.
    pub staleness_secs: u64,
}

impl Default for UrlCacheConfig {
    fn default() -> Self {
        // Provider-issued URLs are valid for roughly an hour; refresh well
        // before that.
        Self { staleness_secs: 45 * 60 }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.parallelism.item_fetch == 0 {
            anyhow::bail!("parallelism.item_fetch must be at least 1");
        }
        if self.parallelism.collection_buffer == 0 {
            anyhow::bail!("parallelism.collection_buffer must be at least 1");
        }
        if self.rate_limiting.window_secs == 0 {
            anyhow::bail!("rate_limiting.window_secs must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.materialization, MaterializationMode::Lazy);
        assert_eq!(
            config.rate_limiting.strategy,
            LimiterStrategyKind::SlidingWindow
        );
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
parallelism:
  item_fetch: 8
  collection_buffer: 32
rate_limiting:
  strategy: fixed_window
  window_secs: 30
  mail_requests_per_window: 100
  drive_requests_per_window: 200
  site_requests_per_window: 100
  groups_requests_per_window: 100
materialization: eager
url_cache:
  staleness_secs: 600
logging:
  level: debug
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.parallelism.item_fetch, 8);
        assert_eq!(config.rate_limiting.strategy, LimiterStrategyKind::FixedWindow);
        assert_eq!(config.materialization, MaterializationMode::Eager);
        assert_eq!(config.url_cache.staleness_secs, 600);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let config = Config {
            parallelism: ParallelismConfig {
                item_fetch: 0,
                collection_buffer: 16,
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/cloudvault.yaml"));
        assert_eq!(config.parallelism.item_fetch, 4);
    }
}
