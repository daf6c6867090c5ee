//! Configuration management for the event crawler
//!
//! This module handles loading and validating configuration from TOML files
//! and environment variables. Each crawl cycle takes a fresh snapshot through
//! a [`ConfigProvider`], so edits to the file apply from the next cycle on.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{SourceKind, SourceRef};
use crate::storage::WindowPolicy;

/// Graph API maximum number of requests in one batch call
pub const GRAPH_MAX_BATCH_SIZE: usize = 50;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Crawler configuration
    pub crawler: CrawlerConfig,

    /// Graph API configuration
    pub graph: GraphConfig,

    /// Nearest-place tagging
    pub geotag: GeotagConfig,

    /// Store replacement settings
    pub reconcile: ReconcileConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Pages and groups to crawl
    pub sources: Vec<SourceRef>,
}

/// Crawler-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Seconds between two crawl cycles
    pub interval_secs: u64,

    /// Maximum number of sources scraped at once
    pub max_concurrent_requests: usize,

    /// Rate limit (requests per second)
    pub rate_limit: f64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Retries for transient HTTP failures
    pub max_retries: u32,

    /// Root of the lightweight mobile site
    pub scraper_base_url: String,
}

/// Graph API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// API endpoint
    pub base_url: String,

    /// Access token; `FACEBOOK_API_TOKEN` overrides it
    pub access_token: Option<String>,

    /// Requests per batch call
    pub max_batch_size: usize,

    /// Also list events through `/{page}/events`
    pub use_page_listing: bool,
}

/// Nearest-place tagging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeotagConfig {
    pub enabled: bool,

    /// JSON reference list of places
    pub places_path: Option<PathBuf>,
}

/// Reconcile configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Provenance tag written on every row this crawler owns
    pub source_site: String,

    /// Timestamp deciding whether a stored row is still upcoming
    pub window: WindowPolicy,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2 * 60 * 60,
            max_concurrent_requests: 4,
            rate_limit: 2.0,
            request_timeout_secs: 30,
            max_retries: 3,
            scraper_base_url: String::from("https://mbasic.facebook.com"),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://graph.facebook.com"),
            access_token: None,
            max_batch_size: GRAPH_MAX_BATCH_SIZE,
            use_page_listing: true,
        }
    }
}

impl Default for GeotagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            places_path: None,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            source_site: String::from("facebook"),
            window: WindowPolicy::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/events.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Default configuration with environment variable overrides applied
    pub fn from_env() -> Result<Self> {
        let config = Self::default().with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise defaults, then apply
    /// environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = base.with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup("FACEBOOK_API_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.graph.access_token = Some(token);
        }

        if let Some(path) = lookup("SCIABACA_SQLITE_PATH") {
            self.database.sqlite_path = PathBuf::from(path);
        }

        if let Some(interval) = lookup("SCIABACA_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.crawler.interval_secs = interval;
        }

        if let Some(level) = lookup("SCIABACA_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("SCIABACA_LOG_FORMAT") {
            self.logging.format = format;
        }

        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.crawler.interval_secs == 0 {
            anyhow::bail!("interval_secs must be greater than 0");
        }

        if self.crawler.max_concurrent_requests == 0 {
            anyhow::bail!("max_concurrent_requests must be greater than 0");
        }

        if self.crawler.rate_limit <= 0.0 {
            anyhow::bail!("rate_limit must be positive");
        }

        if self.graph.max_batch_size == 0 || self.graph.max_batch_size > GRAPH_MAX_BATCH_SIZE {
            anyhow::bail!("max_batch_size must be between 1 and {GRAPH_MAX_BATCH_SIZE}");
        }

        if self.reconcile.source_site.trim().is_empty() {
            anyhow::bail!("source_site must not be empty");
        }

        if let Some(source) = self.sources.iter().find(|s| s.id.trim().is_empty()) {
            anyhow::bail!("source with empty id (kind {})", source.kind);
        }

        Ok(())
    }

    /// Whether an API credential is configured
    pub fn has_credentials(&self) -> bool {
        self.graph
            .access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Configured page sources
    pub fn pages(&self) -> Vec<SourceRef> {
        self.sources_of(SourceKind::Page)
    }

    /// Configured group sources
    pub fn groups(&self) -> Vec<SourceRef> {
        self.sources_of(SourceKind::Group)
    }

    fn sources_of(&self, kind: SourceKind) -> Vec<SourceRef> {
        self.sources
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect()
    }

    /// Get crawl interval as Duration
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.crawler.interval_secs)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Source of per-cycle configuration snapshots
pub trait ConfigProvider: Send + Sync {
    fn snapshot(&self) -> Result<Arc<Config>>;
}

/// Re-reads a TOML file on every snapshot
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigProvider {
    fn snapshot(&self) -> Result<Arc<Config>> {
        Config::load(Some(&self.path)).map(Arc::new)
    }
}

/// Hands out the same snapshot every time
pub struct StaticConfigProvider {
    config: Arc<Config>,
}

impl StaticConfigProvider {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn snapshot(&self) -> Result<Arc<Config>> {
        Ok(Arc::clone(&self.config))
    }
}
