//! sciabaca - Event crawler with nearest-place tagging
//!
//! Periodically discovers events advertised by a configured set of pages and
//! groups, resolves their details through the batched Graph API, tags each
//! one with the nearest reference place and reconciles the result against a
//! SQLite event store.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and per-cycle snapshots
//! - [`crawler`] - Page scraping and event id discovery
//! - [`graph`] - Batched Graph API client and detail resolver
//! - [`normalize`] - Raw record to canonical event conversion
//! - [`geo`] - Reference places and nearest-place lookup
//! - [`reconcile`] - Transactional replacement of upcoming events
//! - [`orchestrator`] - Crawl cycle sequencing and scheduling
//! - [`storage`] - Event store (SQLite, in-memory)
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sciabaca::config::{Config, StaticConfigProvider};
//! use sciabaca::orchestrator::{ApiBinding, CrawlOrchestrator, PlaceBinding, ScraperBinding};
//! use sciabaca::storage::SqliteEventStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let orchestrator = CrawlOrchestrator::new(
//!         Arc::new(StaticConfigProvider::new(config.clone())),
//!         ScraperBinding::PerCycle,
//!         ApiBinding::PerCycle,
//!         Arc::new(SqliteEventStore::open(&config.database.sqlite_path)?),
//!         PlaceBinding::from_config(),
//!     );
//!     orchestrator.trigger().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod error;
pub mod geo;
pub mod graph;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod reconcile;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigProvider, FileConfigProvider, StaticConfigProvider};
    pub use crate::crawler::{Discovery, MbasicScraper, PageScraper};
    pub use crate::error::{Error, ErrorCategory, Result, SciabacaErrorTrait};
    pub use crate::geo::{Place, PlaceIndex};
    pub use crate::graph::{BatchApi, BatchReply, BatchRequest, BatchResolver, GraphClient};
    pub use crate::models::{CanonicalEvent, CycleReport, RawEventRecord, SourceRef};
    pub use crate::normalize::Normalizer;
    pub use crate::orchestrator::{
        ApiBinding, CrawlOrchestrator, CrawlPhase, CycleOutcome, PlaceBinding, ScraperBinding,
    };
    pub use crate::reconcile::Reconciler;
    pub use crate::storage::{EventStore, MockEventStore, SharedEventStore, SqliteEventStore};
}

// Direct re-exports for convenience
pub use models::{CanonicalEvent, RawEventRecord, SourceRef};
