//! Event persistence
//!
//! The store is reached only through the [`EventStore`] trait. The crawl uses
//! exactly one write operation, [`EventStore::replace`], which deletes every
//! row matching a [`DeleteScope`] and inserts the fresh rows inside a single
//! transaction. The remaining methods form the read path used by the CLI.

pub mod repository;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::models::CanonicalEvent;

pub use repository::{MockEventStore, SqliteEventStore};

/// Storage failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored timestamp in column {column}: {value}")]
    InvalidTime { column: &'static str, value: String },

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which timestamp decides whether a stored event is still "upcoming"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Event start
    StartTime,
    /// Event end, falling back to start when the source gave no end.
    /// A running event stays inside the replacement window.
    #[default]
    EndTime,
}

impl WindowPolicy {
    pub fn window_time(&self, event: &CanonicalEvent) -> DateTime<Utc> {
        match self {
            Self::StartTime => event.start_time,
            Self::EndTime => event.effective_end(),
        }
    }

    /// SQL expression evaluating to the window timestamp of a row
    pub(crate) fn sql_column(&self) -> &'static str {
        match self {
            Self::StartTime => "start_time",
            Self::EndTime => "COALESCE(end_time, start_time)",
        }
    }
}

/// Predicate selecting the rows a reconcile replaces.
///
/// A row matches when it belongs to `source_site` and its window time is
/// strictly after `after`, or when its id is listed in `ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteScope {
    pub source_site: String,
    pub after: DateTime<Utc>,
    pub window: WindowPolicy,
    pub ids: HashSet<String>,
}

impl DeleteScope {
    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        let in_window =
            event.source_site == self.source_site && self.window.window_time(event) > self.after;
        in_window || self.ids.contains(&event.id)
    }
}

/// Row counts of one applied replace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaceOutcome {
    pub deleted: usize,
    pub inserted: usize,
}

/// Number of upcoming events near one place
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceCount {
    pub nearest_place: Option<String>,
    pub events: usize,
}

/// Structured event store
pub trait EventStore: Send + Sync {
    /// Delete every row matching `scope` and insert `events`, atomically.
    ///
    /// `events` must not contain duplicate ids. On error nothing changes.
    fn replace(&self, scope: &DeleteScope, events: &[CanonicalEvent])
        -> StoreResult<ReplaceOutcome>;

    /// Events starting after `now`, ordered by start time, optionally
    /// restricted to a set of nearest places
    fn upcoming(
        &self,
        now: DateTime<Utc>,
        places: Option<&[String]>,
    ) -> StoreResult<Vec<CanonicalEvent>>;

    /// Upcoming event counts grouped by nearest place
    fn count_by_place(&self, now: DateTime<Utc>) -> StoreResult<Vec<PlaceCount>>;

    /// Single event by id
    fn get(&self, id: &str) -> StoreResult<Option<CanonicalEvent>>;

    /// Every stored event ordered by start time
    fn all(&self) -> StoreResult<Vec<CanonicalEvent>>;

    /// Total number of rows
    fn count(&self) -> StoreResult<usize>;
}

/// Thread-safe shared store handle
pub type SharedEventStore = Arc<dyn EventStore>;
