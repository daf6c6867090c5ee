// Core data structures for the event crawler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::utils::error::ResolveFailure;
use crate::utils::graph_time;

/// External event identifier discovered on a source but not yet resolved
pub type CandidateId = String;

/// Kind of crawled source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Page,
    Group,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Group => "group",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page or group to crawl, as listed in configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub kind: SourceKind,
    /// Display name used in log output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SourceRef {
    pub fn page(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Page,
            name: None,
        }
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Group,
            name: None,
        }
    }

    /// Name for log lines: display name when set, otherwise the id
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Coordinates carried by a place
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Typed view over the parts of a raw `place` object we read.
///
/// The original JSON is kept verbatim in [`RawEventRecord::place`]; this view
/// only exists to pull out coordinates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceView {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
}

/// One dated occurrence of a recurring event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInstance {
    pub id: String,
    #[serde(with = "graph_time")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "graph_time::option")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Unprocessed event payload for one external identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(with = "graph_time")]
    pub start_time: DateTime<Utc>,
    #[serde(default, with = "graph_time::option")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, with = "graph_time::option")]
    pub updated_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub place: Option<Value>,
    #[serde(default)]
    pub parent_group: Option<Value>,
    #[serde(default)]
    pub owner: Option<Value>,
    /// Present when the record is a recurring-series parent
    #[serde(default, rename = "event_times", alias = "sub_instances")]
    pub sub_instances: Vec<RawInstance>,
}

impl RawEventRecord {
    /// Coordinates of the event place, when the place carries any
    pub fn location(&self) -> Option<Location> {
        let place = self.place.as_ref()?;
        serde_json::from_value::<PlaceView>(place.clone())
            .ok()
            .and_then(|view| view.location)
    }

    pub fn is_recurring(&self) -> bool {
        !self.sub_instances.is_empty()
    }
}

/// The persisted unit; `id` is the primary key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub updated_time: Option<DateTime<Utc>>,
    pub place: Option<Value>,
    /// Derived from `place.location`, never authoritative
    pub nearest_place: Option<String>,
    pub parent_group: Option<Value>,
    pub owner: Option<Value>,
    pub source_site: String,
    pub url: String,
    pub crawl_time: DateTime<Utc>,
}

impl CanonicalEvent {
    /// End of the event, or its start when the source gave no end
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }
}

/// Outcome of resolving one candidate id
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(RawEventRecord),
    Failed(ResolveFailure),
}

/// Tagged result of one resolution phase: every requested id maps to either
/// a record or a recorded failure.
#[derive(Debug, Clone, Default)]
pub struct ResolvedBatch {
    pub entries: HashMap<CandidateId, Resolution>,
}

impl ResolvedBatch {
    pub fn insert(&mut self, id: CandidateId, resolution: Resolution) {
        self.entries.insert(id, resolution);
    }

    pub fn get(&self, id: &str) -> Option<&Resolution> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.records().count()
    }

    pub fn failed_count(&self) -> usize {
        self.len() - self.resolved_count()
    }

    pub fn records(&self) -> impl Iterator<Item = &RawEventRecord> {
        self.entries.values().filter_map(|r| match r {
            Resolution::Resolved(record) => Some(record),
            Resolution::Failed(_) => None,
        })
    }

    pub fn into_records(self) -> Vec<RawEventRecord> {
        self.entries
            .into_values()
            .filter_map(|r| match r {
                Resolution::Resolved(record) => Some(record),
                Resolution::Failed(_) => None,
            })
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&CandidateId, &ResolveFailure)> {
        self.entries.iter().filter_map(|(id, r)| match r {
            Resolution::Failed(failure) => Some((id, failure)),
            Resolution::Resolved(_) => None,
        })
    }
}

/// Summary of one crawl cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub sources: usize,
    pub candidate_ids: usize,
    pub listed_events: usize,
    pub resolved: usize,
    pub failed: usize,
    pub events: usize,
    pub deleted: usize,
    pub inserted: usize,
    #[serde(skip)]
    pub duration: Duration,
}
