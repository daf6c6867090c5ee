//! Batched Graph API access
//!
//! [`BatchApi`] is the seam between the resolver and the network: one call
//! takes a list of relative GET requests and returns one reply slot per
//! request, index-aligned. [`GraphClient`] is the HTTP implementation and
//! [`BatchResolver`] turns replies into event records.

pub mod client;
pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::error::ApiError;

pub use client::GraphClient;
pub use resolver::BatchResolver;

/// Fields requested for every event
pub const EVENT_FIELDS: &str =
    "id,name,description,start_time,end_time,updated_time,place,parent_group,owner,event_times";

/// Posts fetched per group feed lookup
pub const GROUP_FEED_LIMIT: usize = 100;

/// One entry of a batch call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub method: String,
    pub relative_url: String,
}

impl BatchRequest {
    pub fn get(relative_url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            relative_url: relative_url.into(),
        }
    }

    /// Detail lookup of one event
    pub fn event(id: &str) -> Self {
        Self::get(format!("{id}?fields={EVENT_FIELDS}"))
    }

    /// Events listed by a page
    pub fn page_events(page: &str) -> Self {
        Self::get(format!("{page}/events?fields={EVENT_FIELDS}"))
    }

    /// Recent posts of a group
    pub fn group_feed(group: &str) -> Self {
        Self::get(format!("{group}/feed?limit={GROUP_FEED_LIMIT}&fields=link,type"))
    }
}

/// Reply to one batch entry; `body` is the JSON document as text
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchReply {
    pub code: u16,
    #[serde(default)]
    pub body: String,
}

impl BatchReply {
    pub fn new(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Batched API collaborator
///
/// The returned vector has exactly one slot per request; `None` marks an item
/// the API answered with `null`. An `Err` means the whole call failed.
#[async_trait]
pub trait BatchApi: Send + Sync {
    async fn batch_call(&self, requests: &[BatchRequest])
        -> Result<Vec<Option<BatchReply>>, ApiError>;
}
