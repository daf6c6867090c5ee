//! Batch detail resolver
//!
//! Turns candidate ids and configured sources into raw event records. Every
//! lookup goes out as one logical batch call; a bad item is recorded and
//! logged without touching its siblings, while a failure of the whole call
//! is returned to the caller.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{BatchApi, BatchReply, BatchRequest};
use crate::crawler::url::event_id_from_link;
use crate::models::{CandidateId, RawEventRecord, Resolution, ResolvedBatch, SourceRef};
use crate::utils::error::{ApiError, ResolveFailure};
use crate::utils::truncate_text;

/// `{"data": [...]}` envelope of listing replies
#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: Option<Vec<T>>,
}

/// One post of a group feed
#[derive(Debug, Deserialize)]
struct FeedPost {
    #[serde(default)]
    link: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Resolves ids and sources through a [`BatchApi`]
#[derive(Clone)]
pub struct BatchResolver {
    api: Arc<dyn BatchApi>,
}

impl BatchResolver {
    pub fn new(api: Arc<dyn BatchApi>) -> Self {
        Self { api }
    }

    /// Fetch the detail record of every id.
    ///
    /// The result holds exactly one entry per distinct input id.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] of a batch call that failed as a whole.
    pub async fn resolve<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a CandidateId>,
    ) -> Result<ResolvedBatch, ApiError> {
        let mut ids: Vec<&CandidateId> = ids.into_iter().collect::<HashSet<_>>().into_iter().collect();
        ids.sort();

        let mut batch = ResolvedBatch::default();
        if ids.is_empty() {
            return Ok(batch);
        }

        let requests: Vec<BatchRequest> = ids.iter().map(|id| BatchRequest::event(id)).collect();
        let replies = self.api.batch_call(&requests).await?;
        ensure_reply_count(requests.len(), &replies)?;

        for (id, reply) in ids.into_iter().zip(replies) {
            let resolution = match parse_event_reply(reply) {
                Ok(record) => Resolution::Resolved(record),
                Err(failure) => {
                    tracing::error!(event_id = %id, reason = %failure, "Failed to resolve event");
                    Resolution::Failed(failure)
                }
            };
            batch.insert(id.clone(), resolution);
        }

        tracing::info!(
            resolved = batch.resolved_count(),
            failed = batch.failed_count(),
            "Event details resolved"
        );
        Ok(batch)
    }

    /// Events listed by each page through `/{page}/events`.
    ///
    /// A page reply without a `data` array is logged and skipped, as is any
    /// listed item that does not parse.
    pub async fn events_from_pages(
        &self,
        pages: &[SourceRef],
    ) -> Result<Vec<RawEventRecord>, ApiError> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<BatchRequest> = pages
            .iter()
            .map(|page| BatchRequest::page_events(&page.id))
            .collect();
        let replies = self.api.batch_call(&requests).await?;
        ensure_reply_count(requests.len(), &replies)?;

        let mut records: HashMap<String, RawEventRecord> = HashMap::new();
        for (page, reply) in pages.iter().zip(replies) {
            let Some(items) = listing_items::<Value>(page, reply, "events") else {
                continue;
            };

            for item in items {
                match serde_json::from_value::<RawEventRecord>(item) {
                    Ok(record) => {
                        records.entry(record.id.clone()).or_insert(record);
                    }
                    Err(e) => {
                        tracing::error!(source = %page.label(), error = %e, "Malformed listed event");
                    }
                }
            }
        }

        tracing::info!(pages = pages.len(), events = records.len(), "Page listings fetched");
        Ok(records.into_values().collect())
    }

    /// Event ids shared in each group's recent feed
    pub async fn event_ids_from_groups(
        &self,
        groups: &[SourceRef],
    ) -> Result<HashSet<CandidateId>, ApiError> {
        if groups.is_empty() {
            return Ok(HashSet::new());
        }

        let requests: Vec<BatchRequest> = groups
            .iter()
            .map(|group| BatchRequest::group_feed(&group.id))
            .collect();
        let replies = self.api.batch_call(&requests).await?;
        ensure_reply_count(requests.len(), &replies)?;

        let mut ids = HashSet::new();
        for (group, reply) in groups.iter().zip(replies) {
            let Some(posts) = listing_items::<FeedPost>(group, reply, "feed") else {
                continue;
            };

            let before = ids.len();
            ids.extend(
                posts
                    .into_iter()
                    .filter(|post| post.kind.as_deref() == Some("event"))
                    .filter_map(|post| post.link.as_deref().and_then(event_id_from_link)),
            );
            tracing::debug!(source = %group.label(), ids = ids.len() - before, "Group feed scanned");
        }

        Ok(ids)
    }
}

/// Reject a reply vector that does not line up with the requests sent
fn ensure_reply_count<T>(sent: usize, replies: &[T]) -> Result<(), ApiError> {
    if replies.len() != sent {
        return Err(ApiError::ReplyMismatch {
            sent,
            received: replies.len(),
        });
    }
    Ok(())
}

/// Decode one detail reply into a record
fn parse_event_reply(reply: Option<BatchReply>) -> Result<RawEventRecord, ResolveFailure> {
    let reply = reply.ok_or(ResolveFailure::NoReply)?;

    if !reply.ok() {
        return Err(ResolveFailure::Status {
            code: reply.code,
            body: truncate_text(&reply.body, 200),
        });
    }

    let value: Value = serde_json::from_str(&reply.body)
        .map_err(|e| ResolveFailure::Malformed(e.to_string()))?;

    if value.get("id").and_then(Value::as_str).is_none() {
        return Err(ResolveFailure::MissingId);
    }

    serde_json::from_value(value).map_err(|e| ResolveFailure::Malformed(e.to_string()))
}

/// Items of a `{"data": [...]}` reply, or `None` after logging why not
fn listing_items<T: for<'de> Deserialize<'de>>(
    source: &SourceRef,
    reply: Option<BatchReply>,
    what: &str,
) -> Option<Vec<T>> {
    let Some(reply) = reply else {
        tracing::warn!(source = %source.label(), what, "No reply for source listing");
        return None;
    };

    if !reply.ok() {
        tracing::warn!(
            source = %source.label(),
            what,
            code = reply.code,
            body = %truncate_text(&reply.body, 200),
            "Source listing failed"
        );
        return None;
    }

    match serde_json::from_str::<Listing<T>>(&reply.body) {
        Ok(Listing { data: Some(items) }) => Some(items),
        Ok(Listing { data: None }) => {
            tracing::warn!(source = %source.label(), what, "No {what} for source");
            None
        }
        Err(e) => {
            tracing::error!(source = %source.label(), what, error = %e, "Malformed source listing");
            None
        }
    }
}
