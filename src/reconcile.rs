//! Store reconciliation
//!
//! Replaces this crawler's upcoming rows with the freshly processed events in
//! one store transaction. Rows of other sources and rows already outside the
//! window are left alone.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::models::CanonicalEvent;
use crate::storage::{DeleteScope, EventStore, StoreResult, WindowPolicy};

/// Row counts of one reconcile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub deleted: usize,
    pub inserted: usize,
}

/// Computes deletion scopes and applies them
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    window: WindowPolicy,
}

impl Reconciler {
    pub fn new(window: WindowPolicy) -> Self {
        Self { window }
    }

    pub fn window(&self) -> WindowPolicy {
        self.window
    }

    /// Rows to replace: upcoming rows of `source_site` plus any row whose id
    /// is about to be written
    pub fn scope(
        &self,
        source_site: &str,
        processed: &[CanonicalEvent],
        now: DateTime<Utc>,
    ) -> DeleteScope {
        DeleteScope {
            source_site: source_site.to_string(),
            after: now,
            window: self.window,
            ids: processed.iter().map(|e| e.id.clone()).collect(),
        }
    }

    /// Delete the scope and insert `processed`, atomically.
    ///
    /// An empty `processed` still clears the window. On error the store is
    /// unchanged.
    pub fn reconcile(
        &self,
        store: &dyn EventStore,
        source_site: &str,
        processed: Vec<CanonicalEvent>,
        now: DateTime<Utc>,
    ) -> StoreResult<ReconcileReport> {
        let received = processed.len();
        let processed = dedup_by_id(processed);
        if processed.len() < received {
            tracing::debug!(
                received,
                unique = processed.len(),
                "Dropped duplicate event ids before insert"
            );
        }

        let scope = self.scope(source_site, &processed, now);
        let outcome = store.replace(&scope, &processed)?;

        tracing::info!(
            source_site,
            deleted = outcome.deleted,
            inserted = outcome.inserted,
            "Event store reconciled"
        );

        Ok(ReconcileReport {
            deleted: outcome.deleted,
            inserted: outcome.inserted,
        })
    }
}

/// Keep one event per id: the latest `updated_time` wins, the earlier
/// position wins ties. Output keeps first-seen order.
pub fn dedup_by_id(events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(events.len());
    let mut unique: Vec<CanonicalEvent> = Vec::with_capacity(events.len());

    for event in events {
        match slots.entry(event.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(event);
            }
            Entry::Occupied(slot) => {
                let kept = &mut unique[*slot.get()];
                if event.updated_time > kept.updated_time {
                    *kept = event;
                }
            }
        }
    }

    unique
}
