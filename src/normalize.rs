//! Raw record to canonical event conversion
//!
//! Expands recurring series into one row per occurrence, stamps provenance
//! (source site, crawl time, canonical URL) and tags each event with the
//! nearest reference place.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::geo::PlaceIndex;
use crate::models::{CanonicalEvent, RawEventRecord};
use crate::utils::truncate_text;

/// Public page of an event
pub fn canonical_url(id: &str) -> String {
    format!("https://www.facebook.com/events/{id}")
}

/// Stateless converter from [`RawEventRecord`] to [`CanonicalEvent`]s
#[derive(Debug, Clone)]
pub struct Normalizer {
    places: Arc<PlaceIndex>,
    geotag: bool,
}

impl Normalizer {
    pub fn new(places: Arc<PlaceIndex>, geotag: bool) -> Self {
        Self { places, geotag }
    }

    /// Normalizer that never sets `nearest_place`
    pub fn without_geotag() -> Self {
        Self::new(Arc::new(PlaceIndex::default()), false)
    }

    /// Convert one raw record.
    ///
    /// A plain record yields exactly one event. A recurring parent yields one
    /// event per sub-instance, each carrying the instance id and times and
    /// sharing every other field with the parent.
    pub fn normalize(
        &self,
        raw: &RawEventRecord,
        crawl_time: DateTime<Utc>,
        source_site: &str,
    ) -> Vec<CanonicalEvent> {
        let nearest_place = self.nearest_place(raw);

        let base = CanonicalEvent {
            id: raw.id.clone(),
            name: raw.name.clone(),
            description: raw.description.clone(),
            start_time: raw.start_time,
            end_time: raw.end_time,
            updated_time: raw.updated_time,
            place: raw.place.clone(),
            nearest_place,
            parent_group: raw.parent_group.clone(),
            owner: raw.owner.clone(),
            source_site: source_site.to_string(),
            url: canonical_url(&raw.id),
            crawl_time,
        };

        if !raw.is_recurring() {
            return vec![base];
        }

        tracing::debug!(
            event_id = %raw.id,
            instances = raw.sub_instances.len(),
            "Expanding recurring event"
        );

        raw.sub_instances
            .iter()
            .map(|instance| CanonicalEvent {
                id: instance.id.clone(),
                start_time: instance.start_time,
                end_time: instance.end_time,
                url: canonical_url(&instance.id),
                ..base.clone()
            })
            .collect()
    }

    /// Normalize a whole resolution phase
    pub fn normalize_all<'a>(
        &self,
        records: impl IntoIterator<Item = &'a RawEventRecord>,
        crawl_time: DateTime<Utc>,
        source_site: &str,
    ) -> Vec<CanonicalEvent> {
        records
            .into_iter()
            .flat_map(|raw| self.normalize(raw, crawl_time, source_site))
            .collect()
    }

    fn nearest_place(&self, raw: &RawEventRecord) -> Option<String> {
        let Some(location) = raw.location() else {
            tracing::warn!(
                event_id = %raw.id,
                name = %truncate_text(&raw.name, 60),
                has_place = raw.place.is_some(),
                "Event without place or location"
            );
            return None;
        };

        if !self.geotag {
            return None;
        }

        self.places.nearest(location).map(|p| p.name.clone())
    }
}
