//! Static reference list of named places and nearest-place lookup
//!
//! An index is read-only once loaded and is shared by the crawl cycles that
//! use the same places file. Distance is great-circle (haversine) distance in metres.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::Location;

/// Mean Earth radius in metres
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A named reference location
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Place {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }

    pub fn location(&self) -> Location {
        Location {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Accepted on-disk shapes for one place entry
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlaceEntry {
    /// `{"name": "Roma", "latitude": 41.9, "longitude": 12.5}`
    Object {
        name: String,
        latitude: f64,
        longitude: f64,
    },
    /// `["Roma", "RM", 41.9, 12.5]`
    Tuple(String, serde_json::Value, f64, f64),
}

impl From<PlaceEntry> for Place {
    fn from(entry: PlaceEntry) -> Self {
        match entry {
            PlaceEntry::Object {
                name,
                latitude,
                longitude,
            } => Place::new(name, latitude, longitude),
            PlaceEntry::Tuple(name, _, latitude, longitude) => {
                Place::new(name, latitude, longitude)
            }
        }
    }
}

/// Ordered list of reference places
#[derive(Debug, Clone, Default)]
pub struct PlaceIndex {
    places: Vec<Place>,
}

impl PlaceIndex {
    pub fn new(places: Vec<Place>) -> Self {
        Self { places }
    }

    /// Parse an index from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<PlaceEntry> =
            serde_json::from_str(json).context("Failed to parse place index JSON")?;
        Ok(Self::new(entries.into_iter().map(Place::from).collect()))
    }

    /// Load an index from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read place index: {}", path.display()))?;
        let index = Self::from_json(&content)
            .with_context(|| format!("Invalid place index: {}", path.display()))?;

        tracing::info!(path = %path.display(), places = index.len(), "Place index loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    /// Closest place to `location`.
    ///
    /// Strict less-than comparison: on equal distance the entry that comes
    /// first in index order wins. `None` only for an empty index.
    pub fn nearest(&self, location: Location) -> Option<&Place> {
        let mut best: Option<(&Place, f64)> = None;
        for place in &self.places {
            let distance = haversine_distance(location, place.location());
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((place, distance)),
            }
        }
        best.map(|(place, _)| place)
    }
}

/// Great-circle distance between two coordinates, in metres
pub fn haversine_distance(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
