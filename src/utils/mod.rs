//! Common utilities and helper functions
//!
//! Time parsing/formatting shared by the API models and the SQLite store.

pub mod error;
pub mod retry;

use chrono::{DateTime, SecondsFormat, Utc};

/// Graph API timestamp layout, e.g. `2017-05-20T21:00:00+0200`
const GRAPH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Parse a timestamp as emitted by the Graph API, falling back to RFC 3339
pub fn parse_graph_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, GRAPH_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Format a timestamp for storage.
///
/// Always UTC with a `Z` suffix and whole seconds so that stored values sort
/// lexicographically in time order.
pub fn format_db_time(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp written by [`format_db_time`]
pub fn parse_db_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Serde adapters for Graph API timestamps
pub mod graph_time {
    use super::{format_db_time, parse_graph_time};
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_db_time(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_graph_time(&raw).ok_or_else(|| D::Error::custom(format!("invalid time: {raw}")))
    }

    /// Optional variant; a missing or null field is `None`
    pub mod option {
        use super::super::{format_db_time, parse_graph_time};
        use chrono::{DateTime, Utc};
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => s.serialize_some(&format_db_time(v)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => parse_graph_time(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid time: {raw}"))),
                None => Ok(None),
            }
        }
    }
}

/// Truncate text to a maximum number of characters for log output
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
