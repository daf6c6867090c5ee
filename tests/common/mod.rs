//! Common test utilities

#![allow(dead_code)]

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use wiremock::{Request, Respond, ResponseTemplate};

use sciabaca::config::Config;
use sciabaca::geo::{Place, PlaceIndex};
use sciabaca::models::{CanonicalEvent, SourceRef};

/// Graph-style timestamp `hours` from now
pub fn graph_time_in(hours: i64) -> String {
    (Utc::now() + Duration::hours(hours)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Detail payload of one event near the given coordinates
pub fn event_body(id: &str, name: &str, start_in_hours: i64, lat: f64, lon: f64) -> Value {
    json!({
        "id": id,
        "name": name,
        "start_time": graph_time_in(start_in_hours),
        "end_time": graph_time_in(start_in_hours + 3),
        "place": {
            "name": format!("Venue {id}"),
            "location": {"latitude": lat, "longitude": lon}
        }
    })
}

/// Reference places used across tests
pub fn italian_places() -> Arc<PlaceIndex> {
    Arc::new(PlaceIndex::new(vec![
        Place::new("Roma", 41.9028, 12.4964),
        Place::new("Milano", 45.4642, 9.1900),
        Place::new("Napoli", 40.8518, 14.2681),
    ]))
}

/// Configuration pointed at a mock server
pub fn test_config(server_uri: &str, db_path: &Path, sources: Vec<SourceRef>) -> Config {
    let mut config = Config::default();
    config.graph.base_url = server_uri.to_string();
    config.graph.access_token = Some("test-token".to_string());
    config.graph.use_page_listing = false;
    config.crawler.scraper_base_url = server_uri.to_string();
    config.crawler.rate_limit = 100.0;
    config.crawler.max_retries = 0;
    config.crawler.request_timeout_secs = 5;
    config.database.sqlite_path = db_path.to_path_buf();
    config.sources = sources;
    config
}

/// mbasic events page linking to the given event ids
pub fn events_page(ids: &[&str]) -> String {
    let links: String = ids
        .iter()
        .map(|id| format!(r#"<a href="/events/{id}?acontext=%7B%7D">Event {id}</a>"#))
        .collect();
    format!(
        r#"<!DOCTYPE html><html><body><div id="root">{links}<a href="/home.php">Home</a></div></body></html>"#
    )
}

/// Stored event with default fields
pub fn stored_event(id: &str, site: &str, start: DateTime<Utc>) -> CanonicalEvent {
    CanonicalEvent {
        id: id.to_string(),
        name: format!("Stored {id}"),
        description: None,
        start_time: start,
        end_time: None,
        updated_time: None,
        place: None,
        nearest_place: None,
        parent_group: None,
        owner: None,
        source_site: site.to_string(),
        url: format!("https://www.facebook.com/events/{id}"),
        crawl_time: start,
    }
}

/// Mock batch endpoint: decodes the form-encoded `batch` field and answers
/// each entry from a table keyed by relative URL. Unknown entries get `null`.
#[derive(Clone, Default)]
pub struct BatchResponder {
    replies: Arc<HashMap<String, Value>>,
    /// Size of every batch received, in arrival order
    pub batches: Arc<Mutex<Vec<usize>>>,
}

impl BatchResponder {
    pub fn new(replies: HashMap<String, Value>) -> Self {
        Self {
            replies: Arc::new(replies),
            batches: Arc::default(),
        }
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

impl Respond for BatchResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let batch = url::form_urlencoded::parse(&request.body)
            .find(|(key, _)| key == "batch")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        let entries: Vec<Value> = serde_json::from_str(&batch).unwrap_or_default();
        self.batches.lock().unwrap().push(entries.len());

        let replies: Vec<Value> = entries
            .iter()
            .map(|entry| {
                let url = entry["relative_url"].as_str().unwrap_or_default();
                match self.replies.get(url) {
                    Some(body) => json!({"code": 200, "body": body.to_string()}),
                    None => Value::Null,
                }
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(replies)
    }
}
