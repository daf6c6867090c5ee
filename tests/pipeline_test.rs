//! End-to-end crawl cycle tests
//!
//! A single mock server plays both the mbasic pages and the batch endpoint;
//! events land in a SQLite store on a temporary file.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{event_body, events_page, graph_time_in, italian_places, stored_event, test_config};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::BatchResponder;
use sciabaca::config::{Config, FileConfigProvider, StaticConfigProvider};
use sciabaca::crawler::{MbasicScraper, PageFetcher};
use sciabaca::graph::{BatchRequest, GraphClient};
use sciabaca::models::SourceRef;
use sciabaca::orchestrator::{
    ApiBinding, CrawlOrchestrator, CycleOutcome, PlaceBinding, ScraperBinding, SkipReason,
};
use sciabaca::storage::{EventStore, SharedEventStore, SqliteEventStore};
use sciabaca::utils::retry::RetryConfig;

struct Harness {
    server: MockServer,
    dir: TempDir,
    store: SharedEventStore,
    config: Config,
}

impl Harness {
    async fn new(sources: Vec<SourceRef>) -> Self {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("events.db");
        let store: SharedEventStore = Arc::new(SqliteEventStore::open(&db_path).unwrap());
        let config = test_config(&server.uri(), &db_path, sources);
        Self {
            server,
            dir,
            store,
            config,
        }
    }

    async fn page(&self, page: &str, ids: &[&str]) {
        Mock::given(method("GET"))
            .and(path(format!("/{page}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(events_page(ids)))
            .mount(&self.server)
            .await;
    }

    async fn batch(&self, replies: HashMap<String, Value>) -> BatchResponder {
        let responder = BatchResponder::new(replies);
        Mock::given(method("POST"))
            .and(path("/"))
            .respond_with(responder.clone())
            .mount(&self.server)
            .await;
        responder
    }

    fn orchestrator(&self) -> CrawlOrchestrator {
        let fetcher =
            PageFetcher::with_config(100, RetryConfig::new(0), Duration::from_secs(5)).unwrap();
        let api = GraphClient::from_config(&self.config).unwrap();

        CrawlOrchestrator::new(
            Arc::new(StaticConfigProvider::new(self.config.clone())),
            ScraperBinding::Shared(Arc::new(MbasicScraper::new(fetcher, self.server.uri()))),
            ApiBinding::Shared(Arc::new(api)),
            Arc::clone(&self.store),
            PlaceBinding::Shared(italian_places()),
        )
    }
}

fn detail(id: &str) -> String {
    BatchRequest::event(id).relative_url
}

async fn completed(orchestrator: &CrawlOrchestrator) -> sciabaca::models::CycleReport {
    match orchestrator.trigger().await.unwrap() {
        CycleOutcome::Completed(report) => report,
        other => panic!("cycle did not complete: {other:?}"),
    }
}

/// Test a scraped id is resolved, tagged and stored
#[tokio::test]
async fn test_page_event_stored_with_nearest_place() {
    let h = Harness::new(vec![SourceRef::page("pageA")]).await;
    h.page("pageA", &["111"]).await;
    h.batch(HashMap::from([(
        detail("111"),
        event_body("111", "Concerto al Colosseo", 48, 41.89, 12.49),
    )]))
    .await;

    let report = completed(&h.orchestrator()).await;

    assert_eq!(report.candidate_ids, 1);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.inserted, 1);

    let event = h.store.get("111").unwrap().expect("event stored");
    assert_eq!(event.name, "Concerto al Colosseo");
    assert_eq!(event.nearest_place.as_deref(), Some("Roma"));
    assert_eq!(event.url, "https://www.facebook.com/events/111");
    assert_eq!(event.source_site, "facebook");
}

/// Test a recurring event is stored as one row per instance
#[tokio::test]
async fn test_recurring_event_expanded() {
    let h = Harness::new(vec![SourceRef::page("pageA")]).await;
    h.page("pageA", &["900"]).await;

    let mut parent = event_body("900", "Mercatino", 24, 45.46, 9.19);
    parent["event_times"] = json!([
        {"id": "901", "start_time": graph_time_in(24), "end_time": graph_time_in(27)},
        {"id": "902", "start_time": graph_time_in(48), "end_time": graph_time_in(51)},
        {"id": "903", "start_time": graph_time_in(72)}
    ]);
    h.batch(HashMap::from([(detail("900"), parent)])).await;

    let report = completed(&h.orchestrator()).await;
    assert_eq!(report.events, 3);

    assert!(h.store.get("900").unwrap().is_none(), "parent is not stored");
    for id in ["901", "902", "903"] {
        let event = h.store.get(id).unwrap().expect("instance stored");
        assert_eq!(event.name, "Mercatino");
        assert_eq!(event.nearest_place.as_deref(), Some("Milano"));
        assert_eq!(event.url, format!("https://www.facebook.com/events/{id}"));
    }
}

/// Test ids advertised by pages and groups are resolved once
#[tokio::test]
async fn test_page_and_group_ids_merged() {
    let h = Harness::new(vec![SourceRef::page("pageA"), SourceRef::group("77")]).await;
    h.page("pageA", &["111", "222"]).await;
    let responder = h
        .batch(HashMap::from([
            (
                BatchRequest::group_feed("77").relative_url,
                json!({"data": [
                    {"type": "event", "link": "https://www.facebook.com/events/222/"},
                    {"type": "event", "link": "https://m.facebook.com/events/333"}
                ]}),
            ),
            (detail("111"), event_body("111", "Uno", 5, 40.85, 14.26)),
            (detail("222"), event_body("222", "Due", 6, 40.85, 14.26)),
            (detail("333"), event_body("333", "Tre", 7, 40.85, 14.26)),
        ]))
        .await;

    let report = completed(&h.orchestrator()).await;

    assert_eq!(report.candidate_ids, 3);
    assert_eq!(report.inserted, 3);
    // group feed, then one detail batch of three ids
    assert_eq!(responder.batch_sizes(), vec![1, 3]);
    assert_eq!(h.store.count().unwrap(), 3);
}

/// Test rerunning against unchanged sources leaves the same rows
#[tokio::test]
async fn test_cycle_idempotent() {
    let h = Harness::new(vec![SourceRef::page("pageA")]).await;
    h.page("pageA", &["111", "222"]).await;
    h.batch(HashMap::from([
        (detail("111"), event_body("111", "Uno", 5, 41.9, 12.5)),
        (detail("222"), event_body("222", "Due", 6, 41.9, 12.5)),
    ]))
    .await;

    let orchestrator = h.orchestrator();
    completed(&orchestrator).await;
    let mut first: Vec<_> = h.store.all().unwrap().into_iter().map(|e| e.id).collect();

    let report = completed(&orchestrator).await;
    let mut second: Vec<_> = h.store.all().unwrap().into_iter().map(|e| e.id).collect();

    first.sort();
    second.sort();
    assert_eq!(first, second);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.inserted, 2);
}

/// Test events no longer advertised are removed while past rows and other
/// sources stay
#[tokio::test]
async fn test_stale_upcoming_rows_replaced() {
    let h = Harness::new(vec![SourceRef::page("pageA")]).await;
    let now = Utc::now();
    h.store
        .replace(
            &sciabaca::reconcile::Reconciler::default().scope("facebook", &[], now),
            &[
                stored_event("cancelled", "facebook", now + ChronoDuration::hours(10)),
                stored_event("history", "facebook", now - ChronoDuration::days(30)),
                stored_event("meetup-1", "meetup", now + ChronoDuration::hours(10)),
            ],
        )
        .unwrap();

    h.page("pageA", &["111"]).await;
    h.batch(HashMap::from([(
        detail("111"),
        event_body("111", "Uno", 5, 41.9, 12.5),
    )]))
    .await;

    completed(&h.orchestrator()).await;

    assert!(h.store.get("cancelled").unwrap().is_none());
    assert!(h.store.get("history").unwrap().is_some());
    assert!(h.store.get("meetup-1").unwrap().is_some());
    assert!(h.store.get("111").unwrap().is_some());
}

/// Test a failed batch call leaves the store untouched
#[tokio::test]
async fn test_batch_failure_aborts_cycle() {
    let h = Harness::new(vec![SourceRef::page("pageA")]).await;
    let now = Utc::now();
    h.store
        .replace(
            &sciabaca::reconcile::Reconciler::default().scope("facebook", &[], now),
            &[stored_event("kept", "facebook", now + ChronoDuration::hours(10))],
        )
        .unwrap();

    h.page("pageA", &["111"]).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Invalid OAuth access token.", "type": "OAuthException", "code": 190}
        })))
        .mount(&h.server)
        .await;

    let result = h.orchestrator().trigger().await;

    assert!(result.is_err());
    assert!(h.store.get("kept").unwrap().is_some());
    assert_eq!(h.store.count().unwrap(), 1);
}

/// Test a cycle without a token does nothing
#[tokio::test]
async fn test_missing_token_skips_cycle() {
    let mut h = Harness::new(vec![SourceRef::page("pageA")]).await;
    h.config.graph.access_token = None;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let outcome = h.orchestrator().trigger().await.unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::Skipped(SkipReason::MissingCredentials)
    ));
    assert_eq!(h.store.count().unwrap(), 0);
}

/// Test unresolvable ids are reported and skipped
#[tokio::test]
async fn test_unresolved_ids_skipped() {
    let h = Harness::new(vec![SourceRef::page("pageA")]).await;
    h.page("pageA", &["111", "404"]).await;
    h.batch(HashMap::from([(
        detail("111"),
        event_body("111", "Uno", 5, 41.9, 12.5),
    )]))
    .await;

    let report = completed(&h.orchestrator()).await;

    assert_eq!(report.resolved, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.store.count().unwrap(), 1);
}

/// Test events listed by a page are stored without a second lookup
#[tokio::test]
async fn test_page_listing_used() {
    let mut h = Harness::new(vec![SourceRef::page("pageA")]).await;
    h.config.graph.use_page_listing = true;
    h.page("pageA", &["111"]).await;
    let responder = h
        .batch(HashMap::from([(
            BatchRequest::page_events("pageA").relative_url,
            json!({"data": [event_body("111", "Uno", 5, 40.85, 14.26)]}),
        )]))
        .await;

    let report = completed(&h.orchestrator()).await;

    assert_eq!(report.listed_events, 1);
    assert_eq!(report.resolved, 0);
    // only the listing batch; 111 was already listed
    assert_eq!(responder.batch_sizes(), vec![1]);
    assert_eq!(
        h.store.get("111").unwrap().and_then(|e| e.nearest_place),
        Some("Napoli".to_string())
    );
}

/// Test edits to the configuration file reach the scraper and the places of
/// the next cycle
#[tokio::test]
async fn test_config_file_changes_apply_next_cycle() {
    let h = Harness::new(vec![SourceRef::page("pageA")]).await;
    h.page("pageA", &["111"]).await;
    h.batch(HashMap::from([
        (detail("111"), event_body("111", "Uno", 5, 45.46, 9.19)),
        (detail("222"), event_body("222", "Due", 6, 45.46, 9.19)),
    ]))
    .await;

    let mirror = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pageA"))
        .respond_with(ResponseTemplate::new(200).set_body_string(events_page(&["222"])))
        .mount(&mirror)
        .await;

    let only_rome = h.dir.path().join("rome.json");
    std::fs::write(&only_rome, r#"[["Roma", "RM", 41.9028, 12.4964]]"#).unwrap();
    let north_and_south = h.dir.path().join("italy.json");
    std::fs::write(
        &north_and_south,
        r#"[["Roma", "RM", 41.9028, 12.4964], ["Milano", "MI", 45.4642, 9.19]]"#,
    )
    .unwrap();

    let config_path = h.dir.path().join("sciabaca.toml");
    let mut config = h.config.clone();
    config.geotag.places_path = Some(only_rome);
    std::fs::write(&config_path, toml::to_string(&config).unwrap()).unwrap();

    let orchestrator = CrawlOrchestrator::new(
        Arc::new(FileConfigProvider::new(&config_path)),
        ScraperBinding::PerCycle,
        ApiBinding::PerCycle,
        Arc::clone(&h.store),
        PlaceBinding::from_config(),
    );

    completed(&orchestrator).await;
    assert_eq!(
        h.store.get("111").unwrap().and_then(|e| e.nearest_place),
        Some("Roma".to_string())
    );

    config.crawler.scraper_base_url = mirror.uri();
    config.geotag.places_path = Some(north_and_south);
    std::fs::write(&config_path, toml::to_string(&config).unwrap()).unwrap();

    completed(&orchestrator).await;
    assert!(h.store.get("111").unwrap().is_none(), "no longer advertised");
    assert_eq!(
        h.store.get("222").unwrap().and_then(|e| e.nearest_place),
        Some("Milano".to_string())
    );
}
