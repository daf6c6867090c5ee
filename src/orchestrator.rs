//! Crawl orchestrator
//!
//! Sequences discovery, resolution, normalization and reconciliation into one
//! crawl cycle, runs a cycle at startup and then on a fixed interval, and
//! never lets a failing cycle take the process down.
//!
//! ```text
//! Idle ─▶ Discovering ─▶ Resolving ─▶ Normalizing ─▶ Reconciling ─▶ Idle
//!             │               │                            │
//!             └─ per-source   └─ batch failure ────────────┴─ store failure
//!                failures          abort the cycle, store unchanged
//!                absorbed
//! ```

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, ConfigProvider};
use crate::crawler::{Discovery, MbasicScraper, PageScraper};
use crate::error::{Error, Result};
use crate::geo::PlaceIndex;
use crate::graph::{BatchApi, BatchResolver, GraphClient};
use crate::metrics;
use crate::models::{CandidateId, CycleReport};
use crate::normalize::Normalizer;
use crate::reconcile::Reconciler;
use crate::storage::SharedEventStore;

/// Current stage of the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    Idle,
    Discovering,
    Resolving,
    Normalizing,
    Reconciling,
}

impl CrawlPhase {
    pub fn as_index(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Discovering => 1,
            Self::Resolving => 2,
            Self::Normalizing => 3,
            Self::Reconciling => 4,
        }
    }

    fn from_index(index: u8) -> Self {
        match index {
            1 => Self::Discovering,
            2 => Self::Resolving,
            3 => Self::Normalizing,
            4 => Self::Reconciling,
            _ => Self::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Resolving => "resolving",
            Self::Normalizing => "normalizing",
            Self::Reconciling => "reconciling",
        }
    }
}

impl std::fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a trigger did not run a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle was still active
    AlreadyRunning,
    /// No API access token configured
    MissingCredentials,
}

/// Result of one trigger
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped(SkipReason),
}

/// Where the batch API client of a cycle comes from
pub enum ApiBinding {
    /// The same client for every cycle
    Shared(Arc<dyn BatchApi>),
    /// A [`GraphClient`] built from each cycle's snapshot, so a new token
    /// applies from the next cycle on
    PerCycle,
}

impl ApiBinding {
    fn client(&self, config: &Config) -> Result<Arc<dyn BatchApi>> {
        match self {
            Self::Shared(api) => Ok(Arc::clone(api)),
            Self::PerCycle => Ok(Arc::new(GraphClient::from_config(config)?)),
        }
    }
}

/// Where the page scraper of a cycle comes from
pub enum ScraperBinding {
    /// The same scraper for every cycle
    Shared(Arc<dyn PageScraper>),
    /// An [`MbasicScraper`] built from each cycle's snapshot, so new crawler
    /// limits and base URL apply from the next cycle on
    PerCycle,
}

impl ScraperBinding {
    fn scraper(&self, config: &Config) -> Result<Arc<dyn PageScraper>> {
        match self {
            Self::Shared(scraper) => Ok(Arc::clone(scraper)),
            Self::PerCycle => Ok(Arc::new(MbasicScraper::from_config(config)?)),
        }
    }
}

/// Where the reference places of a cycle come from
pub enum PlaceBinding {
    /// The same index for every cycle
    Shared(Arc<PlaceIndex>),
    /// Read from `geotag.places_path`; the file is read again only when the
    /// configured path changes
    FromConfig(Mutex<Option<(PathBuf, Arc<PlaceIndex>)>>),
}

impl PlaceBinding {
    pub fn from_config() -> Self {
        Self::FromConfig(Mutex::new(None))
    }

    fn places(&self, config: &Config) -> Result<Arc<PlaceIndex>> {
        let cache = match self {
            Self::Shared(places) => return Ok(Arc::clone(places)),
            Self::FromConfig(cache) => cache,
        };

        if !config.geotag.enabled {
            return Ok(Arc::new(PlaceIndex::default()));
        }
        let Some(path) = &config.geotag.places_path else {
            tracing::warn!("geotag.places_path not set, events will not be tagged");
            return Ok(Arc::new(PlaceIndex::default()));
        };

        let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((cached_path, places)) = cache.as_ref() {
            if cached_path == path {
                return Ok(Arc::clone(places));
            }
        }

        let places = PlaceIndex::load(path).map_err(|e| Error::config(format!("{e:#}")))?;
        let places = Arc::new(places);
        *cache = Some((path.clone(), Arc::clone(&places)));
        Ok(places)
    }
}

/// Clears the running flag and the phase when a cycle ends, however it ends
struct CycleGuard<'a> {
    orchestrator: &'a CrawlOrchestrator,
}

impl<'a> CycleGuard<'a> {
    fn acquire(orchestrator: &'a CrawlOrchestrator) -> Option<Self> {
        orchestrator
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { orchestrator })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.set_phase(CrawlPhase::Idle);
        self.orchestrator.running.store(false, Ordering::Release);
    }
}

/// Runs crawl cycles against a set of collaborators
pub struct CrawlOrchestrator {
    config: Arc<dyn ConfigProvider>,
    scraper: ScraperBinding,
    api: ApiBinding,
    store: SharedEventStore,
    places: PlaceBinding,

    running: AtomicBool,
    phase: AtomicU8,

    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CrawlOrchestrator {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        scraper: ScraperBinding,
        api: ApiBinding,
        store: SharedEventStore,
        places: PlaceBinding,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            config,
            scraper,
            api,
            store,
            places,
            running: AtomicBool::new(false),
            phase: AtomicU8::new(CrawlPhase::Idle.as_index()),
            shutdown,
            shutdown_rx,
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        CrawlPhase::from_index(self.phase.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: CrawlPhase) {
        self.phase.store(phase.as_index(), Ordering::Release);
        metrics::set_phase(phase.as_index());
    }

    /// Run one cycle unless one is already active.
    ///
    /// A trigger arriving while a cycle runs is skipped, not queued. Errors
    /// are logged here and returned; the store is unchanged after a failed
    /// cycle.
    pub async fn trigger(&self) -> Result<CycleOutcome> {
        let Some(_guard) = CycleGuard::acquire(self) else {
            tracing::info!(phase = %self.phase(), "Crawl already running, skipping trigger");
            metrics::record_cycle("skipped");
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let config = match self.config.snapshot() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "Failed to load configuration, skipping cycle");
                metrics::record_cycle("failed");
                return Err(e.into());
            }
        };

        if !config.has_credentials() {
            tracing::warn!("No API access token configured, skipping cycle");
            metrics::record_cycle("skipped");
            return Ok(CycleOutcome::Skipped(SkipReason::MissingCredentials));
        }

        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("crawl_cycle", cycle_id = %cycle_id);

        let result = self
            .run_cycle(&config, cycle_id)
            .instrument(span.clone())
            .await;

        match result {
            Ok(report) => {
                metrics::record_cycle("completed");
                tracing::info!(
                    parent: &span,
                    sources = report.sources,
                    candidate_ids = report.candidate_ids,
                    listed_events = report.listed_events,
                    resolved = report.resolved,
                    failed = report.failed,
                    events = report.events,
                    deleted = report.deleted,
                    inserted = report.inserted,
                    duration_ms = report.duration.as_millis() as u64,
                    "Crawl cycle completed"
                );
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) => {
                metrics::record_cycle("failed");
                tracing::error!(parent: &span, error = %e, "Crawl cycle aborted, store left unchanged");
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, config: &Config, cycle_id: Uuid) -> Result<CycleReport> {
        let started = Instant::now();
        let _timer = metrics::start_cycle_timer();
        let crawl_time = Utc::now();

        let resolver = BatchResolver::new(self.api.client(config)?);
        let discovery = Discovery::new(
            self.scraper.scraper(config)?,
            config.crawler.max_concurrent_requests,
        );
        let places = self.places.places(config)?;
        let pages = config.pages();
        let groups = config.groups();

        tracing::info!(pages = pages.len(), groups = groups.len(), "Crawl cycle started");

        // Discovering: scrape pages, list page events and scan group feeds together
        self.set_phase(CrawlPhase::Discovering);
        let listing = async {
            if config.graph.use_page_listing {
                resolver.events_from_pages(&pages).await
            } else {
                Ok(Vec::new())
            }
        };
        let (scraped, listed, group_ids) = tokio::join!(
            discovery.discover(&pages),
            listing,
            resolver.event_ids_from_groups(&groups),
        );
        let listed = listed?;
        let group_ids = group_ids?;

        let mut candidates: HashSet<CandidateId> = scraped;
        candidates.extend(group_ids);
        metrics::record_candidates(candidates.len());

        let listed_ids: HashSet<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        let pending: Vec<CandidateId> = candidates
            .iter()
            .filter(|id| !listed_ids.contains(id.as_str()))
            .cloned()
            .collect();

        // Resolving
        self.set_phase(CrawlPhase::Resolving);
        let resolved = resolver.resolve(&pending).await?;
        metrics::record_resolution_failures(resolved.failed_count());

        // Normalizing
        self.set_phase(CrawlPhase::Normalizing);
        let normalizer = Normalizer::new(places, config.geotag.enabled);
        let site = config.reconcile.source_site.clone();
        let mut events = normalizer.normalize_all(&listed, crawl_time, &site);
        events.extend(normalizer.normalize_all(resolved.records(), crawl_time, &site));
        let event_count = events.len();

        // Reconciling
        self.set_phase(CrawlPhase::Reconciling);
        let reconciler = Reconciler::new(config.reconcile.window);
        let store = Arc::clone(&self.store);
        let outcome = tokio::task::spawn_blocking(move || {
            reconciler.reconcile(store.as_ref(), &site, events, crawl_time)
        })
        .await??;
        metrics::record_rows(outcome.deleted, outcome.inserted);

        Ok(CycleReport {
            cycle_id: cycle_id.to_string(),
            sources: pages.len() + groups.len(),
            candidate_ids: candidates.len(),
            listed_events: listed.len(),
            resolved: resolved.resolved_count(),
            failed: resolved.failed_count(),
            events: event_count,
            deleted: outcome.deleted,
            inserted: outcome.inserted,
            duration: started.elapsed(),
        })
    }

    /// Crawl now and then every `interval` until [`stop`](Self::stop) is
    /// called. Ticks that fall while a cycle is running are skipped.
    pub async fn run_forever(self: Arc<Self>, interval: Duration) {
        tracing::info!(interval_secs = interval.as_secs(), "Starting crawl loop");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut in_flight: Option<JoinHandle<()>> = None;

        // First tick completes immediately: the startup crawl
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // keep the handle of the cycle that is actually running
                    if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
                        tracing::info!(phase = %self.phase(), "Crawl already running, skipping tick");
                        metrics::record_cycle("skipped");
                        continue;
                    }
                    let orchestrator = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move {
                        // outcome already logged by trigger
                        let _ = orchestrator.trigger().await;
                    }));
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Crawl loop shutting down");
                    break;
                }
            }
        }

        if let Some(handle) = in_flight {
            if self.is_running() {
                tracing::info!(phase = %self.phase(), "Waiting for the running cycle to finish");
            }
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Crawl task failed");
            }
        }
    }

    /// Stop the crawl loop
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigProvider;
    use crate::geo::Place;
    use crate::graph::{BatchReply, BatchRequest};
    use crate::models::SourceRef;
    use crate::storage::{EventStore, MockEventStore};
    use crate::utils::error::{ApiError, FetchError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::sync::Notify;

    struct FakeScraper {
        ids: HashMap<String, Vec<&'static str>>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl PageScraper for FakeScraper {
        async fn fetch_advertised_ids(
            &self,
            source: &SourceRef,
        ) -> std::result::Result<HashSet<CandidateId>, FetchError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.ids
                .get(&source.id)
                .map(|ids| ids.iter().map(|s| s.to_string()).collect())
                .ok_or(FetchError::ServerError(404))
        }
    }

    struct FakeApi {
        replies: HashMap<String, String>,
        fail: bool,
    }

    #[async_trait]
    impl BatchApi for FakeApi {
        async fn batch_call(
            &self,
            requests: &[BatchRequest],
        ) -> std::result::Result<Vec<Option<BatchReply>>, ApiError> {
            if self.fail {
                return Err(ApiError::Api {
                    status: 500,
                    message: "down".into(),
                });
            }
            Ok(requests
                .iter()
                .map(|r| {
                    self.replies
                        .get(&r.relative_url)
                        .map(|body| BatchReply::new(200, body.clone()))
                })
                .collect())
        }
    }

    fn config(token: Option<&str>) -> Config {
        let mut config = Config::default();
        config.graph.access_token = token.map(String::from);
        config.graph.use_page_listing = false;
        config.sources = vec![SourceRef::page("pageA")];
        config
    }

    fn api(fail: bool) -> FakeApi {
        let body = json!({
            "id": "111",
            "name": "Concert",
            "start_time": "2099-05-01T21:00:00+0200",
            "place": {"name": "Teatro", "location": {"latitude": 41.9, "longitude": 12.5}}
        });
        FakeApi {
            replies: [(BatchRequest::event("111").relative_url, body.to_string())]
                .into_iter()
                .collect(),
            fail,
        }
    }

    fn orchestrator(
        config: Config,
        api: FakeApi,
        gate: Option<Arc<Notify>>,
        store: Arc<MockEventStore>,
    ) -> CrawlOrchestrator {
        let scraper = FakeScraper {
            ids: [("pageA".to_string(), vec!["111"])].into_iter().collect(),
            gate,
        };
        let places = PlaceIndex::new(vec![
            Place::new("Milano", 45.46, 9.19),
            Place::new("Roma", 41.9, 12.5),
        ]);
        CrawlOrchestrator::new(
            Arc::new(StaticConfigProvider::new(config)),
            ScraperBinding::Shared(Arc::new(scraper)),
            ApiBinding::Shared(Arc::new(api)),
            store,
            PlaceBinding::Shared(Arc::new(places)),
        )
    }

    #[tokio::test]
    async fn test_cycle_stores_tagged_event() {
        let store = Arc::new(MockEventStore::new());
        let orchestrator = orchestrator(config(Some("token")), api(false), None, store.clone());

        let outcome = orchestrator.trigger().await.unwrap();

        let CycleOutcome::Completed(report) = outcome else {
            panic!("cycle did not run");
        };
        assert_eq!(report.candidate_ids, 1);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(orchestrator.phase(), CrawlPhase::Idle);

        let event = store.get("111").unwrap().unwrap();
        assert_eq!(event.nearest_place.as_deref(), Some("Roma"));
        assert_eq!(event.url, "https://www.facebook.com/events/111");
    }

    #[tokio::test]
    async fn test_missing_credentials_skip() {
        let store = Arc::new(MockEventStore::new());
        let orchestrator = orchestrator(config(None), api(false), None, store.clone());

        let outcome = orchestrator.trigger().await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Skipped(SkipReason::MissingCredentials)
        ));
        assert!(store.is_empty());
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_batch_failure_leaves_store_unchanged() {
        let store = Arc::new(MockEventStore::new());
        let orchestrator = orchestrator(config(Some("token")), api(true), None, store.clone());

        assert!(orchestrator.trigger().await.is_err());
        assert!(store.is_empty());
        assert_eq!(orchestrator.phase(), CrawlPhase::Idle);
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_cycle() {
        let store = Arc::new(MockEventStore::new());
        store.set_fail_writes(true);
        let orchestrator = orchestrator(config(Some("token")), api(false), None, store.clone());

        assert!(orchestrator.trigger().await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_skipped() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MockEventStore::new());
        let orchestrator = Arc::new(orchestrator(
            config(Some("token")),
            api(false),
            Some(gate.clone()),
            store,
        ));

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.trigger().await })
        };

        while orchestrator.phase() != CrawlPhase::Discovering {
            tokio::task::yield_now().await;
        }

        let second = orchestrator.trigger().await.unwrap();
        assert!(matches!(
            second,
            CycleOutcome::Skipped(SkipReason::AlreadyRunning)
        ));

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, CycleOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_run_forever_crawls_at_startup_and_stops() {
        let store = Arc::new(MockEventStore::new());
        let orchestrator = Arc::new(orchestrator(
            config(Some("token")),
            api(false),
            None,
            store.clone(),
        ));

        let handle = tokio::spawn(Arc::clone(&orchestrator).run_forever(Duration::from_secs(3600)));

        for _ in 0..200 {
            if store.count().unwrap() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        orchestrator.stop();
        handle.await.unwrap();

        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_cycle() {
        let gate = Arc::new(Notify::new());
        let store = Arc::new(MockEventStore::new());
        let orchestrator = Arc::new(orchestrator(
            config(Some("token")),
            api(false),
            Some(gate.clone()),
            store.clone(),
        ));

        let handle = tokio::spawn(Arc::clone(&orchestrator).run_forever(Duration::from_millis(10)));

        while orchestrator.phase() != CrawlPhase::Discovering {
            tokio::task::yield_now().await;
        }
        // several ticks land on the blocked cycle
        tokio::time::sleep(Duration::from_millis(60)).await;
        orchestrator.stop();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        assert!(orchestrator.is_running());

        gate.notify_one();
        handle.await.unwrap();

        assert!(!orchestrator.is_running());
        assert_eq!(orchestrator.phase(), CrawlPhase::Idle);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_places_follow_configured_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("places.json");
        std::fs::write(&file, r#"[["Roma", "RM", 41.9, 12.5]]"#).unwrap();

        let binding = PlaceBinding::from_config();
        let mut config = Config::default();
        config.geotag.places_path = Some(file.clone());

        let first = binding.places(&config).unwrap();
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first, &binding.places(&config).unwrap()));

        config.geotag.enabled = false;
        assert!(binding.places(&config).unwrap().is_empty());

        config.geotag.enabled = true;
        config.geotag.places_path = Some(dir.path().join("missing.json"));
        assert!(matches!(binding.places(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_phase_index_round_trip() {
        for phase in [
            CrawlPhase::Idle,
            CrawlPhase::Discovering,
            CrawlPhase::Resolving,
            CrawlPhase::Normalizing,
            CrawlPhase::Reconciling,
        ] {
            assert_eq!(CrawlPhase::from_index(phase.as_index()), phase);
        }
    }
}
