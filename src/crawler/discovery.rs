//! Identifier discovery across sources
//!
//! Scrapes every source with bounded fan-out and merges the per-source id sets
//! by union. A source that fails is logged and contributes nothing; discovery
//! itself never fails.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use super::scraper::PageScraper;
use crate::metrics;
use crate::models::{CandidateId, SourceRef};

/// Concurrent scraping front end
#[derive(Clone)]
pub struct Discovery {
    scraper: Arc<dyn PageScraper>,
    max_concurrent: usize,
}

impl Discovery {
    pub fn new(scraper: Arc<dyn PageScraper>, max_concurrent: usize) -> Self {
        Self {
            scraper,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Union of the ids advertised by every source
    pub async fn discover(&self, sources: &[SourceRef]) -> HashSet<CandidateId> {
        let ids = stream::iter(sources.to_vec())
            .map(|source| {
                let scraper = Arc::clone(&self.scraper);
                async move {
                    let result = scraper.fetch_advertised_ids(&source).await;
                    (source, result)
                }
            })
            .buffer_unordered(self.max_concurrent)
            .fold(HashSet::new(), |mut ids, (source, result)| async move {
                match result {
                    Ok(found) => {
                        tracing::debug!(source = %source.label(), ids = found.len(), "Source discovered");
                        ids.extend(found);
                    }
                    Err(e) => {
                        tracing::warn!(
                            source = %source.label(),
                            kind = %source.kind,
                            error = %e,
                            "Source discovery failed"
                        );
                        metrics::record_source_failure(source.kind.as_str());
                    }
                }
                ids
            })
            .await;

        tracing::info!(sources = sources.len(), ids = ids.len(), "Discovery finished");
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::FetchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Advertised ids per source id; missing sources fail
    struct FakeScraper {
        pages: HashMap<String, Vec<&'static str>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeScraper {
        fn new(pages: &[(&str, Vec<&'static str>)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(id, ids)| (id.to_string(), ids.clone()))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageScraper for FakeScraper {
        async fn fetch_advertised_ids(
            &self,
            source: &SourceRef,
        ) -> Result<HashSet<CandidateId>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.pages
                .get(&source.id)
                .map(|ids| ids.iter().map(|s| s.to_string()).collect())
                .ok_or(FetchError::ServerError(404))
        }
    }

    #[tokio::test]
    async fn test_union_across_sources() {
        let scraper = FakeScraper::new(&[("A", vec!["1", "2"]), ("B", vec!["2", "3"])]);
        let discovery = Discovery::new(Arc::new(scraper), 4);

        let ids = discovery
            .discover(&[SourceRef::page("A"), SourceRef::page("B")])
            .await;

        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_failed_source_contributes_nothing() {
        let scraper = FakeScraper::new(&[("A", vec!["1"])]);
        let discovery = Discovery::new(Arc::new(scraper), 2);

        let ids = discovery
            .discover(&[SourceRef::page("A"), SourceRef::page("broken")])
            .await;

        assert_eq!(ids, ["1".to_string()].into_iter().collect());
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let pages: Vec<(String, Vec<&'static str>)> =
            (0..10).map(|i| (format!("p{i}"), vec!["x"])).collect();
        let pages: Vec<(&str, Vec<&'static str>)> =
            pages.iter().map(|(id, ids)| (id.as_str(), ids.clone())).collect();
        let scraper = Arc::new(FakeScraper::new(&pages));
        let discovery = Discovery::new(scraper.clone(), 3);

        let sources: Vec<SourceRef> = (0..10).map(|i| SourceRef::page(format!("p{i}"))).collect();
        let ids = discovery.discover(&sources).await;

        assert_eq!(ids.len(), 1);
        assert!(scraper.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_discovery_runs_on_spawned_task() {
        let scraper = FakeScraper::new(&[("A", vec!["1"]), ("B", vec!["2"])]);
        let discovery = Discovery::new(Arc::new(scraper), 2);
        let sources = vec![SourceRef::page("A"), SourceRef::page("B")];

        let ids = tokio::spawn(async move { discovery.discover(&sources).await })
            .await
            .unwrap();

        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_no_sources() {
        let discovery = Discovery::new(Arc::new(FakeScraper::new(&[])), 0);
        assert!(discovery.discover(&[]).await.is_empty());
    }
}
