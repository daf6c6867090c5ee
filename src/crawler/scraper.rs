//! Event id scraping from source pages
//!
//! The lightweight mobile site lists a page's upcoming events as plain
//! anchors, so scraping is a matter of collecting every `a[href]` and keeping
//! the ones that point at an event.

use async_trait::async_trait;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use std::collections::HashSet;

use super::fetcher::PageFetcher;
use super::url::{events_page_url, extract_event_ids};
use crate::config::Config;
use crate::models::{CandidateId, SourceRef};
use crate::utils::error::FetchError;
use crate::utils::retry::RetryConfig;

lazy_static! {
    static ref LINKS: Selector = Selector::parse("a[href]").expect("Invalid CSS selector: a[href]");
}

/// Page-scraping collaborator
#[async_trait]
pub trait PageScraper: Send + Sync {
    /// Ids of the events a source page currently advertises
    async fn fetch_advertised_ids(
        &self,
        source: &SourceRef,
    ) -> Result<HashSet<CandidateId>, FetchError>;
}

/// Scraper for `https://mbasic.facebook.com/{page}?v=events`
pub struct MbasicScraper {
    fetcher: PageFetcher,
    base_url: String,
}

impl MbasicScraper {
    pub fn new(fetcher: PageFetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    /// Build a scraper from a configuration snapshot
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let fetcher = PageFetcher::with_config(
            config.crawler.rate_limit.ceil().max(1.0) as u32,
            RetryConfig::new(config.crawler.max_retries),
            config.request_timeout(),
        )?;
        Ok(Self::new(fetcher, config.crawler.scraper_base_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PageScraper for MbasicScraper {
    async fn fetch_advertised_ids(
        &self,
        source: &SourceRef,
    ) -> Result<HashSet<CandidateId>, FetchError> {
        let url = events_page_url(&self.base_url, &source.id)?;
        let body = self.fetcher.fetch(&url).await?;
        let ids = parse_event_ids(&body)?;

        tracing::debug!(source = %source.label(), ids = ids.len(), "Page scraped");
        Ok(ids)
    }
}

/// Event ids linked from an HTML document.
///
/// # Errors
///
/// Returns `FetchError::UnexpectedMarkup` when the document has no links at
/// all, which is what a login wall or an error page looks like.
pub fn parse_event_ids(html: &str) -> Result<HashSet<CandidateId>, FetchError> {
    let document = Html::parse_document(html);

    let hrefs: Vec<&str> = document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href"))
        .collect();

    if hrefs.is_empty() {
        return Err(FetchError::UnexpectedMarkup("no links on page".to_string()));
    }

    Ok(extract_event_ids(hrefs))
}
