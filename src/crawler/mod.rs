//! Event id discovery over source pages
//!
//! This module implements the scraping half of the crawl: fetching source
//! pages with rate limiting and retry, and recognizing event links in them.

pub mod discovery;
pub mod fetcher;
pub mod scraper;
pub mod url;

pub use discovery::Discovery;
pub use fetcher::PageFetcher;
pub use scraper::{MbasicScraper, PageScraper};
