//! Event link recognition and source page URLs
//!
//! Event pages are linked in two shapes: relative links on the lightweight
//! mobile site (`/events/123?acontext=...`) and absolute links shared in
//! posts (`https://www.facebook.com/events/123/`). Both map to the numeric id.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

use crate::models::CandidateId;
use crate::utils::error::FetchError;

lazy_static! {
    /// Path of an event page; the id is the first path segment after `/events/`
    static ref EVENT_PATH: Regex =
        Regex::new(r"^/events/(\d+)").expect("Invalid event path pattern");
}

/// Host suffix of absolute event links
const EVENT_HOST: &str = "facebook.com";

/// Extract the event id from a link, relative or absolute.
///
/// # Examples
///
/// ```
/// use sciabaca::crawler::url::event_id_from_link;
///
/// assert_eq!(event_id_from_link("/events/111?ref=page").as_deref(), Some("111"));
/// assert_eq!(
///     event_id_from_link("https://www.facebook.com/events/222/").as_deref(),
///     Some("222")
/// );
/// assert_eq!(event_id_from_link("/pages/333"), None);
/// ```
pub fn event_id_from_link(link: &str) -> Option<CandidateId> {
    let link = link.trim();

    if link.starts_with('/') && !link.starts_with("//") {
        return id_from_path(link);
    }

    let parsed = Url::parse(link).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?;
    if host != EVENT_HOST && !host.ends_with(&format!(".{EVENT_HOST}")) {
        return None;
    }

    id_from_path(parsed.path())
}

fn id_from_path(path: &str) -> Option<CandidateId> {
    EVENT_PATH
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Distinct event ids among a page's links
pub fn extract_event_ids<'a>(links: impl IntoIterator<Item = &'a str>) -> HashSet<CandidateId> {
    links.into_iter().filter_map(event_id_from_link).collect()
}

/// Events tab of a page on the mobile site: `{base}/{page}?v=events`
///
/// # Errors
///
/// Returns `FetchError::InvalidUrl` if the base URL or page id does not form
/// a valid URL.
pub fn events_page_url(base: &str, page: &str) -> Result<String, FetchError> {
    if page.is_empty() || page.contains(['/', '?', '#']) {
        return Err(FetchError::InvalidUrl(format!("bad page id: {page:?}")));
    }

    let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))
        .map_err(|e| FetchError::InvalidUrl(format!("{base}: {e}")))?;

    let mut url = base
        .join(page)
        .map_err(|e| FetchError::InvalidUrl(format!("{page}: {e}")))?;
    url.query_pairs_mut().append_pair("v", "events");

    Ok(url.to_string())
}
