//! Feed Parser: fetch an RSS/Atom/JSON feed and turn it into candidate items.

pub mod parser;

use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::fetcher::{FetchError, HttpFetcher};

pub use parser::{CandidateItem, MAX_ITEMS_PER_FEED, ParsedFeed, RawItem, parse_feed};

const ICON_SERVICE: &str = "https://icon.horse/icon";

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("parse failed: {0}")]
    Parse(String),
}

/// Fetch `url` and parse the response body as a feed.
#[instrument(skip(fetcher))]
pub async fn fetch_and_parse(fetcher: &HttpFetcher, url: &str) -> Result<ParsedFeed, FeedError> {
    let response = fetcher.fetch_feed(url).await?;
    let parsed = parse_feed(&response.body)?;

    debug!(
        items = parsed.items.len(),
        final_url = %response.url_final,
        "parsed feed"
    );

    Ok(parsed)
}

/// Favicon for a feed, keyed on the site's domain when the feed advertises
/// one, otherwise on the feed URL's own host.
pub fn icon_url_for(site_link: Option<&str>, feed_url: &str) -> Option<String> {
    let domain = site_link
        .and_then(domain_of)
        .or_else(|| domain_of(feed_url))?;
    Some(format!("{}/{}", ICON_SERVICE, domain))
}

/// Display title for a newly subscribed feed.
pub fn display_title(parsed: &ParsedFeed, feed_url: &str) -> String {
    parsed
        .title
        .clone()
        .or_else(|| parsed.site_link.as_deref().and_then(domain_of))
        .or_else(|| domain_of(feed_url))
        .unwrap_or_else(|| feed_url.to_string())
}

fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}
