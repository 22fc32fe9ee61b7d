//! Article Normalizer/Deduplicator.
//!
//! Maps resolved feed items onto upsert records and hands them to the store.
//! The canonical URL is the dedup key; the store's unique constraint on it is
//! what makes concurrent ingestion of the same story converge.

pub mod canonical;

use std::collections::HashSet;

use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::feed::CandidateItem;
use crate::store::{ArticleRef, FeedStore, NewArticle, StoreError};
use crate::text::{collapse_whitespace, plain_text, truncate_chars};

pub use canonical::canonical_url;

pub const MAX_TITLE_CHARS: usize = 255;
pub const MAX_EXCERPT_CHARS: usize = 500;
pub const DEFAULT_TITLE: &str = "Untitled";

/// Build upsert records for one feed. Items without a usable link are
/// dropped, as are repeats of a URL already seen earlier in the batch.
pub fn normalize(feed_id: Uuid, items: &[CandidateItem], base: Option<&Url>) -> Vec<NewArticle> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(items.len());

    for item in items {
        let Some(url) = item.link.as_deref().and_then(|link| canonical_url(link, base)) else {
            debug!(title = ?item.title, "dropping item without a resolvable link");
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }

        records.push(NewArticle {
            feed_id,
            title: normalize_title(item.title.as_deref()),
            url,
            image_url: item
                .image_url
                .as_deref()
                .and_then(|image| canonical_image(image, base)),
            content: item.content.clone(),
            excerpt: excerpt(item),
            author: item
                .author
                .as_deref()
                .map(collapse_whitespace)
                .filter(|a| !a.is_empty()),
            published_at: item.published_at,
        });
    }

    records
}

pub fn normalize_title(title: Option<&str>) -> String {
    let title = title.map(collapse_whitespace).unwrap_or_default();
    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    truncate_chars(&title, MAX_TITLE_CHARS)
}

fn excerpt(item: &CandidateItem) -> Option<String> {
    let text = match &item.snippet {
        Some(snippet) => collapse_whitespace(snippet),
        None => plain_text(&item.content),
    };
    (!text.is_empty()).then(|| truncate_chars(&text, MAX_EXCERPT_CHARS))
}

/// Image links keep their query string; CDNs put sizing parameters there.
fn canonical_image(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.into())
}

/// Upsert records and return the newly inserted subset.
///
/// A bulk failure caused by one bad record degrades to per-record upserts so
/// the rest of the batch still lands. Any other store failure is returned.
pub async fn ingest(
    store: &dyn FeedStore,
    records: &[NewArticle],
) -> Result<Vec<ArticleRef>, StoreError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    match store.upsert_articles(records).await {
        Ok(inserted) => Ok(inserted),
        Err(err) if err.is_record_level() => {
            warn!(error = %err, records = records.len(), "bulk upsert rejected, retrying per record");
            upsert_one_by_one(store, records).await
        }
        Err(err) => Err(err),
    }
}

async fn upsert_one_by_one(
    store: &dyn FeedStore,
    records: &[NewArticle],
) -> Result<Vec<ArticleRef>, StoreError> {
    let mut inserted = Vec::new();

    for record in records {
        match store.upsert_articles(std::slice::from_ref(record)).await {
            Ok(mut rows) => inserted.append(&mut rows),
            Err(err) if err.is_record_level() => {
                warn!(url = %record.url, error = %err, "skipping article");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(inserted)
}
