//! Content Extractor: isolate the readable body and a representative image
//! from an article's own page.

pub mod cleaner;
pub mod image;
pub mod model;
pub mod reader;
pub mod reject;
pub mod service;

#[cfg(test)]
mod tests;

pub use model::ExtractedContent;
pub use reject::Rejection;
pub use service::{ContentExtractor, ExtractionReport};

use scraper::Html;

use crate::fetcher::PageResponse;

pub fn extract(page: &PageResponse) -> Result<ExtractedContent, Rejection> {
    let document = Html::parse_document(&page.body_utf8);
    let image_url = image::discover_image(&document, &page.url_final);

    let mut result = reader::extract(&document, &page.body_utf8, &page.url_final)
        .ok_or(Rejection::NoContent)?;
    cleaner::sanitize(&mut result, &page.url_final);
    reject::check(&result.title, &result.text)?;

    Ok(ExtractedContent {
        url: page.url_final.clone(),
        title: result.title,
        site_name: result.site_name,
        text: result.text,
        html: result.html,
        image_url,
        fetched_at: page.fetched_at,
    })
}

/// Metadata image only, for pages whose body is not needed.
pub fn page_image(page: &PageResponse) -> Option<String> {
    let document = Html::parse_document(&page.body_utf8);
    image::discover_image(&document, &page.url_final)
}
