use chrono::Utc;
use reqwest::StatusCode;
use url::Url;

use crate::extractor::{Rejection, extract, page_image};
use crate::fetcher::{Charset, PageResponse};

const PARAGRAPH: &str = "The harbour authority confirmed on Monday that the northern breakwater, \
    damaged during the winter storms, will be rebuilt with a wider base and a new walkway for \
    pedestrians, cyclists and the anglers who have used it for generations.";

fn article_page() -> String {
    let paragraphs: String = (0..6)
        .map(|i| format!("<p>{PARAGRAPH} Paragraph number {i}.</p>"))
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Breakwater to be rebuilt - Harbour News</title>
  <meta property="og:site_name" content="Harbour News">
  <meta property="og:image" content="/images/breakwater.jpg">
  <script>window.tracking = true;</script>
</head>
<body>
  <nav><a href="/">Home</a> <a href="/sport">Sport</a></nav>
  <article>
    <h1>Breakwater to be rebuilt</h1>
    <div class="entry-content">
      {paragraphs}
      <p>{PARAGRAPH} Read the <a href="/related/storms">earlier coverage of the storms</a> for the full timeline of the damage.</p>
      <img src="images/map.png" alt="Map">
    </div>
  </article>
  <footer>Copyright Harbour News</footer>
</body>
</html>"#
    )
}

#[test]
fn test_extract_article() {
    let page = page_from(article_page(), "https://news.example.com/2025/breakwater");

    let content = extract(&page).expect("article should be extracted");

    assert_eq!(content.site_name.as_deref(), Some("Harbour News"));
    assert!(content.text.contains("northern breakwater"));
    assert!(!content.html.contains("<script"));
    assert!(!content.html.contains("<nav"));
    assert_eq!(
        content.image_url.as_deref(),
        Some("https://news.example.com/images/breakwater.jpg")
    );
}

#[test]
fn test_extracted_links_are_absolute() {
    let page = page_from(article_page(), "https://news.example.com/2025/breakwater");

    let content = extract(&page).expect("article should be extracted");

    assert!(
        content
            .html
            .contains("https://news.example.com/related/storms")
    );
}

#[test]
fn test_reject_empty_page() {
    let html = "<html><head><title>Loading</title></head><body><p>Please wait...</p></body></html>";
    let page = page_from(html.to_string(), "https://example.com/empty");

    let err = extract(&page).unwrap_err();
    assert!(matches!(
        err,
        Rejection::NoContent | Rejection::TooShort { .. }
    ));
}

#[test]
fn test_reject_consent_interstitial() {
    let wall = "We value your privacy. Accept all cookie preferences, read our cookie policy and gdpr consent. "
        .repeat(12);
    let html = format!(
        "<html><head><title>Consent</title></head><body><main><p>{wall}</p></main></body></html>"
    );
    let page = page_from(html, "https://example.com/consent");

    assert!(extract(&page).is_err());
}

#[test]
fn test_malformed_html_does_not_panic() {
    let html = "<html><head><title>Broken</title><body><p>Unclosed tags<div>More content";
    let page = page_from(html.to_string(), "https://example.com/broken");

    // too short to keep, but must come back as a rejection
    assert!(extract(&page).is_err());
}

#[test]
fn test_page_image_without_body_extraction() {
    let html = r#"<html><head><meta name="twitter:image" content="https://cdn.example.com/tw.jpg"></head><body></body></html>"#;
    let page = page_from(html.to_string(), "https://example.com/a");

    assert_eq!(
        page_image(&page).as_deref(),
        Some("https://cdn.example.com/tw.jpg")
    );
}

fn page_from(html: String, url: &str) -> PageResponse {
    PageResponse {
        url_final: Url::parse(url).unwrap(),
        status: StatusCode::OK,
        body_utf8: html,
        charset: Charset::utf8(),
        fetched_at: Utc::now(),
    }
}

#[cfg(feature = "fuzz")]
mod fuzz {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_extract_never_panics(
            html in ".*",
            url in "https://[a-z]+\\.com/[a-z]*"
        ) {
            let page = page_from(html, &url);
            let _ = extract(&page);
        }

        #[test]
        fn test_discovered_images_are_absolute(
            image in "[a-z/.]{0,20}",
        ) {
            let html = format!(r#"<html><head><meta property="og:image" content="{image}"></head></html>"#);
            let page = page_from(html, "https://example.com/post");
            if let Some(found) = page_image(&page) {
                prop_assert!(found.starts_with("https://"));
            }
        }
    }
}
