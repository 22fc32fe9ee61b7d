use readability::extractor;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

use crate::extractor::model::ReadabilityResult;

/// Containers tried in order when readability gives up on a page.
const CONTENT_SELECTORS: [&str; 9] = [
    "article",
    "main",
    "[role='main']",
    ".entry-content",
    ".post-content",
    ".article-body",
    "#content",
    ".content",
    ".post",
];

const MIN_FALLBACK_TEXT: usize = 100;

static SITE_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:site_name"]"#).unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());

/// Readability first, then a selector-based fallback over common article
/// containers.
pub fn extract(document: &Html, raw_html: &str, url: &Url) -> Option<ReadabilityResult> {
    let site_name = site_name(document);

    if let Ok(product) = extractor::extract(&mut raw_html.as_bytes(), url)
        && !product.text.trim().is_empty()
    {
        return Some(ReadabilityResult {
            title: product.title,
            site_name,
            text: product.text,
            html: product.content,
        });
    }

    let (text, html) = main_content(document)?;
    Some(ReadabilityResult {
        title: title(document).unwrap_or_default(),
        site_name,
        text,
        html,
    })
}

fn site_name(document: &Html) -> Option<String> {
    if let Some(content) = first_attr(document, &SITE_NAME, "content") {
        return Some(content);
    }

    // "Article Title - Site Name" or "Article Title | Site Name"
    let title = text_of(document, &TITLE)?;
    title
        .rsplit_once(" - ")
        .or_else(|| title.rsplit_once(" | "))
        .map(|(_, site)| site.trim().to_string())
        .filter(|site| !site.is_empty())
}

fn title(document: &Html) -> Option<String> {
    first_attr(document, &OG_TITLE, "content")
        .or_else(|| text_of(document, &TITLE))
        .or_else(|| text_of(document, &H1))
}

fn main_content(document: &Html) -> Option<(String, String)> {
    for selector in CONTENT_SELECTORS.iter().filter_map(|s| Selector::parse(s).ok()) {
        for element in document.select(&selector) {
            let text = element.text().collect::<String>();
            if text.trim().len() > MIN_FALLBACK_TEXT {
                return Some((text, element.html()));
            }
        }
    }

    let body = document.select(&BODY).next()?;
    let text = body.text().collect::<String>();
    (!text.trim().is_empty()).then(|| (text, body.html()))
}

fn first_attr(document: &Html, selector: &Selector, attr: &str) -> Option<String> {
    document
        .select(selector)
        .filter_map(|element| element.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn text_of(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_name_prefers_open_graph() {
        let doc = Html::parse_document(
            r#"<html><head><title>Post - Title Site</title>
               <meta property="og:site_name" content="OG Site"></head></html>"#,
        );
        assert_eq!(site_name(&doc).as_deref(), Some("OG Site"));
    }

    #[test]
    fn site_name_from_title_suffix() {
        let doc = Html::parse_document(
            "<html><head><title>A story | The Daily Example</title></head></html>",
        );
        assert_eq!(site_name(&doc).as_deref(), Some("The Daily Example"));
    }

    #[test]
    fn fallback_finds_article_container() {
        let body = "Paragraph text that is long enough to count as content. ".repeat(5);
        let doc = Html::parse_document(&format!(
            "<html><body><nav>Home</nav><article><p>{body}</p></article></body></html>"
        ));

        let (text, html) = main_content(&doc).unwrap();
        assert!(text.contains("Paragraph text"));
        assert!(html.starts_with("<article>"));
        assert!(!html.contains("<nav>"));
    }
}
