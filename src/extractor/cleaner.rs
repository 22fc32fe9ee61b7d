use ammonia::Builder;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::Url;

use crate::extractor::model::{ReadabilityResult, normalize_whitespace};

static HREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"href="([^"]+)""#).unwrap());
static SRC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"src="([^"]+)""#).unwrap());

/// Strip scripts, styles and event handlers, then make every link and image
/// source absolute so the stored body renders outside the origin site.
pub fn sanitize(result: &mut ReadabilityResult, base_url: &Url) {
    let clean_html = Builder::default()
        .link_rel(Some("noopener noreferrer"))
        .clean(&result.html)
        .to_string();

    result.html = resolve_links(&clean_html, base_url);
    result.text = normalize_whitespace(&result.text);
}

fn resolve_links(html: &str, base_url: &Url) -> String {
    let html = HREF.replace_all(html, |caps: &Captures| absolutize("href", &caps[1], base_url));
    let html = SRC.replace_all(&html, |caps: &Captures| absolutize("src", &caps[1], base_url));
    html.into_owned()
}

fn absolutize(attr: &str, value: &str, base_url: &Url) -> String {
    // In-page anchors and inline data stay as they are.
    if value.starts_with('#') || value.starts_with("data:") {
        return format!(r#"{}="{}""#, attr, value);
    }
    match base_url.join(value) {
        Ok(absolute) => format!(r#"{}="{}""#, attr, absolute),
        Err(_) => format!(r#"{}="{}""#, attr, value),
    }
}
