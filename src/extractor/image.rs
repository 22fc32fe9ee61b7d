use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

/// Metadata probes in priority order, each paired with the attribute that
/// carries the image location.
const IMAGE_PROBES: [(&str, &str); 8] = [
    (r#"meta[property="og:image"]"#, "content"),
    (r#"meta[property="og:image:url"]"#, "content"),
    (r#"meta[property="og:image:secure_url"]"#, "content"),
    (r#"meta[name="twitter:image"], meta[property="twitter:image"]"#, "content"),
    (r#"meta[name="twitter:image:src"], meta[property="twitter:image:src"]"#, "content"),
    (r#"link[rel="image_src"]"#, "href"),
    (r#"meta[name="thumbnail"]"#, "content"),
    (r#"meta[itemprop="image"]"#, "content"),
];

static PROBES: LazyLock<Vec<(Selector, &'static str)>> = LazyLock::new(|| {
    IMAGE_PROBES
        .iter()
        .filter_map(|(css, attr)| Selector::parse(css).ok().map(|sel| (sel, *attr)))
        .collect()
});

/// First representative image advertised by the page, as an absolute
/// http(s) URL.
pub fn discover_image(document: &Html, base_url: &Url) -> Option<String> {
    PROBES.iter().find_map(|(selector, attr)| {
        document
            .select(selector)
            .filter_map(|element| element.value().attr(attr))
            .find_map(|value| absolute_image(value, base_url))
    })
}

fn absolute_image(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let url = base_url.join(value).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.into())
}
