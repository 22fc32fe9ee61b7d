use url::Url;

/// Dedup key for an article link.
///
/// Relative links are resolved against `base`. Only http(s) survives.
/// Fragments and `utm_*` tracking parameters are dropped. Every other query
/// segment is kept byte for byte and in order; a query without tracking
/// parameters is not touched at all.
pub fn canonical_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(raw).ok()?,
        Err(_) => return None,
    };

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    url.set_fragment(None);

    if let Some(query) = url.query() {
        let segments: Vec<&str> = query.split('&').collect();
        let kept: Vec<&str> = segments
            .iter()
            .copied()
            .filter(|segment| !is_tracking(segment))
            .collect();

        if kept.len() != segments.len() {
            let rebuilt = kept.join("&");
            url.set_query((!rebuilt.is_empty()).then_some(rebuilt.as_str()));
        }
    }

    Some(url.into())
}

fn is_tracking(segment: &str) -> bool {
    let key = segment.split('=').next().unwrap_or(segment);
    key.get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("utm_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/blog/").unwrap()
    }

    #[test]
    fn strips_fragment_and_tracking_params() {
        let url = canonical_url(
            "https://example.com/post?id=7&utm_source=rss&UTM_MEDIUM=feed#comments",
            None,
        );
        assert_eq!(url.as_deref(), Some("https://example.com/post?id=7"));
    }

    #[test]
    fn query_without_tracking_is_left_verbatim() {
        for raw in [
            "https://example.com/watch?v=abc&list",
            "https://example.com/search?q=a%20b&page=2",
            "https://example.com/legacy?a=1;b=2",
        ] {
            assert_eq!(canonical_url(raw, None).as_deref(), Some(raw));
        }
    }

    #[test]
    fn removing_tracking_keeps_other_segments_as_written() {
        assert_eq!(
            canonical_url("https://example.com/s?q=a%20b&utm_source=x", None).as_deref(),
            Some("https://example.com/s?q=a%20b")
        );
        assert_eq!(
            canonical_url("https://example.com/s?utm_medium=rss&flag&a=1;b=2", None).as_deref(),
            Some("https://example.com/s?flag&a=1;b=2")
        );
    }

    #[test]
    fn drops_query_entirely_when_only_tracking() {
        let url = canonical_url("https://example.com/post?utm_campaign=x", None);
        assert_eq!(url.as_deref(), Some("https://example.com/post"));
    }

    #[test]
    fn resolves_relative_links_against_base() {
        let base = base();
        assert_eq!(
            canonical_url("2025/06/hello", Some(&base)).as_deref(),
            Some("https://example.com/blog/2025/06/hello")
        );
        assert_eq!(
            canonical_url("/about", Some(&base)).as_deref(),
            Some("https://example.com/about")
        );
    }

    #[test]
    fn relative_link_without_base_is_dropped() {
        assert_eq!(canonical_url("/about", None), None);
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert_eq!(canonical_url("mailto:someone@example.com", None), None);
        assert_eq!(canonical_url("javascript:alert(1)", Some(&base())), None);
        assert_eq!(canonical_url("   ", Some(&base())), None);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(
            canonical_url("\n  https://example.com/x \t", None).as_deref(),
            Some("https://example.com/x")
        );
    }
}
