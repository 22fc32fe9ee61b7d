use crate::fetcher::types::{Charset, CharsetSource, PageResponse};
use chrono::Utc;
use encoding_rs::Encoding;
use regex::Regex;
use reqwest::StatusCode;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static HEADER_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?([^"'\s;]+)"#).unwrap());

// <meta charset="..."> and the older http-equiv form
static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s[^>]*?charset\s*=\s*["']?([a-z0-9_:.\-]+)"#).unwrap()
});

/// Leading bytes searched for a `<meta>` declaration.
const SNIFF_WINDOW: usize = 4096;

pub fn decode_page(
    url_final: Url,
    status: StatusCode,
    body: &[u8],
    content_type: &str,
) -> PageResponse {
    let charset = detect_charset(content_type, body);
    let body_utf8 = decode_lossy(body, charset.encoding);

    debug!(charset = charset.name(), source = ?charset.source, "decoded page");

    PageResponse {
        url_final,
        status,
        body_utf8,
        charset,
        fetched_at: Utc::now(),
    }
}

fn detect_charset(content_type: &str, body: &[u8]) -> Charset {
    if let Some(encoding) = label(&HEADER_CHARSET, content_type) {
        return Charset {
            encoding,
            source: CharsetSource::Header,
        };
    }

    let head = &body[..body.len().min(SNIFF_WINDOW)];
    if let Some(encoding) = label(&META_CHARSET, &String::from_utf8_lossy(head)) {
        return Charset {
            encoding,
            source: CharsetSource::Meta,
        };
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(head, head.len() == body.len());
    Charset {
        encoding: detector.guess(None, true),
        source: CharsetSource::Sniffed,
    }
}

fn label(regex: &Regex, haystack: &str) -> Option<&'static Encoding> {
    let raw = regex.captures(haystack)?.get(1)?.as_str();
    Encoding::for_label(raw.trim().as_bytes())
}

/// A stray invalid byte in a page footer is not worth losing the article
/// over; malformed sequences become U+FFFD.
fn decode_lossy(body: &[u8], encoding: &'static Encoding) -> String {
    let (decoded, actual, had_errors) = encoding.decode(body);
    if had_errors {
        debug!(encoding = actual.name(), "replaced malformed sequences");
    }
    decoded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_charset_wins() {
        let body = br#"<html><head><meta charset="shift_jis"></head></html>"#;
        let charset = detect_charset("text/html; charset=UTF-8", body);

        assert_eq!(charset.encoding, encoding_rs::UTF_8);
        assert_eq!(charset.source, CharsetSource::Header);
    }

    #[test]
    fn meta_charset_is_mapped_to_whatwg_name() {
        let body = br#"<html><head><meta charset="iso-8859-1"><title>T</title></head></html>"#;
        let charset = detect_charset("text/html", body);

        assert_eq!(charset.name(), "windows-1252");
        assert_eq!(charset.source, CharsetSource::Meta);
    }

    #[test]
    fn http_equiv_declaration() {
        let body = br#"<meta http-equiv="Content-Type" content="text/html; charset=shift_jis">"#;
        let charset = detect_charset("text/html", body);

        assert_eq!(charset.encoding, encoding_rs::SHIFT_JIS);
    }

    #[test]
    fn undeclared_pages_are_sniffed() {
        let charset = detect_charset("text/html", "<p>plain ascii</p>".as_bytes());
        assert_eq!(charset.source, CharsetSource::Sniffed);
    }

    #[test]
    fn decodes_single_byte_pages() {
        let page = decode_page(
            Url::parse("https://example.com/").unwrap(),
            StatusCode::OK,
            b"<p>caf\xe9</p>",
            "text/html; charset=windows-1252",
        );
        assert_eq!(page.body_utf8, "<p>café</p>");
    }

    #[test]
    fn malformed_bytes_are_replaced() {
        let decoded = decode_lossy(b"ok \xff\xfe done", encoding_rs::UTF_8);
        assert!(decoded.starts_with("ok "));
        assert!(decoded.ends_with(" done"));
    }
}
