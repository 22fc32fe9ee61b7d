use bytes::Bytes;
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use reqwest::StatusCode;
use url::Url;

/// Where a page's character encoding came from, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetSource {
    Header,
    Meta,
    Sniffed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    pub encoding: &'static Encoding,
    pub source: CharsetSource,
}

impl Charset {
    pub fn utf8() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
            source: CharsetSource::Header,
        }
    }

    /// WHATWG name, e.g. `windows-1252` for a page labelled iso-8859-1.
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

/// An article page decoded to UTF-8.
#[derive(Debug)]
pub struct PageResponse {
    pub url_final: Url,
    pub status: StatusCode,
    pub body_utf8: String,
    pub charset: Charset,
    pub fetched_at: DateTime<Utc>,
}

/// A raw feed document. Feed parsers sniff the XML encoding declaration
/// themselves, so the body is left undecoded.
#[derive(Debug)]
pub struct FeedResponse {
    pub url_final: Url,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub fetched_at: DateTime<Utc>,
}
