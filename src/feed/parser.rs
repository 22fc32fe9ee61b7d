use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed, Link};
use regex::Regex;
use scraper::{Html, Selector};

use crate::feed::FeedError;
use crate::text::{non_empty, plain_text};

/// Only the most recent items of a feed are considered, in source order.
pub const MAX_ITEMS_PER_FEED: usize = 50;

const IMAGE_EXTENSIONS: [&str; 7] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".svg"];

static RSS_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item[\s>].*?</item>").unwrap());

// <image><url>..</url></image> or <image>..</image> inside an item
static ITEM_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<image(?:\s[^>]*)?>\s*(?:<url>\s*)?(?:<!\[CDATA\[\s*)?(https?://[^<\s\]]+)").unwrap()
});

static INLINE_IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[src]").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    /// The human-facing site the feed belongs to, if advertised.
    pub site_link: Option<String>,
    pub items: Vec<RawItem>,
}

/// One feed item with every schema variant kept side by side. Any field may
/// be missing; [`RawItem::resolve`] picks the most complete one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    /// `content:encoded` in RSS, `<content>` in Atom.
    pub content_encoded: Option<String>,
    /// `<description>` / `<summary>` as published, possibly HTML.
    pub content: Option<String>,
    /// Plain-text rendition of `content`.
    pub content_snippet: Option<String>,
    pub author: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    /// An enclosure or media content entry typed as an image.
    pub enclosure_image: Option<String>,
    pub thumbnail: Option<String>,
    /// An Atom `rel="enclosure"` link typed as an image.
    pub linked_image: Option<String>,
    /// An RSS item-level `<image>` element. feed-rs drops it, so it is read
    /// from the raw document.
    pub image_field: Option<String>,
    /// First `<img>` in the item's content or summary.
    pub inline_image: Option<String>,
}

/// A parsed item after field resolution, ready for normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub content: String,
    pub snippet: Option<String>,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, FeedError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FeedError::Parse(e.to_string()))?;
    let entries = feed.entries.len();
    let mut parsed = ParsedFeed::from_model(feed);

    // Only trust positional matching when every entry is an <item>.
    let image_fields = item_image_fields(bytes);
    if entries > 0 && image_fields.len() == entries {
        for (item, image) in parsed.items.iter_mut().zip(image_fields) {
            item.image_field = image;
        }
    }

    Ok(parsed)
}

fn item_image_fields(bytes: &[u8]) -> Vec<Option<String>> {
    let document = String::from_utf8_lossy(bytes);
    RSS_ITEM
        .find_iter(&document)
        .map(|item| {
            ITEM_IMAGE
                .captures(item.as_str())
                .and_then(|caps| caps.get(1))
                .map(|url| url.as_str().replace("&amp;", "&"))
        })
        .collect()
}

fn first_inline_image(html: &str) -> Option<String> {
    if !html.contains("<img") && !html.contains("<IMG") {
        return None;
    }
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&INLINE_IMG)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.starts_with("data:"))
        .map(str::to_string)
}

impl ParsedFeed {
    fn from_model(feed: Feed) -> Self {
        let title = feed.title.as_ref().and_then(|t| non_empty(Some(&t.content)));
        let site_link = site_link(&feed.links);

        let items = feed
            .entries
            .iter()
            .take(MAX_ITEMS_PER_FEED)
            .map(RawItem::from_entry)
            .collect();

        Self {
            title,
            site_link,
            items,
        }
    }

    /// Resolve every item, stamping undated ones with `now`.
    pub fn candidates(&self, now: DateTime<Utc>) -> Vec<CandidateItem> {
        self.items.iter().map(|item| item.resolve(now)).collect()
    }
}

impl RawItem {
    pub fn from_entry(entry: &Entry) -> Self {
        let summary = entry.summary.as_ref().map(|s| s.content.as_str());
        let body = entry.content.as_ref().and_then(|c| c.body.as_deref());

        Self {
            title: entry.title.as_ref().and_then(|t| non_empty(Some(&t.content))),
            link: entry_link(entry),
            content_encoded: non_empty(body),
            content: non_empty(summary),
            content_snippet: summary.map(plain_text).filter(|s| !s.is_empty()),
            author: entry
                .authors
                .iter()
                .find_map(|person| non_empty(Some(&person.name))),
            published: entry.published,
            updated: entry.updated,
            enclosure_image: media_image(entry),
            thumbnail: entry
                .media
                .iter()
                .flat_map(|media| media.thumbnails.iter())
                .find_map(|thumb| non_empty(Some(&thumb.image.uri))),
            linked_image: entry
                .links
                .iter()
                .filter(|link| is_rel(link, "enclosure"))
                .find(|link| {
                    link.media_type
                        .as_deref()
                        .is_some_and(|t| t.starts_with("image/"))
                        || has_image_extension(&link.href)
                })
                .and_then(|link| non_empty(Some(&link.href))),
            image_field: None,
            inline_image: body
                .and_then(first_inline_image)
                .or_else(|| summary.and_then(first_inline_image)),
        }
    }

    /// Full content over summary over snippet; published over updated over
    /// `now`. Images: enclosure, item `<image>`, media thumbnail, enclosure
    /// link, then the first inline `<img>`.
    pub fn resolve(&self, now: DateTime<Utc>) -> CandidateItem {
        let content = self
            .content_encoded
            .clone()
            .or_else(|| self.content.clone())
            .or_else(|| self.content_snippet.clone())
            .unwrap_or_default();

        CandidateItem {
            title: self.title.clone(),
            link: self.link.clone(),
            content,
            snippet: self
                .content_snippet
                .clone()
                .or_else(|| self.content_encoded.as_deref().map(plain_text))
                .filter(|s| !s.is_empty()),
            author: self.author.clone(),
            published_at: self.published.or(self.updated).unwrap_or(now),
            image_url: self
                .enclosure_image
                .clone()
                .or_else(|| self.image_field.clone())
                .or_else(|| self.thumbnail.clone())
                .or_else(|| self.linked_image.clone())
                .or_else(|| self.inline_image.clone()),
        }
    }
}

fn is_rel(link: &Link, rel: &str) -> bool {
    link.rel.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(rel))
}

fn site_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|link| link.rel.is_none() || is_rel(link, "alternate"))
        .and_then(|link| non_empty(Some(&link.href)))
}

/// Alternate link first, then any link that is not the feed itself, then an
/// id that happens to be a URL.
fn entry_link(entry: &Entry) -> Option<String> {
    entry
        .links
        .iter()
        .find(|link| link.rel.is_none() || is_rel(link, "alternate"))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|link| !is_rel(link, "self") && !is_rel(link, "enclosure"))
        })
        .and_then(|link| non_empty(Some(&link.href)))
        .or_else(|| {
            let id = entry.id.trim();
            (id.starts_with("http://") || id.starts_with("https://")).then(|| id.to_string())
        })
}

fn media_image(entry: &Entry) -> Option<String> {
    entry
        .media
        .iter()
        .flat_map(|media| media.content.iter())
        .find_map(|content| {
            let url = content.url.as_ref()?.as_str();
            let typed_image = content
                .content_type
                .as_ref()
                .is_some_and(|mime| mime.to_string().to_ascii_lowercase().starts_with("image/"));
            (typed_image || has_image_extension(url)).then(|| url.to_string())
        })
}

fn has_image_extension(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/"
     xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example Blog</title>
    <link>https://example.com/</link>
    <description>Posts</description>
    <item>
      <title>Full post</title>
      <link>https://example.com/full</link>
      <description>&lt;p&gt;Short &lt;b&gt;summary&lt;/b&gt;&lt;/p&gt;</description>
      <content:encoded><![CDATA[<p>The whole article body.</p>]]></content:encoded>
      <dc:creator>Ada</dc:creator>
      <pubDate>Tue, 10 Jun 2025 09:00:00 GMT</pubDate>
      <enclosure url="https://cdn.example.com/cover.jpg" type="image/jpeg" length="1234"/>
    </item>
    <item>
      <title>Summary only</title>
      <link>https://example.com/summary</link>
      <description>Just a summary</description>
      <media:thumbnail url="https://cdn.example.com/thumb.png"/>
    </item>
    <item>
      <description>No title, no link</description>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Site</title>
  <link rel="self" href="https://atom.example.org/feed.xml"/>
  <link rel="alternate" href="https://atom.example.org/"/>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2025-06-01T12:00:00Z</updated>
  <entry>
    <title>Updated only</title>
    <link rel="alternate" href="https://atom.example.org/posts/1"/>
    <link rel="enclosure" type="image/png" href="https://atom.example.org/img/1.png"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2025-06-01T12:00:00Z</updated>
    <author><name>Grace</name></author>
    <summary>Atom summary</summary>
  </entry>
</feed>"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_rss_channel_metadata() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Example Blog"));
        assert_eq!(parsed.site_link.as_deref(), Some("https://example.com/"));
        assert_eq!(parsed.items.len(), 3);
    }

    #[test]
    fn encoded_content_wins_over_summary() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        let item = parsed.items[0].resolve(now());

        assert_eq!(item.content, "<p>The whole article body.</p>");
        assert_eq!(item.snippet.as_deref(), Some("Short summary"));
        assert_eq!(item.author.as_deref(), Some("Ada"));
        assert_eq!(
            item.published_at,
            Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
        );
        assert_eq!(
            item.image_url.as_deref(),
            Some("https://cdn.example.com/cover.jpg")
        );
    }

    #[test]
    fn summary_used_when_no_encoded_content() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        let item = parsed.items[1].resolve(now());

        assert_eq!(item.content, "Just a summary");
        assert_eq!(
            item.image_url.as_deref(),
            Some("https://cdn.example.com/thumb.png")
        );
    }

    #[test]
    fn undated_item_falls_back_to_ingestion_time() {
        let parsed = parse_feed(RSS.as_bytes()).unwrap();
        let item = parsed.items[2].resolve(now());

        assert_eq!(item.published_at, now());
        assert_eq!(item.title, None);
        assert_eq!(item.link, None);
    }

    #[test]
    fn atom_uses_alternate_links_and_updated_date() {
        let parsed = parse_feed(ATOM.as_bytes()).unwrap();
        assert_eq!(
            parsed.site_link.as_deref(),
            Some("https://atom.example.org/")
        );

        let item = parsed.items[0].resolve(now());
        assert_eq!(item.link.as_deref(), Some("https://atom.example.org/posts/1"));
        assert_eq!(item.author.as_deref(), Some("Grace"));
        assert_eq!(
            item.published_at,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            item.image_url.as_deref(),
            Some("https://atom.example.org/img/1.png")
        );
    }

    #[test]
    fn caps_items_per_feed() {
        let mut xml = String::from(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Big</title><link>https://big.example/</link>"#,
        );
        for i in 0..80 {
            xml.push_str(&format!(
                "<item><title>Post {i}</title><link>https://big.example/{i}</link></item>"
            ));
        }
        xml.push_str("</channel></rss>");

        let parsed = parse_feed(xml.as_bytes()).unwrap();
        assert_eq!(parsed.items.len(), MAX_ITEMS_PER_FEED);
        // source order is preserved
        assert_eq!(parsed.items[0].title.as_deref(), Some("Post 0"));
        assert_eq!(parsed.items[49].title.as_deref(), Some("Post 49"));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = parse_feed(b"<html><body>not a feed</body></html>").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[test]
    fn item_image_element_and_inline_img_are_used() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Pics</title><link>https://x.test/</link>
  <image><url>https://x.test/channel-logo.png</url></image>
  <item>
    <title>With image element</title>
    <link>https://x.test/a</link>
    <image><url>https://x.test/i.jpg</url></image>
    <description>&lt;p&gt;&lt;img src="https://x.test/inline-a.jpg"&gt; text&lt;/p&gt;</description>
  </item>
  <item>
    <title>Inline only</title>
    <link>https://x.test/b</link>
    <description>&lt;p&gt;&lt;img src="data:image/gif;base64,R0l"&gt;&lt;img src="/img/b.png"&gt;&lt;/p&gt;</description>
  </item>
  <item>
    <title>No image</title>
    <link>https://x.test/c</link>
    <description>Plain words</description>
  </item>
</channel></rss>"#;

        let parsed = parse_feed(xml.as_bytes()).unwrap();
        let images: Vec<Option<String>> = parsed
            .candidates(now())
            .into_iter()
            .map(|item| item.image_url)
            .collect();

        assert_eq!(
            images,
            vec![
                Some("https://x.test/i.jpg".to_string()),
                Some("/img/b.png".to_string()),
                None,
            ]
        );
    }

    #[test]
    fn enclosure_beats_item_image_and_inline_img() {
        let item = RawItem {
            enclosure_image: Some("https://x.test/enclosure.jpg".into()),
            image_field: Some("https://x.test/field.jpg".into()),
            inline_image: Some("https://x.test/inline.jpg".into()),
            ..RawItem::default()
        };
        assert_eq!(
            item.resolve(now()).image_url.as_deref(),
            Some("https://x.test/enclosure.jpg")
        );

        let item = RawItem {
            image_field: Some("https://x.test/field.jpg".into()),
            inline_image: Some("https://x.test/inline.jpg".into()),
            ..RawItem::default()
        };
        assert_eq!(
            item.resolve(now()).image_url.as_deref(),
            Some("https://x.test/field.jpg")
        );
    }

    #[test]
    fn image_extension_ignores_query_string() {
        assert!(has_image_extension("https://x.test/a.JPG?w=300"));
        assert!(!has_image_extension("https://x.test/podcast.mp3"));
    }
}
