use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use url::Url;

static SPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Main content isolated from an article page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub url: Url,
    pub title: String,
    pub site_name: Option<String>,
    pub text: String,
    /// Sanitized HTML with absolute links; replaces the feed-provided body.
    pub html: String,
    /// Representative image from the page metadata, if any.
    pub image_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ReadabilityResult {
    pub title: String,
    pub site_name: Option<String>,
    pub text: String,
    pub html: String,
}

/// Collapse spaces but keep paragraph breaks.
pub fn normalize_whitespace(text: &str) -> String {
    let spaced = SPACE_RUN.replace_all(text.trim(), " ");
    BLANK_LINES.replace_all(&spaced, "\n\n").to_string()
}
