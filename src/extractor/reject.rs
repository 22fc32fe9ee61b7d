use std::fmt;

const MIN_CONTENT_CHARS: usize = 250;
const MIN_WORD_COUNT: usize = 50;
const MAX_BOILERPLATE_RATIO: f64 = 0.3;

const BOILERPLATE_KEYWORDS: [&str; 24] = [
    "cookie",
    "privacy",
    "terms of service",
    "policy",
    "gdpr",
    "consent",
    "accept all",
    "preferences",
    "tracking",
    "advertisement",
    "newsletter",
    "log in",
    "login",
    "sign up",
    "password",
    "not found",
    "access denied",
    "please wait",
    "enable javascript",
    "your browser",
    "captcha",
    "are you a robot",
    "click here",
    "paywall",
];

/// Why an extraction result was not worth storing.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NoContent,
    TooShort { chars: usize },
    Untitled { words: usize },
    Boilerplate { ratio: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoContent => write!(f, "no readable content found"),
            Self::TooShort { chars } => write!(f, "only {} characters of text", chars),
            Self::Untitled { words } => write!(f, "no title and only {} words", words),
            Self::Boilerplate { ratio } => write!(f, "boilerplate ratio {:.2}", ratio),
        }
    }
}

/// Anything rejected here counts as "no enrichment": the feed's own content
/// stays in place.
pub fn check(title: &str, text: &str) -> Result<(), Rejection> {
    let chars = text.chars().count();
    if chars < MIN_CONTENT_CHARS {
        return Err(Rejection::TooShort { chars });
    }

    let words = text.split_whitespace().count();
    if title.trim().is_empty() && words < MIN_WORD_COUNT {
        return Err(Rejection::Untitled { words });
    }

    let ratio = boilerplate_ratio(text, words);
    if ratio > MAX_BOILERPLATE_RATIO {
        return Err(Rejection::Boilerplate { ratio });
    }

    Ok(())
}

fn boilerplate_ratio(text: &str, total_words: usize) -> f64 {
    if total_words == 0 {
        return 1.0;
    }
    let text_lower = text.to_lowercase();
    let hits: usize = BOILERPLATE_KEYWORDS
        .iter()
        .map(|keyword| text_lower.matches(keyword).count())
        .sum();
    hits as f64 / total_words as f64
}
