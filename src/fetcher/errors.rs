use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Response,
}

/// Why a feed document or article page could not be retrieved. A sync logs
/// these against the feed or article and moves on.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("{0:?} timeout")]
    Timeout(TimeoutPhase),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("server answered {0}")]
    Status(StatusCode),

    #[error("body of {bytes} bytes exceeds the {limit} byte limit")]
    TooLarge { bytes: u64, limit: u64 },

    #[error("not an html page: {0}")]
    NotHtml(String),
}

impl FetchError {
    /// Whether the same request has a reasonable chance of succeeding later.
    /// Rate limiting and server errors do; a 404 or a PDF never will.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Timeout(_) | Self::Transport(_) | Self::TooManyRedirects => true,
            Self::InvalidUrl(_) | Self::TooLarge { .. } | Self::NotHtml(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status) => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let phase = if err.is_connect() {
                TimeoutPhase::Connect
            } else {
                TimeoutPhase::Response
            };
            Self::Timeout(phase)
        } else if err.is_redirect() {
            Self::TooManyRedirects
        } else if let Some(status) = err.status() {
            Self::Status(status)
        } else {
            // dns, refused connections, tls, truncated bodies
            Self::Transport(err.to_string())
        }
    }
}
