use thiserror::Error;

/// Failure of the fetch capability for one URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP {0}")]
    Http(u16),

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// Rate limiting and server-side errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::Http(status) => *status == 429 || (500..600).contains(status),
            FetchError::Network(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Http(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),
}

/// A page or listing document that could not be obtained at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),
}

/// Configuration problems detected before any fan-out begins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrawlError {
    #[error("unusable base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("worker pool size must be at least 1")]
    NoWorkers,

    #[error("page size must be at least 1")]
    InvalidPageSize,
}
