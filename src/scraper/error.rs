//! Error types for fetching, parsing, and discovery runs.
//!
//! Fetch and parse errors are recoverable: the aggregator turns them into empty
//! buckets. Only [DiscoveryError] reaches the caller of a sync.

use thiserror::Error;

/// Failure of a single fetch. All variants are treated as "this source produced zero results".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP {status} when fetching: {url}")]
    Status { status: u16, url: String },

    #[error("Network error: could not reach {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Access blocked at {url}: anti-bot challenge page returned instead of content.")]
    Blocked { url: String },
}

impl FetchError {
    /// Rate limits, server errors and network failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::InvalidUrl { .. } | FetchError::Blocked { .. } => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::Status { status: 429, .. })
    }

    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        FetchError::Network {
            url: url.to_string(),
            reason: source.to_string(),
        }
    }
}

/// Failure to turn raw text into a document, or to read a structure out of it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed document: {reason}")]
    Malformed { reason: String },

    #[error("Invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("Could not decode embedded data: {reason}")]
    DataIsland { reason: String },
}

impl ParseError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        ParseError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Outcome errors of a discovery run, search, or detail request.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(
        "Every discovery category came back empty; \
         the source may be down or have changed its markup."
    )]
    NoResults,

    #[error("Discovery run was cancelled before {task}.")]
    Cancelled { task: String },

    #[error("No {what} could be extracted from {url}.")]
    Empty { what: &'static str, url: String },

    #[error("Could not write discovery cache: {0}")]
    Cache(#[from] crate::discovery::CacheError),
}
