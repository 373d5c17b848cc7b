//! Error types for the crawl engine.
//!
//! The taxonomy separates fatal construction errors (`CrawlError`) from the
//! per-request failures that are routed to subscribers and never abort a
//! running pass: network-level failures (`TransportError`) and HTTP-level
//! failures surfaced at header materialization (`HttpError`).

use thiserror::Error;

use crate::queue::JobId;

/// Fatal errors surfaced by the engine itself.
///
/// Per-request failures are not represented here; they reach callers through
/// subscribers implementing the error capability, through the stat collector,
/// or through the logs.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("cannot create a crawl job without base URIs")]
    EmptyBaseUris,

    #[error("cannot resume unknown job id: {0}")]
    InvalidJobId(JobId),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Network-level request failure: the response never materialized or the
/// body stream broke underneath us.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("body stream for {url} failed: {message}")]
    Body { url: String, message: String },
}

impl TransportError {
    /// Classifies a `reqwest` error raised while starting a request.
    pub(crate) fn from_request_error(url: &url::Url, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else {
            TransportError::Connect {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Classifies a `reqwest` error raised while streaming the body.
    pub(crate) fn from_body_error(url: &url::Url, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else {
            TransportError::Body {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// HTTP-level failure: the server answered, but with a non-2xx status.
#[derive(Debug, Clone, Error)]
#[error("HTTP status {status} for {url}")]
pub struct HttpError {
    pub status: u16,
    pub url: String,
}

/// Errors raised by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown job id: {0}")]
    UnknownJob(JobId),

    #[error("queue storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode queue record: {0}")]
    Encode(String),

    #[error("failed to decode queue record: {0}")]
    Decode(String),
}
