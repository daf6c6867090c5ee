//! Error types for the event crawler
//!
//! This module defines the transport-level error types shared by the page
//! scraper and the batched API client.

use thiserror::Error;

/// Errors that can occur during HTTP page fetching
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Page had no recognizable event markup
    #[error("Unexpected markup: {0}")]
    UnexpectedMarkup(String),
}

impl FetchError {
    /// Whether a later attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::ServerError(status) => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Statuses worth another attempt: 429 and the transient 5xx family
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Errors surfaced by the batched API client for a whole call
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport failure before any reply was received
    #[error("API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// No access token configured
    #[error("Missing API access token")]
    MissingCredentials,

    /// The API rejected the credentials
    #[error("API authentication rejected: {0}")]
    AuthRejected(String),

    /// The API answered the batch call itself with an error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Reply list does not line up with the request list
    #[error("Batch reply mismatch: sent {sent} requests, got {received} replies")]
    ReplyMismatch { sent: usize, received: usize },

    /// Response body could not be decoded
    #[error("Malformed batch response: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ApiError {
    /// Whether a later attempt may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Why a single batch item failed to resolve
///
/// This is a recorded value, not an error that propagates: siblings in the
/// same batch are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveFailure {
    /// The API returned `null` for this slot (item timed out upstream)
    #[error("no reply for batch item")]
    NoReply,

    /// The item reply carried a non-success code
    #[error("item failed with status {code}: {body}")]
    Status { code: u16, body: String },

    /// The reply body was not valid JSON or had the wrong shape
    #[error("malformed reply: {0}")]
    Malformed(String),

    /// The reply body had no `id` field
    #[error("reply is missing the id field")]
    MissingId,
}
