//! Error types raised at the HTTP boundary and by the poller.
//!
//! The library reports typed errors so callers can distinguish a transient
//! transport failure (which the poller swallows) from a backend rejection or
//! a local validation failure. The CLI wraps all of these in `anyhow`.

use thiserror::Error;

use crate::chunking::ValidationErrors;

/// Errors returned by [`ApiClient`](crate::api::ApiClient) calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-2xx HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The server answered 2xx but the envelope carried a non-zero code.
    #[error("backend error {code}: {message}")]
    Backend { code: i64, message: String },

    /// The body could not be decoded into the expected shape.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Input was rejected locally; no request was sent.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl ApiError {
    /// Envelope code carried by a backend rejection, if any.
    pub fn backend_code(&self) -> Option<i64> {
        match self {
            ApiError::Backend { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors raised when starting a poll loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("document {0} is already being polled")]
    AlreadyPolling(String),
}
