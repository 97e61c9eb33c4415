//! Error taxonomy for the discovery engine.
//!
//! Validation errors are rejected synchronously at the API edge. Auth errors
//! surface from the interactive flows and token exchanges. Fetch errors are
//! terminal transport failures after the retry budget is spent. Adapter-level
//! platform failures never escape `scan`; they are logged and degraded in
//! place, so they have no variant here.

use crate::model::Platform;
use thiserror::Error;

/// Problems with a scan configuration, reported before any scanning starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("keyword list is empty")]
    NoKeywords,
    #[error("keyword {0:?} is shorter than 2 characters")]
    KeywordTooShort(String),
    #[error("keyword {0:?} is longer than 100 characters")]
    KeywordTooLong(String),
    #[error("keyword {0:?} contains unsupported characters")]
    KeywordBadCharset(String),
    #[error("keyword {0:?} appears more than once")]
    DuplicateKeyword(String),
    #[error("keyword list has {got} entries, the limit is {limit}")]
    TooManyKeywords { got: usize, limit: usize },
}

/// Failures from the interactive OAuth flows and token exchanges.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The redirect carried a `state` that does not match the one we issued.
    #[error("Invalid OAuth state")]
    StateMismatch,
    #[error("authorization redirect did not arrive in time")]
    Timeout,
    #[error("authentication flow was cancelled")]
    Cancelled,
    /// Another platform's flow already holds the loopback listener.
    #[error("an authentication flow for {0} is already in progress")]
    FlowInFlight(Platform),
    #[error("{0} does not support interactive authentication")]
    FlowUnsupported(Platform),
    #[error("missing credentials for {0}: {1}")]
    MissingCredentials(Platform, &'static str),
    /// The authorization server redirected back with an `error` parameter.
    #[error("authorization server rejected the flow: {0}")]
    Provider(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("could not bind the loopback listener")]
    Listener(#[source] std::io::Error),
}

/// Terminal outcome of a request the resilient fetcher gave up on.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt came back 429 and the retry budget is spent.
    #[error("{platform} kept rate limiting after {attempts} attempts")]
    RetriesExhausted { platform: Platform, attempts: u32 },
    /// The transport failed on the final attempt.
    #[error("request to {platform} failed: {source}")]
    Transport {
        platform: Platform,
        #[source]
        source: reqwest::Error,
    },
}

/// Everything the engine's public surface can fail with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
