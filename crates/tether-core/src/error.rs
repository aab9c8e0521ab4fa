//! Error taxonomy and relay status codes.
//!
//! Synchronous misuse surfaces as [`Error`] from the calling function.
//! Asynchronous outcomes (send failures, timeouts, aborts) are never raised
//! across the async boundary; they complete the operation with one of the
//! [`status`] codes instead.

use thiserror::Error;

/// Completion status codes carried by result callbacks and relay responses.
///
/// Positive values are HTTP status codes relayed verbatim; zero is success
/// for non-HTTP completions; negative values are engine-defined outcomes.
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const REQUEST_FAILED: i32 = -1;
    pub const TIMED_OUT: i32 = -2;
    pub const ABORTED: i32 = -3;

    pub fn is_success(code: i32) -> bool {
        code == SUCCESS || (200..300).contains(&code)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid caller-supplied configuration. Always synchronous and fatal to
    /// the call; never silently swallowed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation requiring an active transport connection was issued while
    /// disconnected.
    #[error("transport connection is not established")]
    NotConnected,

    /// A one-shot request object was issued a second time.
    #[error("this request was already sent; build a new one")]
    AlreadySent,

    /// The relay path needs a target node and none was supplied.
    #[error("no target node is specified")]
    MissingTarget,

    /// A bounded blocking wait elapsed before the operation completed.
    #[error("operation did not complete within {0:?}")]
    Timeout(std::time::Duration),

    #[error("route error: {0}")]
    Route(#[from] crate::routes::RouteError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
