//! Error types for tether operations.

use std::io;

use tether_proto::Value;

/// Alias for `Result<T, tether::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by link, negotiation and call operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An expected marker did not arrive before the deadline.
    #[error("{op}: timed out")]
    Timeout {
        /// The step that was waiting.
        op: &'static str,
    },

    /// The operation was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    /// The companion reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// A streamed result failed part-way; `partial` holds every value
    /// received before the failure, in order.
    #[error("remote error after {} streamed values: {message}", partial.len())]
    Stream {
        /// Message reported by the companion.
        message: String,
        /// Values received before the error.
        partial: Vec<Value>,
    },

    /// The companion is not resident and no source was configured to paste.
    #[error("companion not installed on device and no stub source configured")]
    StubMissing,

    /// The peer sent something that does not fit the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid port URL or line settings.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error from the underlying transport.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps a codec failure as [`Error::Protocol`].
    pub(crate) fn protocol(e: impl std::fmt::Display) -> Self {
        Self::Protocol(e.to_string())
    }

    /// Whether this error leaves the line in an unknown state.
    pub(crate) fn desyncs(&self) -> bool {
        !matches!(self, Self::Remote(_) | Self::Stream { .. })
    }
}
