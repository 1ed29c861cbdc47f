//! Error types for live telemetry synchronization.
//!
//! Only configuration errors ever reach the caller of
//! [`StreamClient::new`](crate::StreamClient::new). Every other variant is
//! produced inside an attached session, logged, and absorbed: the session
//! falls back, reconnects, or drops the offending message and carries on.

/// Errors that can occur while synchronizing with the CityFlow API.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// A configured or derived URL could not be used.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The push transport could not be opened.
    #[error("push transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The push transport failed while receiving.
    #[error("push transport error: {0}")]
    TransportRuntime(String),

    /// The push transport was closed by the remote end.
    #[error("push transport closed unexpectedly")]
    UnexpectedClose,

    /// A received message could not be decoded into a snapshot.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The API answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Error message from the response body, or the status reason.
        message: String,
    },

    /// The HTTP request could not be sent or its body could not be read.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The request was aborted through its cancellation token.
    #[error("request cancelled")]
    Cancelled,

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether a session can carry on after this error.
    ///
    /// Configuration problems are programmer errors and fail fast; all
    /// transport, payload and request failures are recoverable.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::InvalidUrl(_))
    }
}
