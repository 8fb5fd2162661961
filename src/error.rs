//! Error types for the restpool client.

/// Result type alias for restpool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, sending, or pooling requests.
///
/// Every failure carries a human-readable message derived from the
/// underlying cause. Errors are returned, never panicked, across the
/// public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL failed to parse, a relative URL had no base to resolve
    /// against, or a prepared request targeted a different endpoint than
    /// the connection it was handed to.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// DNS resolution or the TCP connect failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The TLS client handshake (or SNI setup) failed.
    #[error("tls handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// Writing the request to the wire failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading the response failed, the response was malformed, or the
    /// body exceeded the configured size limit.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Generic network error on the pool-routed request path.
    #[error("network error: {0}")]
    NetworkError(String),

    /// A pool acquisition, connect, or request deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unrecognized HTTP verb, pool shutdown, or another unclassified
    /// failure.
    #[error("{0}")]
    Unknown(String),
}

impl Error {
    /// True if this error indicates the operation timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// True if this error came from URL parsing or resolution.
    pub fn is_invalid_url(&self) -> bool {
        matches!(self, Error::InvalidUrl(_))
    }
}
