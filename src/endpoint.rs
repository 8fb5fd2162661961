//! Origin endpoint identity.
//!
//! An [`Endpoint`] is the normalized `(host, port, https)` triple the pool
//! keys its buckets on. Two URLs that differ only in path share an endpoint
//! and therefore share pooled connections.

use std::fmt;

use crate::url::UrlComponents;

/// A normalized origin: host, port, and whether the scheme is HTTPS.
///
/// Equality and hashing use all three fields. Callers must [`normalize`]
/// an endpoint before using it as a pool key; normalization is idempotent.
///
/// [`normalize`]: Endpoint::normalize
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Hostname or address, lowercase after normalization.
    pub host: String,
    /// Port as a string, non-empty after normalization.
    pub port: String,
    /// True for `https://` origins.
    pub https: bool,
}

impl Endpoint {
    /// Create an endpoint from raw parts. Call [`normalize`](Self::normalize)
    /// before using it as a pool key.
    pub fn new(host: impl Into<String>, port: impl Into<String>, https: bool) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            https,
        }
    }

    /// Derive the endpoint targeted by parsed URL components.
    pub fn from_url(url: &UrlComponents) -> Self {
        Self {
            host: url.host.clone(),
            port: url.port.clone(),
            https: url.https,
        }
    }

    /// Normalize in place: lowercase the host, default an empty host to
    /// `localhost`, and default an empty port to the scheme port.
    pub fn normalize(mut self) -> Self {
        if self.host.is_empty() {
            self.host = "localhost".to_string();
        } else {
            self.host.make_ascii_lowercase();
        }
        if self.port.is_empty() {
            self.port = if self.https { "443" } else { "80" }.to_string();
        }
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.https { "https" } else { "http" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}
