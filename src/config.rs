//! Client configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::interceptor::RequestInterceptor;
use crate::pool::PoolConfig;

/// Default response body cap (10 MiB).
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration shared by the blocking and async clients.
#[derive(Clone)]
pub struct ClientConfig {
    /// Optional base URL; relative request URLs resolve against its prefix.
    pub base_url: Option<String>,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Headers added to every request (overridable per request).
    pub default_headers: BTreeMap<String, String>,
    /// Deadline for DNS + TCP connect + TLS handshake.
    pub connect_timeout: Duration,
    /// Deadline for one request/response transaction (and, on the async
    /// client, for waiting on a pooled connection).
    pub request_timeout: Duration,
    /// Maximum accepted response body size in bytes.
    pub max_body_bytes: usize,
    /// Verify peer certificates against the OS trust store.
    pub verify_tls: bool,
    /// Request interceptors, applied in order before preparation.
    pub interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: "restpool-client/1.0".to_string(),
            default_headers: BTreeMap::new(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            verify_tls: true,
            interceptors: Vec::new(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("default_headers", &self.default_headers)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("verify_tls", &self.verify_tls)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Configuration for [`AsyncClient`](crate::AsyncClient): the shared client
/// settings plus the connection pool knobs.
#[derive(Debug, Clone, Default)]
pub struct AsyncClientConfig {
    /// Settings shared with the blocking client.
    pub client: ClientConfig,
    /// Connection pool limits and lifecycles.
    pub pool: PoolConfig,
}
