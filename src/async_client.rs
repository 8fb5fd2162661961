//! Async REST client.
//!
//! The primary client: resolves URLs, runs interceptors, and drives
//! requests over connections leased from the shared [`Pool`].

use serde::de::DeserializeOwned;

use crate::config::{AsyncClientConfig, ClientConfig};
use crate::connection::ConnectOptions;
use crate::error::{Error, Result};
use crate::http::{prepare_request, Method, Request, Response};
use crate::pagination::Paginator;
use crate::pool::{Pool, PoolMetricsSnapshot};
use crate::url::{parse_base_url, resolve, UrlComponents};

/// An asynchronous HTTP/1.1 client with pooled keep-alive connections.
///
/// The client is cheap to share behind an `Arc`; the pool it wraps is
/// fully thread-safe and callable from any task.
///
/// # Examples
///
/// ```ignore
/// use restpool::{AsyncClient, AsyncClientConfig};
///
/// let client = AsyncClient::new(AsyncClientConfig::default())?;
/// let response = client.get("http://example.com/ping").await?;
/// println!("{} {}", response.status_code, response.text());
/// ```
pub struct AsyncClient {
    config: ClientConfig,
    base_url: Option<UrlComponents>,
    pool: Pool,
}

impl AsyncClient {
    /// Create a client. Fails if the configured base URL is invalid.
    pub fn new(config: AsyncClientConfig) -> Result<Self> {
        let base_url = config
            .client
            .base_url
            .as_deref()
            .map(parse_base_url)
            .transpose()?;

        let connect = ConnectOptions {
            connect_timeout: config.client.connect_timeout,
            max_body_bytes: config.client.max_body_bytes,
            verify_tls: config.client.verify_tls,
        };
        let pool = Pool::new(config.pool, connect);

        Ok(Self {
            config: config.client,
            base_url,
            pool,
        })
    }

    /// The underlying connection pool, e.g. for circuit-breaker reporting
    /// via [`Pool::report_success`] / [`Pool::report_failure`].
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Snapshot of the pool's metrics.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.pool.metrics()
    }

    /// Shut the pool down. In-flight requests finish against their live
    /// connections; everything else fails fast from here on.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Send a request: resolve its URL, run interceptors, acquire a
    /// pooled connection, and perform one transaction.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let mut request = request;
        let mut url = resolve(&request.url, self.base_url.as_ref())?;

        if !self.config.interceptors.is_empty() {
            for interceptor in &self.config.interceptors {
                interceptor.prepare(&mut request, &url);
            }
            // A query-injecting interceptor may have rewritten the URL.
            url = resolve(&request.url, self.base_url.as_ref())?;
        }

        let prepared = prepare_request(&request, &url, &self.config)?;

        let mut lease = self
            .pool
            .acquire(&prepared.endpoint, Some(self.config.request_timeout))
            .await?;

        match tokio::time::timeout(self.config.request_timeout, lease.request(&prepared)).await {
            Ok(result) => result,
            Err(_) => {
                // The transaction may have died mid-write; never reuse it.
                lease.close();
                Err(Error::Timeout(format!(
                    "request to {} timed out after {:?}",
                    prepared.endpoint, self.config.request_timeout
                )))
            }
        }
    }

    // ── Convenience verbs ───────────────────────────────────────────────

    /// GET `url`.
    pub async fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Get, url)).await
    }

    /// HEAD `url`.
    pub async fn head(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Head, url)).await
    }

    /// DELETE `url`.
    pub async fn delete(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Delete, url)).await
    }

    /// OPTIONS `url`.
    pub async fn options(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Options, url)).await
    }

    /// POST `body` to `url`.
    pub async fn post(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Response> {
        self.send(Request::with_body(Method::Post, url, body)).await
    }

    /// PUT `body` to `url`.
    pub async fn put(&self, url: impl Into<String>, body: impl Into<String>) -> Result<Response> {
        self.send(Request::with_body(Method::Put, url, body)).await
    }

    /// PATCH `body` to `url`.
    pub async fn patch(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Response> {
        self.send(Request::with_body(Method::Patch, url, body)).await
    }

    // ── Typed variants ──────────────────────────────────────────────────

    /// GET `url` and decode the JSON response body into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: impl Into<String>) -> Result<T> {
        self.get(url).await?.json()
    }

    /// POST `body` to `url` and decode the JSON response body into `T`.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<T> {
        self.post(url, body).await?.json()
    }

    /// Walk a paginated collection starting at `initial_url`.
    pub fn paginate<T: DeserializeOwned>(
        &self,
        initial_url: impl Into<String>,
    ) -> Paginator<'_, T> {
        Paginator::new(self, initial_url)
    }
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("config", &self.config)
            .field("base_url", &self.base_url)
            .field("pool", &self.pool)
            .finish()
    }
}
