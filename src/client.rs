//! Synchronous (blocking) client.
//!
//! A single-connection mirror of the async client: it owns a
//! current-thread Tokio runtime and one connection slot, reusing the
//! connection while consecutive requests target the same endpoint.
//! Intended for scripts, tests, and non-async code; use one instance per
//! thread.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::connection::{ConnectOptions, Connection};
use crate::error::{Error, Result};
use crate::http::{prepare_request, Method, Request, Response};
use crate::tls;
use crate::url::{parse_base_url, resolve, UrlComponents};

/// A blocking HTTP/1.1 client holding at most one connection.
///
/// # Examples
///
/// ```ignore
/// use restpool::{Client, ClientConfig};
///
/// let client = Client::new(ClientConfig::default())?;
/// let response = client.get("http://example.com/ping")?;
/// println!("{}", response.status_code);
/// ```
pub struct Client {
    config: ClientConfig,
    base_url: Option<UrlComponents>,
    rt: tokio::runtime::Runtime,
    tls: tokio_rustls::TlsConnector,
    conn: Mutex<Option<Connection>>,
}

impl Client {
    /// Create a client. Fails if the configured base URL is invalid or
    /// the runtime cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Unknown(format!("failed to build runtime: {}", e)))?;

        let base_url = config.base_url.as_deref().map(parse_base_url).transpose()?;
        let tls = tls::client_connector(config.verify_tls);

        Ok(Self {
            config,
            base_url,
            rt,
            tls,
            conn: Mutex::new(None),
        })
    }

    /// Send a request, reusing the held connection when the endpoint
    /// matches and replacing it otherwise.
    pub fn send(&self, request: Request) -> Result<Response> {
        let mut request = request;
        let mut url = resolve(&request.url, self.base_url.as_ref())?;

        if !self.config.interceptors.is_empty() {
            for interceptor in &self.config.interceptors {
                interceptor.prepare(&mut request, &url);
            }
            url = resolve(&request.url, self.base_url.as_ref())?;
        }

        let prepared = prepare_request(&request, &url, &self.config)?;

        let mut slot = self.conn.lock();
        let matches = slot
            .as_ref()
            .is_some_and(|conn| conn.endpoint() == &prepared.endpoint);
        if !matches {
            // Endpoint changed: drop the old connection outright.
            if let Some(mut old) = slot.take() {
                old.close();
            }
            let opts = ConnectOptions {
                connect_timeout: self.config.connect_timeout,
                max_body_bytes: self.config.max_body_bytes,
                verify_tls: self.config.verify_tls,
            };
            *slot = Some(Connection::new(
                prepared.endpoint.clone(),
                opts,
                self.tls.clone(),
            ));
        }
        let Some(conn) = slot.as_mut() else {
            return Err(Error::Unknown("connection slot is empty".to_string()));
        };

        let outcome = self.rt.block_on(async {
            tokio::time::timeout(self.config.request_timeout, conn.request(&prepared)).await
        });
        match outcome {
            Ok(result) => result,
            Err(_) => {
                conn.close();
                Err(Error::Timeout(format!(
                    "request to {} timed out after {:?}",
                    prepared.endpoint, self.config.request_timeout
                )))
            }
        }
    }

    // ── Convenience verbs ───────────────────────────────────────────────

    /// GET `url`.
    pub fn get(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Get, url))
    }

    /// HEAD `url`.
    pub fn head(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Head, url))
    }

    /// DELETE `url`.
    pub fn delete(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Delete, url))
    }

    /// OPTIONS `url`.
    pub fn options(&self, url: impl Into<String>) -> Result<Response> {
        self.send(Request::new(Method::Options, url))
    }

    /// POST `body` to `url`.
    pub fn post(&self, url: impl Into<String>, body: impl Into<String>) -> Result<Response> {
        self.send(Request::with_body(Method::Post, url, body))
    }

    /// PUT `body` to `url`.
    pub fn put(&self, url: impl Into<String>, body: impl Into<String>) -> Result<Response> {
        self.send(Request::with_body(Method::Put, url, body))
    }

    /// PATCH `body` to `url`.
    pub fn patch(&self, url: impl Into<String>, body: impl Into<String>) -> Result<Response> {
        self.send(Request::with_body(Method::Patch, url, body))
    }

    // ── Typed variants ──────────────────────────────────────────────────

    /// GET `url` and decode the JSON response body into `T`.
    pub fn get_json<T: DeserializeOwned>(&self, url: impl Into<String>) -> Result<T> {
        self.get(url)?.json()
    }

    /// POST `body` to `url` and decode the JSON response body into `T`.
    pub fn post_json<T: DeserializeOwned>(
        &self,
        url: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<T> {
        self.post(url, body)?.json()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("base_url", &self.base_url)
            .finish()
    }
}
