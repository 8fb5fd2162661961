//! TCP and TLS connection management.
//!
//! A [`Connection`] is bound to one [`Endpoint`] for its whole life and
//! wraps at most one transport stream (plaintext or TLS). It knows how to
//! establish itself (DNS, connect, SNI, handshake) and how to run exactly
//! one HTTP request/response transaction, tearing the stream down on any
//! I/O failure or when the server declines keep-alive.

use std::time::Duration;

use bytes::BytesMut;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::http::{self, PreparedRequest, Response};

/// Transport-level settings applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Deadline for DNS + TCP connect + TLS handshake.
    pub connect_timeout: Duration,
    /// Maximum accepted response body size in bytes.
    pub max_body_bytes: usize,
    /// Verify peer certificates against the OS trust store.
    pub verify_tls: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_body_bytes: 10 * 1024 * 1024,
            verify_tls: true,
        }
    }
}

/// The transport stream states. Absence means `Unconnected`.
enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// One reusable client connection to a single endpoint.
pub struct Connection {
    endpoint: Endpoint,
    opts: ConnectOptions,
    tls: TlsConnector,
    stream: Option<Stream>,
    read_buf: BytesMut,
}

impl Connection {
    /// Create an unconnected connection bound to `endpoint`. No I/O
    /// happens until [`ensure_connected`](Self::ensure_connected).
    pub(crate) fn new(endpoint: Endpoint, opts: ConnectOptions, tls: TlsConnector) -> Self {
        Self {
            endpoint,
            opts,
            tls,
            stream: None,
            read_buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// The endpoint this connection is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// True while a transport stream is open.
    pub fn is_healthy(&self) -> bool {
        self.stream.is_some()
    }

    /// Tear down the transport. Dropping the stream closes the socket
    /// directly; no TLS close-notify is sent, so this never blocks.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            trace!(endpoint = %self.endpoint, "closed connection");
        }
    }

    /// Establish the transport if it is not already open. Idempotent.
    ///
    /// Resolves DNS, connects to the first address that accepts, and for
    /// HTTPS endpoints performs SNI + the TLS client handshake. The whole
    /// sequence is bounded by the configured connect timeout.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let timeout = self.opts.connect_timeout;
        match tokio::time::timeout(timeout, self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "connect to {} timed out after {:?}",
                self.endpoint, timeout
            ))),
        }
    }

    async fn establish(&mut self) -> Result<()> {
        let authority = format!("{}:{}", self.endpoint.host, self.endpoint.port);

        let addrs = lookup_host(authority.as_str())
            .await
            .map_err(|e| Error::ConnectionFailed(format!("resolve {}: {}", authority, e)))?;

        // Fall back across the resolver set until one address accepts.
        let mut last_error = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| match last_error {
            Some(e) => Error::ConnectionFailed(format!("connect to {}: {}", authority, e)),
            None => Error::ConnectionFailed(format!("{} resolved to no addresses", authority)),
        })?;

        tcp.set_nodelay(true)
            .map_err(|e| Error::ConnectionFailed(format!("set_nodelay: {}", e)))?;

        if self.endpoint.https {
            let domain = ServerName::try_from(self.endpoint.host.clone()).map_err(|e| {
                Error::TlsHandshakeFailed(format!(
                    "invalid SNI name {:?}: {}",
                    self.endpoint.host, e
                ))
            })?;
            // On handshake failure the TCP stream is consumed and dropped.
            let tls = self
                .tls
                .connect(domain, tcp)
                .await
                .map_err(|e| Error::TlsHandshakeFailed(format!("{}: {}", authority, e)))?;
            self.stream = Some(Stream::Tls(Box::new(tls)));
        } else {
            self.stream = Some(Stream::Plain(tcp));
        }

        debug!(endpoint = %self.endpoint, "established connection");
        Ok(())
    }

    /// Perform exactly one request/response transaction.
    ///
    /// The prepared request must target this connection's endpoint.
    /// Connectivity is ensured first; no second connection attempt is made
    /// within one call. Any wire failure tears the stream down, as does a
    /// response without keep-alive semantics.
    pub async fn request(&mut self, prepared: &PreparedRequest) -> Result<Response> {
        if prepared.endpoint != self.endpoint {
            return Err(Error::InvalidUrl(format!(
                "request for {} sent to a connection bound to {}",
                prepared.endpoint, self.endpoint
            )));
        }

        self.ensure_connected().await?;

        let max_body_bytes = self.opts.max_body_bytes;
        let outcome = {
            let Self {
                stream, read_buf, ..
            } = self;
            match stream.as_mut() {
                Some(Stream::Plain(s)) => transact(s, read_buf, prepared, max_body_bytes).await,
                Some(Stream::Tls(s)) => {
                    transact(s.as_mut(), read_buf, prepared, max_body_bytes).await
                }
                None => Err(Error::NetworkError(
                    "connection is not established".to_string(),
                )),
            }
        };

        match outcome {
            Ok((response, keep_alive)) => {
                if !keep_alive {
                    self.close();
                }
                Ok(response)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.stream {
            None => "unconnected",
            Some(Stream::Plain(_)) => "plain",
            Some(Stream::Tls(_)) => "tls",
        };
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &state)
            .finish()
    }
}

/// Write the request and read one response over an established stream.
async fn transact<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    prepared: &PreparedRequest,
    max_body_bytes: usize,
) -> Result<(Response, bool)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&prepared.wire)
        .await
        .map_err(|e| Error::SendFailed(format!("write failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::SendFailed(format!("flush failed: {}", e)))?;

    http::read_response(stream, buf, max_body_bytes, prepared.expects_body).await
}
