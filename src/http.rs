//! HTTP/1.1 message types and wire codec.
//!
//! Implements just enough of HTTP/1.1 for a client: request serialization
//! with header defaulting and override, and response parsing with
//! content-length, chunked, and EOF-delimited bodies.

use std::borrow::Cow;
use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::url::UrlComponents;

/// Upper bound on the response status line plus headers.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// HTTP request methods.
///
/// `Unknown` stands in for an unrecognized verb; [`prepare_request`]
/// rejects it before any socket is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Delete,
    Options,
    Post,
    Put,
    Patch,
    Unknown,
}

impl Method {
    /// The wire form of the verb, or `None` for `Unknown`.
    pub fn as_str(&self) -> Option<&'static str> {
        Some(match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Unknown => return None,
        })
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str().unwrap_or("UNKNOWN"))
    }
}

/// An HTTP request as supplied by the caller.
///
/// The header map is case-preserving; inserting an exact duplicate key
/// overwrites. Case-insensitive override against the framework defaults
/// (`Host`, `User-Agent`, `Connection`) happens at encoding time.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP verb.
    pub method: Method,
    /// Absolute URL, or a path relative to the client's base URL.
    pub url: String,
    /// Additional request headers.
    pub headers: BTreeMap<String, String>,
    /// Optional request body; `Content-Length` is set automatically.
    pub body: Option<String>,
}

impl Request {
    /// A body-less request.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A request carrying a body.
    pub fn with_body(method: Method, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: Some(body.into()),
        }
    }

    /// Add (or overwrite) a header, builder-style.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A parsed HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Numeric status code.
    pub status_code: u16,
    /// Response headers, as received; duplicate names keep the last value.
    pub headers: BTreeMap<String, String>,
    /// Response body, bounded by the configured `max_body_bytes`.
    pub body: Bytes,
}

impl Response {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body as text (lossy UTF-8).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Unknown(format!("failed to decode response body: {}", e)))
    }
}

/// A wire-ready request plus the endpoint it targets.
///
/// The endpoint is carried so a connection can reject a request prepared
/// for a different origin.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Normalized endpoint the request targets.
    pub endpoint: Endpoint,
    /// The fully serialized HTTP/1.1 message.
    pub wire: Bytes,
    /// False for HEAD requests, whose responses carry no body.
    pub expects_body: bool,
}

/// Serialize a request against its resolved URL.
///
/// Sends `Host`, `User-Agent`, and `Connection: keep-alive` by default,
/// plus `Content-Length` when a body is present. The client's default
/// headers and then the request's own headers are applied on top;
/// matching names (case-insensitive) overwrite.
pub fn prepare_request(
    request: &Request,
    url: &UrlComponents,
    config: &ClientConfig,
) -> Result<PreparedRequest> {
    let method = request
        .method
        .as_str()
        .ok_or_else(|| Error::Unknown("Unknown HTTP method".to_string()))?;

    let endpoint = Endpoint::from_url(url).normalize();

    let default_port = if url.https { "443" } else { "80" };
    let host = if endpoint.port == default_port {
        endpoint.host.clone()
    } else {
        format!("{}:{}", endpoint.host, endpoint.port)
    };

    let mut headers: Vec<(String, String)> = vec![
        ("Host".to_string(), host),
        ("User-Agent".to_string(), config.user_agent.clone()),
        ("Connection".to_string(), "keep-alive".to_string()),
    ];
    if let Some(body) = &request.body {
        headers.push(("Content-Length".to_string(), body.len().to_string()));
    }
    for (name, value) in &config.default_headers {
        set_header(&mut headers, name, value);
    }
    for (name, value) in &request.headers {
        set_header(&mut headers, name, value);
    }

    let target = if url.target.is_empty() { "/" } else { &url.target };

    let mut wire = BytesMut::with_capacity(256);
    wire.extend_from_slice(method.as_bytes());
    wire.extend_from_slice(b" ");
    wire.extend_from_slice(target.as_bytes());
    wire.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in &headers {
        wire.extend_from_slice(name.as_bytes());
        wire.extend_from_slice(b": ");
        wire.extend_from_slice(value.as_bytes());
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"\r\n");
    if let Some(body) = &request.body {
        wire.extend_from_slice(body.as_bytes());
    }

    Ok(PreparedRequest {
        endpoint,
        wire: wire.freeze(),
        expects_body: request.method != Method::Head,
    })
}

/// Replace a header case-insensitively, or append it.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        Some(slot) => *slot = (name.to_string(), value.to_string()),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

/// Read and parse one HTTP/1.1 response.
///
/// Returns the response plus whether the connection may be kept alive
/// afterwards. Any I/O error, malformed framing, or a body larger than
/// `max_body_bytes` yields `ReceiveFailed`.
pub(crate) async fn read_response<R>(
    stream: &mut R,
    buf: &mut BytesMut,
    max_body_bytes: usize,
    expects_body: bool,
) -> Result<(Response, bool)>
where
    R: AsyncRead + Unpin,
{
    buf.clear();

    // Head: everything up to the blank line.
    let head_end = loop {
        if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Error::ReceiveFailed("response head too large".to_string()));
        }
        let n = stream
            .read_buf(buf)
            .await
            .map_err(|e| Error::ReceiveFailed(format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(Error::ReceiveFailed(
                "connection closed before response head".to_string(),
            ));
        }
    };

    let head = buf.split_to(head_end + 4);
    let head_text = std::str::from_utf8(&head)
        .map_err(|_| Error::ReceiveFailed("response head is not valid UTF-8".to_string()))?;
    let mut lines = head_text.split("\r\n");

    let status_line = lines.next().unwrap_or("");
    let (minor_version, status_code) = parse_status_line(status_line)?;

    let mut headers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::ReceiveFailed(format!(
                "malformed header line: {:?}",
                line
            )));
        };
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    let bodiless = !expects_body || status_code == 204 || status_code == 304;

    // EOF-delimited bodies cannot be reused for another request.
    let mut close_delimited = false;

    let body = if bodiless {
        Bytes::new()
    } else if header_contains_token(&headers, "Transfer-Encoding", "chunked") {
        read_chunked_body(stream, buf, max_body_bytes).await?
    } else if let Some(len) = header_get(&headers, "Content-Length") {
        let len: usize = len
            .trim()
            .parse()
            .map_err(|_| Error::ReceiveFailed(format!("invalid Content-Length: {:?}", len)))?;
        if len > max_body_bytes {
            return Err(Error::ReceiveFailed(format!(
                "response body of {} bytes exceeds limit of {}",
                len, max_body_bytes
            )));
        }
        read_exact_body(stream, buf, len).await?
    } else {
        close_delimited = true;
        read_to_eof(stream, buf, max_body_bytes).await?
    };

    let keep_alive = !close_delimited && keep_alive(minor_version, &headers);

    Ok((
        Response {
            status_code,
            headers,
            body,
        },
        keep_alive,
    ))
}

/// Parse `HTTP/1.x <code> <reason>`, returning the minor version and code.
fn parse_status_line(line: &str) -> Result<(u8, u16)> {
    let minor = if line.starts_with("HTTP/1.1 ") {
        1
    } else if line.starts_with("HTTP/1.0 ") {
        0
    } else {
        return Err(Error::ReceiveFailed(format!(
            "malformed status line: {:?}",
            line
        )));
    };
    let code = line[9..]
        .split(' ')
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| Error::ReceiveFailed(format!("malformed status line: {:?}", line)))?;
    Ok((minor, code))
}

/// Keep-alive per HTTP/1.x rules: 1.1 defaults open, 1.0 defaults closed,
/// an explicit `Connection` directive wins.
fn keep_alive(minor_version: u8, headers: &BTreeMap<String, String>) -> bool {
    if header_contains_token(headers, "Connection", "close") {
        return false;
    }
    if minor_version == 0 {
        return header_contains_token(headers, "Connection", "keep-alive");
    }
    true
}

fn header_get<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// True if a comma-separated header value contains `token`
/// case-insensitively.
fn header_contains_token(headers: &BTreeMap<String, String>, name: &str, token: &str) -> bool {
    header_get(headers, name)
        .map(|value| value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}

async fn read_exact_body<R>(stream: &mut R, buf: &mut BytesMut, len: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    while buf.len() < len {
        let n = stream
            .read_buf(buf)
            .await
            .map_err(|e| Error::ReceiveFailed(format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(Error::ReceiveFailed(
                "connection closed mid-body".to_string(),
            ));
        }
    }
    Ok(buf.split_to(len).freeze())
}

async fn read_to_eof<R>(stream: &mut R, buf: &mut BytesMut, max_body_bytes: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    loop {
        if buf.len() > max_body_bytes {
            return Err(Error::ReceiveFailed(format!(
                "response body exceeds limit of {} bytes",
                max_body_bytes
            )));
        }
        let n = stream
            .read_buf(buf)
            .await
            .map_err(|e| Error::ReceiveFailed(format!("read failed: {}", e)))?;
        if n == 0 {
            return Ok(buf.split_to(buf.len()).freeze());
        }
    }
}

async fn read_chunked_body<R>(
    stream: &mut R,
    buf: &mut BytesMut,
    max_body_bytes: usize,
) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        let size_line = read_line(stream, buf).await?;
        let size_field = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| Error::ReceiveFailed(format!("invalid chunk size: {:?}", size_line)))?;

        if size == 0 {
            // Trailer section ends at the first empty line.
            loop {
                let trailer = read_line(stream, buf).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            break;
        }

        if body.len() + size > max_body_bytes {
            return Err(Error::ReceiveFailed(format!(
                "response body exceeds limit of {} bytes",
                max_body_bytes
            )));
        }

        let chunk = read_exact_body(stream, buf, size + 2).await?;
        if &chunk[size..] != b"\r\n" {
            return Err(Error::ReceiveFailed("chunk missing CRLF".to_string()));
        }
        body.extend_from_slice(&chunk[..size]);
    }
    Ok(body.freeze())
}

/// Read a CRLF-terminated line, returning it without the terminator.
async fn read_line<R>(stream: &mut R, buf: &mut BytesMut) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = find_subslice(buf, b"\r\n") {
            let line = buf.split_to(pos + 2);
            return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Error::ReceiveFailed("chunk header too large".to_string()));
        }
        let n = stream
            .read_buf(buf)
            .await
            .map_err(|e| Error::ReceiveFailed(format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(Error::ReceiveFailed(
                "connection closed mid-body".to_string(),
            ));
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
