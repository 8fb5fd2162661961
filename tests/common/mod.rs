//! Minimal in-process HTTP/1.1 server for exercising the clients.
//!
//! Counts accepted connections, served requests, and the peak number of
//! concurrently in-flight requests, and records every request target.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// A request as seen by the test server.
pub struct ReceivedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The response a handler asks the server to send.
pub struct TestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Send `Connection: close` and drop the socket after responding.
    pub close: bool,
}

impl TestResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
            close: false,
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            close: false,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

type Handler = dyn Fn(&ReceivedRequest) -> TestResponse + Send + Sync;

struct ServerState {
    accepts: AtomicUsize,
    requests: AtomicUsize,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
    targets: Mutex<Vec<String>>,
    delay: Option<Duration>,
    handler: Arc<Handler>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    acceptor: JoinHandle<()>,
}

impl TestServer {
    /// Bind to an ephemeral port and serve with `handler`. `delay` is an
    /// artificial per-request processing time.
    pub async fn spawn<F>(delay: Option<Duration>, handler: F) -> Self
    where
        F: Fn(&ReceivedRequest) -> TestResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            accepts: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            max_inflight: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
            delay,
            handler: Arc::new(handler),
        });

        let accept_state = state.clone();
        let acceptor = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_state.accepts.fetch_add(1, Ordering::SeqCst);
                let conn_state = accept_state.clone();
                tokio::spawn(async move {
                    serve_connection(stream, conn_state).await;
                });
            }
        });

        Self {
            addr,
            state,
            acceptor,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn accepts(&self) -> usize {
        self.state.accepts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn max_inflight(&self) -> usize {
        self.state.max_inflight.load(Ordering::SeqCst)
    }

    pub fn targets(&self) -> Vec<String> {
        self.state.targets.lock().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn serve_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        // Head.
        let head_end = loop {
            if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                break pos;
            }
            let mut tmp = [0u8; 4096];
            let n = match stream.read(&mut tmp).await {
                Ok(n) => n,
                Err(_) => return,
            };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&tmp[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        buf.drain(..head_end + 4);

        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or("");
        let mut parts = request_line.split(' ');
        let method = parts.next().unwrap_or("").to_string();
        let target = parts.next().unwrap_or("").to_string();

        let mut headers = Vec::new();
        let mut content_length = 0usize;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                let (name, value) = (name.trim().to_string(), value.trim().to_string());
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.parse().unwrap_or(0);
                }
                headers.push((name, value));
            }
        }

        // Body.
        while buf.len() < content_length {
            let mut tmp = [0u8; 4096];
            let n = match stream.read(&mut tmp).await {
                Ok(n) => n,
                Err(_) => return,
            };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&tmp[..n]);
        }
        let body: Vec<u8> = buf.drain(..content_length).collect();

        let request = ReceivedRequest {
            method: method.clone(),
            target: target.clone(),
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        };

        state.requests.fetch_add(1, Ordering::SeqCst);
        state.targets.lock().push(target);
        let current = state.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_inflight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = state.delay {
            tokio::time::sleep(delay).await;
        }
        let response = (state.handler)(&request);
        state.inflight.fetch_sub(1, Ordering::SeqCst);

        let is_head = method == "HEAD";
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\n",
            response.status,
            reason(response.status),
            response.body.len()
        );
        for (name, value) in &response.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        if response.close {
            out.push_str("Connection: close\r\n");
        }
        out.push_str("\r\n");
        if !is_head {
            out.push_str(&response.body);
        }

        if stream.write_all(out.as_bytes()).await.is_err() {
            return;
        }
        if response.close {
            return;
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Unknown",
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
