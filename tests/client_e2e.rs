#![allow(clippy::unwrap_used)]
//! Client End-to-End Tests
//!
//! Drives the async and blocking clients against an in-process HTTP
//! server, covering connection reuse, pool capacity under concurrency,
//! relative URL resolution, keep-alive handling, interceptors, and
//! pagination.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{TestResponse, TestServer};
use restpool::{
    ApiKey, ApiKeyLocation, AsyncClient, AsyncClientConfig, BearerAuth, Client, ClientConfig,
    Error, Method, PoolConfig, Request,
};
use serde::Deserialize;

fn async_config(base_url: Option<String>) -> AsyncClientConfig {
    AsyncClientConfig {
        client: ClientConfig {
            base_url,
            request_timeout: Duration::from_secs(10),
            ..ClientConfig::default()
        },
        pool: PoolConfig::default(),
    }
}

// ============================================================================
// Async client basics
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_absolute_url() {
    let server = TestServer::spawn(None, |req| {
        if req.target == "/ok" {
            TestResponse::ok("hello")
        } else {
            TestResponse::status(404, "nope")
        }
    })
    .await;

    let client = AsyncClient::new(async_config(None)).unwrap();

    let response = client.get(server.url("/ok")).await.unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.text(), "hello");

    let response = client.get(server.url("/missing")).await.unwrap();
    assert_eq!(response.status_code, 404);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_post_echoes_body() {
    let server = TestServer::spawn(None, |req| {
        if req.method == "POST" && req.target == "/echo" {
            TestResponse::ok(req.body.clone())
        } else {
            TestResponse::status(400, "bad")
        }
    })
    .await;

    let client = AsyncClient::new(async_config(None)).unwrap();
    let response = client.post(server.url("/echo"), "abc123").await.unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.text(), "abc123");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_head_returns_no_body() {
    let server = TestServer::spawn(None, |_| TestResponse::ok("ignored")).await;

    let client = AsyncClient::new(async_config(None)).unwrap();
    let response = client.head(server.url("/x")).await.unwrap();

    assert_eq!(response.status_code, 200);
    assert!(response.body.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_headers_are_sent() {
    let server = TestServer::spawn(None, |req| {
        let ua = req.header("User-Agent").unwrap_or("").to_string();
        let conn = req.header("Connection").unwrap_or("").to_string();
        TestResponse::ok(format!("{}|{}", ua, conn))
    })
    .await;

    let client = AsyncClient::new(async_config(None)).unwrap();
    let response = client.get(server.url("/")).await.unwrap();
    assert_eq!(response.text(), "restpool-client/1.0|keep-alive");
}

// ============================================================================
// Connection reuse and keep-alive
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_request_reuses_connection() {
    let server = TestServer::spawn(None, |_| TestResponse::ok("ok")).await;

    let mut config = async_config(None);
    config.pool.max_connections_per_endpoint = 1;
    let client = AsyncClient::new(config).unwrap();

    let r1 = client.get(server.url("/a")).await.unwrap();
    let r2 = client.get(server.url("/b")).await.unwrap();
    assert_eq!(r1.status_code, 200);
    assert_eq!(r2.status_code, 200);

    assert_eq!(server.requests(), 2);
    assert_eq!(server.accepts(), 1);
    assert_eq!(client.metrics().connection_reused, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_close_is_honored() {
    let server = TestServer::spawn(None, |req| {
        if req.target == "/first" {
            TestResponse::ok("first").closing()
        } else {
            TestResponse::ok("second")
        }
    })
    .await;

    let mut config = async_config(None);
    config.pool.max_connections_per_endpoint = 1;
    config.pool.max_total_connections = 2;
    let client = AsyncClient::new(config).unwrap();

    let r1 = client.get(server.url("/first")).await.unwrap();
    assert_eq!(r1.text(), "first");
    // The connection was torn down after the forced close, so nothing idles.
    assert!(client.metrics().total_idle <= 1);

    let r2 = client.get(server.url("/second")).await.unwrap();
    assert_eq!(r2.text(), "second");

    assert_eq!(server.requests(), 2);
    assert_eq!(server.accepts(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_respect_endpoint_cap() {
    let server =
        TestServer::spawn(Some(Duration::from_millis(80)), |_| TestResponse::ok("ok")).await;

    let mut config = async_config(None);
    config.pool.max_connections_per_endpoint = 2;
    config.pool.max_total_connections = 10;
    let client = Arc::new(AsyncClient::new(config).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let url = server.url("/slow");
        handles.push(tokio::spawn(async move { client.get(url).await }));
    }
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.status_code, 200);
    }

    assert_eq!(server.requests(), 8);
    assert!(server.max_inflight() <= 2, "saw {} in flight", server.max_inflight());
}

// ============================================================================
// URL resolution
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relative_urls_resolve_against_base() {
    let server = TestServer::spawn(None, |req| {
        if req.target == "/api/ping" {
            TestResponse::ok("pong")
        } else {
            TestResponse::status(404, "bad")
        }
    })
    .await;

    let client = AsyncClient::new(async_config(Some(server.url("/api")))).unwrap();

    assert_eq!(client.get("/ping").await.unwrap().text(), "pong");
    assert_eq!(client.get("ping").await.unwrap().text(), "pong");
    let _ = client.get("").await.unwrap();

    assert_eq!(
        server.targets(),
        vec!["/api/ping".to_string(), "/api/ping".to_string(), "/api/".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_absolute_url_overrides_base() {
    let base_server = TestServer::spawn(None, |_| TestResponse::ok("base")).await;
    let other_server = TestServer::spawn(None, |req| {
        if req.target == "/x" {
            TestResponse::ok("other")
        } else {
            TestResponse::status(404, "bad")
        }
    })
    .await;

    let client = AsyncClient::new(async_config(Some(base_server.url("/api")))).unwrap();
    let response = client.get(other_server.url("/x")).await.unwrap();

    assert_eq!(response.text(), "other");
    assert_eq!(base_server.requests(), 0);
}

#[tokio::test]
async fn test_relative_url_without_base_fails() {
    let client = AsyncClient::new(async_config(None)).unwrap();
    let err = client.get("/ping").await.unwrap_err();
    assert!(err.is_invalid_url());
}

#[tokio::test]
async fn test_invalid_absolute_url_fails() {
    let client = AsyncClient::new(async_config(None)).unwrap();
    let err = client.get("127.0.0.1:1234/ok").await.unwrap_err();
    assert!(err.is_invalid_url());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_method_fails_without_io() {
    let server = TestServer::spawn(None, |_| TestResponse::ok("ok")).await;

    let client = AsyncClient::new(async_config(None)).unwrap();
    let err = client
        .send(Request::new(Method::Unknown, server.url("/ok")))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Unknown HTTP method");
    assert_eq!(server.accepts(), 0);
}

// ============================================================================
// Interceptors
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bearer_interceptor_authenticates() {
    let server = TestServer::spawn(None, |req| {
        if req.header("Authorization") == Some("Bearer secret-token") {
            TestResponse::ok("ok")
        } else {
            TestResponse::status(401, "")
        }
    })
    .await;

    let mut config = async_config(None);
    config.client.interceptors.push(Arc::new(BearerAuth::new("secret-token")));
    let client = AsyncClient::new(config).unwrap();

    let response = client.get(server.url("/auth")).await.unwrap();
    assert_eq!(response.status_code, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_api_key_query_interceptor_rewrites_url() {
    let server = TestServer::spawn(None, |_| TestResponse::ok("ok")).await;

    let mut config = async_config(None);
    config
        .client
        .interceptors
        .push(Arc::new(ApiKey::new("key", "secret", ApiKeyLocation::Query)));
    let client = AsyncClient::new(config).unwrap();

    client.get(server.url("/items?page=1")).await.unwrap();
    assert_eq!(server.targets(), vec!["/items?page=1&key=secret".to_string()]);
}

// ============================================================================
// Pagination
// ============================================================================

#[derive(Debug, Deserialize)]
struct Item {
    id: i64,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_link_header_pagination() {
    // The next-page URL embeds the ephemeral port, so it is filled in
    // after the server has bound.
    let next_url: Arc<std::sync::OnceLock<String>> = Arc::new(std::sync::OnceLock::new());
    let handler_next = next_url.clone();

    let server = TestServer::spawn(None, move |req| {
        if req.target == "/items" {
            let page = TestResponse::ok(r#"[{"id":1},{"id":2}]"#);
            match handler_next.get() {
                Some(next) => page.header("Link", format!("<{}>; rel=\"next\"", next)),
                None => page,
            }
        } else if req.target == "/items?page=2" {
            TestResponse::ok(r#"[{"id":3}]"#)
        } else {
            TestResponse::status(404, "")
        }
    })
    .await;
    next_url.set(server.url("/items?page=2")).unwrap();

    let client = AsyncClient::new(async_config(None)).unwrap();
    let mut pager = client.paginate::<Item>(server.url("/items"));

    let mut total = 0;
    while let Some(page) = pager.next().await {
        for item in &page.items {
            total += item.id;
        }
    }
    assert_eq!(total, 6);
    assert_eq!(server.requests(), 2);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_after_shutdown_fails() {
    let server = TestServer::spawn(None, |_| TestResponse::ok("ok")).await;

    let client = AsyncClient::new(async_config(None)).unwrap();
    client.get(server.url("/warm")).await.unwrap();

    client.shutdown();
    let err = client.get(server.url("/late")).await.unwrap_err();
    assert!(matches!(err, Error::Unknown(_)));
    assert_eq!(client.metrics().acquire_shutdown, 1);
}

// ============================================================================
// Blocking client
// ============================================================================

fn blocking_config(base_url: Option<String>) -> ClientConfig {
    ClientConfig {
        base_url,
        request_timeout: Duration::from_secs(10),
        ..ClientConfig::default()
    }
}

fn server_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_blocking_get_and_post() {
    let rt = server_runtime();
    let server = rt.block_on(TestServer::spawn(None, |req| {
        if req.method == "POST" {
            TestResponse::ok(req.body.clone())
        } else {
            TestResponse::ok("get")
        }
    }));

    let client = Client::new(blocking_config(None)).unwrap();

    assert_eq!(client.get(server.url("/x")).unwrap().text(), "get");
    assert_eq!(client.post(server.url("/x"), "payload").unwrap().text(), "payload");
    assert_eq!(server.requests(), 2);
    // Both requests rode the same connection.
    assert_eq!(server.accepts(), 1);
}

#[test]
fn test_blocking_relative_base() {
    let rt = server_runtime();
    let server = rt.block_on(TestServer::spawn(None, |req| {
        if req.target == "/api/ping" {
            TestResponse::ok("pong")
        } else {
            TestResponse::status(404, "bad")
        }
    }));

    let client = Client::new(blocking_config(Some(server.url("/api")))).unwrap();
    assert_eq!(client.get("/ping").unwrap().text(), "pong");
    assert_eq!(client.get("ping").unwrap().text(), "pong");
}

#[test]
fn test_blocking_relative_without_base_fails() {
    let client = Client::new(blocking_config(None)).unwrap();
    assert!(client.get("/ping").unwrap_err().is_invalid_url());
}

#[test]
fn test_blocking_endpoint_switch() {
    let rt = server_runtime();
    let s1 = rt.block_on(TestServer::spawn(None, |_| TestResponse::ok("one")));
    let s2 = rt.block_on(TestServer::spawn(None, |_| TestResponse::ok("two")));

    let client = Client::new(blocking_config(None)).unwrap();

    assert_eq!(client.get(s1.url("/")).unwrap().text(), "one");
    assert_eq!(client.get(s2.url("/")).unwrap().text(), "two");
    assert_eq!(client.get(s1.url("/")).unwrap().text(), "one");

    // Switching endpoints replaces the single held connection each time.
    assert_eq!(s1.accepts(), 2);
    assert_eq!(s2.accepts(), 1);
}

#[test]
fn test_blocking_connection_close_allows_next_request() {
    let rt = server_runtime();
    let server = rt.block_on(TestServer::spawn(None, |req| {
        if req.target == "/first" {
            TestResponse::ok("first").closing()
        } else {
            TestResponse::ok("second")
        }
    }));

    let client = Client::new(blocking_config(None)).unwrap();
    assert_eq!(client.get(server.url("/first")).unwrap().text(), "first");
    assert_eq!(client.get(server.url("/second")).unwrap().text(), "second");
    assert_eq!(server.requests(), 2);
}

#[test]
fn test_blocking_unknown_method() {
    let client = Client::new(blocking_config(None)).unwrap();
    let err = client
        .send(Request::new(Method::Unknown, "http://127.0.0.1:1/x"))
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown HTTP method");
}

#[test]
fn test_blocking_verb_helpers_hit_correct_methods() {
    let rt = server_runtime();
    let server = rt.block_on(TestServer::spawn(None, |req| {
        TestResponse::ok(req.method.clone())
    }));

    let client = Client::new(blocking_config(None)).unwrap();
    let url = || server.url("/m");

    assert_eq!(client.get(url()).unwrap().text(), "GET");
    assert_eq!(client.delete(url()).unwrap().text(), "DELETE");
    assert_eq!(client.options(url()).unwrap().text(), "OPTIONS");
    assert_eq!(client.post(url(), "b").unwrap().text(), "POST");
    assert_eq!(client.put(url(), "b").unwrap().text(), "PUT");
    assert_eq!(client.patch(url(), "b").unwrap().text(), "PATCH");
    // HEAD responses carry no body; check the server saw the verb instead.
    client.head(url()).unwrap();
    assert_eq!(server.requests(), 7);
}

#[test]
fn test_blocking_get_json() {
    let rt = server_runtime();
    let server = rt.block_on(TestServer::spawn(None, |_| {
        TestResponse::ok(r#"{"id":42}"#)
    }));

    let client = Client::new(blocking_config(None)).unwrap();
    let item: Item = client.get_json(server.url("/item")).unwrap();
    assert_eq!(item.id, 42);
}
