//! # restpool — pooled HTTP/1.1 REST client
//!
//! A client-side HTTP/1.1 library that issues requests to arbitrary
//! origins over plaintext TCP or TLS, reuses keep-alive connections
//! through a per-origin pool, and exposes both an async and a blocking
//! API.
//!
//! ## Features
//!
//! - **Async-first** — built on Tokio; the pool is shareable across tasks
//! - **Blocking mirror** — [`Client`] for scripts and non-async code
//! - **Connection pooling** — per-endpoint and global caps, FIFO waiter
//!   queues, idle TTL / age / reuse-count reaping, and a per-endpoint
//!   circuit breaker
//! - **TLS** — rustls with SNI and OS trust-store roots (verification can
//!   be disabled for development)
//! - **Interceptors** — bearer-token and API-key request mutation
//! - **Pagination** — lazy RFC 5988 `Link`-header page walking
//! - **Typed responses** — JSON decoding via serde
//!
//! ## Quick start (async)
//!
//! ```ignore
//! use restpool::{AsyncClient, AsyncClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> restpool::Result<()> {
//!     let client = AsyncClient::new(AsyncClientConfig::default())?;
//!     let response = client.get("http://127.0.0.1:8080/health").await?;
//!     println!("{} {}", response.status_code, response.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Quick start (blocking)
//!
//! ```ignore
//! use restpool::{Client, ClientConfig};
//!
//! fn main() -> restpool::Result<()> {
//!     let client = Client::new(ClientConfig::default())?;
//!     let response = client.get("http://127.0.0.1:8080/health")?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod async_client;
pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod pagination;
pub mod pool;
pub mod url;

mod tls;

// ── Re-exports for ergonomic top-level usage ────────────────────────────────

pub use async_client::AsyncClient;
pub use client::Client;
pub use config::{AsyncClientConfig, ClientConfig};
pub use connection::{ConnectOptions, Connection};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use http::{Method, PreparedRequest, Request, Response};
pub use interceptor::{ApiKey, ApiKeyLocation, BearerAuth, RequestInterceptor};
pub use pagination::{Page, Paginator};
pub use pool::{Lease, Pool, PoolConfig, PoolMetricsSnapshot, PoolStats};
pub use url::UrlComponents;
