//! Leases: exclusive, automatically returned borrows of pooled connections.

use std::sync::Weak;
use std::time::Instant;

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::http::{PreparedRequest, Response};
use crate::pool::PoolShared;

/// The connection plus the bookkeeping that travels with it while leased.
pub(crate) struct LeasedConn {
    pub(crate) conn: Connection,
    pub(crate) endpoint: Endpoint,
    pub(crate) id: u64,
    pub(crate) created: Instant,
    pub(crate) reuse_count: u32,
}

/// An exclusive borrow of a pool-owned connection.
///
/// Dropping the lease returns the connection to the pool, which idles it
/// if it is still healthy and discards it otherwise. Moving a lease moves
/// the return obligation with it. If the pool has been shut down (or
/// dropped entirely) by the time the lease is dropped, the connection is
/// closed without re-entering the pool's idle queue.
pub struct Lease {
    shared: Weak<PoolShared>,
    inner: Option<LeasedConn>,
}

impl Lease {
    pub(crate) fn new(shared: Weak<PoolShared>, inner: LeasedConn) -> Self {
        Self {
            shared,
            inner: Some(inner),
        }
    }

    /// The endpoint the leased connection is bound to.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.inner.as_ref().map(|leased| &leased.endpoint)
    }

    /// The pool-assigned id for this checkout.
    pub fn connection_id(&self) -> Option<u64> {
        self.inner.as_ref().map(|leased| leased.id)
    }

    /// Direct access to the borrowed connection.
    pub fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.inner.as_mut().map(|leased| &mut leased.conn)
    }

    /// Drive one request/response transaction on the borrowed connection.
    ///
    /// In-flight leases keep working against their live socket even after
    /// the pool has shut down; only the return path changes.
    pub async fn request(&mut self, prepared: &PreparedRequest) -> Result<Response> {
        match self.inner.as_mut() {
            Some(leased) => leased.conn.request(prepared).await,
            None => Err(Error::NetworkError(
                "lease no longer holds a connection".to_string(),
            )),
        }
    }

    /// Tear down the borrowed connection so the pool discards it on
    /// release instead of idling it.
    pub fn close(&mut self) {
        if let Some(leased) = self.inner.as_mut() {
            leased.conn.close();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(leased) = self.inner.take() {
            if let Some(shared) = self.shared.upgrade() {
                shared.release(leased);
            }
            // Pool is gone: dropping the connection closes its socket.
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("endpoint", &self.endpoint())
            .field("connection_id", &self.connection_id())
            .finish()
    }
}
