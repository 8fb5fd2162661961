//! Per-endpoint pool state.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use crate::connection::Connection;

/// A connection parked in a bucket's idle queue, with the bookkeeping
/// needed to enforce TTL, age, and reuse limits.
pub(crate) struct IdleEntry {
    pub(crate) conn: Connection,
    pub(crate) last_used: Instant,
    pub(crate) created: Instant,
    pub(crate) reuse_count: u32,
}

/// All pool state for one endpoint: the idle queue, the ids of leased
/// connections, the local waiter queue, and the circuit-breaker state.
///
/// A connection is never tracked as both idle and in use.
#[derive(Default)]
pub(crate) struct Bucket {
    /// Idle connections, oldest release first.
    pub(crate) idle: VecDeque<IdleEntry>,
    /// Ids of connections currently out on a lease.
    pub(crate) in_use: HashSet<u64>,
    /// Waiter tokens parked because this endpoint was full, FIFO.
    /// Cancelled tokens linger as tombstones until popped.
    pub(crate) local_waiters: VecDeque<u64>,
    /// Consecutive failures reported against this endpoint.
    pub(crate) consecutive_failures: usize,
    /// While set and in the future, acquisitions are rejected.
    pub(crate) open_until: Option<Instant>,
}

impl Bucket {
    /// Idle plus in-use connections.
    pub(crate) fn open_count(&self) -> usize {
        self.idle.len() + self.in_use.len()
    }

    /// True while the circuit breaker rejects acquisitions.
    pub(crate) fn circuit_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }
}
