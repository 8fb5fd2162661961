//! Pool observability counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters and gauges tracking pool behavior.
///
/// Counters only ever increase; gauges mirror the pool's bookkeeping and
/// are refreshed whenever the pool's state changes.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub(crate) acquire_success: AtomicU64,
    pub(crate) acquire_timeout: AtomicU64,
    pub(crate) acquire_shutdown: AtomicU64,
    pub(crate) acquire_internal_error: AtomicU64,
    pub(crate) acquire_circuit_open: AtomicU64,
    pub(crate) connection_created: AtomicU64,
    pub(crate) connection_reused: AtomicU64,
    pub(crate) connection_pruned: AtomicU64,
    pub(crate) connection_dropped_unhealthy: AtomicU64,
    pub(crate) connection_dropped_reuse_limit: AtomicU64,
    pub(crate) connection_dropped_age_limit: AtomicU64,
    pub(crate) release_invalid_id: AtomicU64,
    pub(crate) circuit_breaker_opened: AtomicU64,
    pub(crate) circuit_breaker_closed: AtomicU64,
    pub(crate) total_in_use: AtomicU64,
    pub(crate) total_idle: AtomicU64,
    pub(crate) waiters_total: AtomicU64,
}

impl PoolMetrics {
    /// A point-in-time copy of every counter and gauge.
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            acquire_success: self.acquire_success.load(Ordering::Relaxed),
            acquire_timeout: self.acquire_timeout.load(Ordering::Relaxed),
            acquire_shutdown: self.acquire_shutdown.load(Ordering::Relaxed),
            acquire_internal_error: self.acquire_internal_error.load(Ordering::Relaxed),
            acquire_circuit_open: self.acquire_circuit_open.load(Ordering::Relaxed),
            connection_created: self.connection_created.load(Ordering::Relaxed),
            connection_reused: self.connection_reused.load(Ordering::Relaxed),
            connection_pruned: self.connection_pruned.load(Ordering::Relaxed),
            connection_dropped_unhealthy: self.connection_dropped_unhealthy.load(Ordering::Relaxed),
            connection_dropped_reuse_limit: self
                .connection_dropped_reuse_limit
                .load(Ordering::Relaxed),
            connection_dropped_age_limit: self.connection_dropped_age_limit.load(Ordering::Relaxed),
            release_invalid_id: self.release_invalid_id.load(Ordering::Relaxed),
            circuit_breaker_opened: self.circuit_breaker_opened.load(Ordering::Relaxed),
            circuit_breaker_closed: self.circuit_breaker_closed.load(Ordering::Relaxed),
            total_in_use: self.total_in_use.load(Ordering::Relaxed),
            total_idle: self.total_idle.load(Ordering::Relaxed),
            waiters_total: self.waiters_total.load(Ordering::Relaxed),
        }
    }
}

/// A plain-value snapshot of [`PoolMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub acquire_success: u64,
    pub acquire_timeout: u64,
    pub acquire_shutdown: u64,
    pub acquire_internal_error: u64,
    pub acquire_circuit_open: u64,
    pub connection_created: u64,
    pub connection_reused: u64,
    pub connection_pruned: u64,
    pub connection_dropped_unhealthy: u64,
    pub connection_dropped_reuse_limit: u64,
    pub connection_dropped_age_limit: u64,
    pub release_invalid_id: u64,
    pub circuit_breaker_opened: u64,
    pub circuit_breaker_closed: u64,
    pub total_in_use: u64,
    pub total_idle: u64,
    pub waiters_total: u64,
}
