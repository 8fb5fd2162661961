//! The asynchronous connection pool.
//!
//! A per-origin multiplexer of reusable keep-alive connections, bounded by
//! per-endpoint and global capacity. Acquirers that hit a capacity limit
//! park in FIFO waiter queues (one per bucket for endpoint capacity, one
//! global) and are woken one at a time by releases. Idle connections are
//! reaped by TTL, age, and reuse count; a per-endpoint circuit breaker
//! rejects acquisitions after repeated reported failures.
//!
//! The pool is fully thread-safe: a single internal mutex guards the
//! bookkeeping, it is never held across a suspension point, and waiter
//! wake-ups always fire after the lock is released.

mod bucket;
mod lease;
mod metrics;

pub use lease::Lease;
pub use metrics::{PoolMetrics, PoolMetricsSnapshot};

pub(crate) use lease::LeasedConn;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::connection::{ConnectOptions, Connection};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::tls;
use bucket::{Bucket, IdleEntry};

/// Connection pool limits and lifecycle settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cap on open connections across all endpoints.
    pub max_total_connections: usize,
    /// Cap on open connections per endpoint.
    pub max_connections_per_endpoint: usize,
    /// Idle connections older than this are pruned. Zero disables pruning.
    pub connection_idle_ttl: Duration,
    /// Eagerly close pruned connections.
    pub close_on_prune: bool,
    /// Close idle connections when the pool shuts down.
    pub close_on_shutdown: bool,
    /// Cap on an idle entry's reuse count before it is rotated out.
    /// The count restarts on each release.
    pub max_connection_reuse_count: u32,
    /// Lifetime cap on any single connection.
    pub max_connection_age: Duration,
    /// Consecutive reported failures that trip the circuit breaker.
    pub circuit_breaker_failure_threshold: usize,
    /// How long a tripped breaker rejects acquisitions.
    pub circuit_breaker_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total_connections: 10,
            max_connections_per_endpoint: 5,
            connection_idle_ttl: Duration::from_secs(30),
            close_on_prune: true,
            close_on_shutdown: true,
            max_connection_reuse_count: 1000,
            max_connection_age: Duration::from_secs(300),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time connection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle plus in-use connections across all buckets.
    pub total_open: usize,
    /// Idle connections across all buckets.
    pub total_idle: usize,
    /// Connections currently out on leases.
    pub total_in_use: usize,
}

/// Why an acquirer was parked. Fixed at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitReason {
    EndpointCapacity,
    GlobalCapacity,
}

/// A parked acquirer. Presence in the primary token map doubles as the
/// "active" flag: a releaser adopts a waiter by removing its token.
struct Waiter {
    endpoint: Endpoint,
    reason: WaitReason,
    tx: oneshot::Sender<()>,
}

enum TryAcquireOutcome {
    Acquired(LeasedConn),
    Shutdown,
    CircuitOpen,
    EndpointFull,
    GlobalFull,
}

/// Bookkeeping guarded by the pool mutex.
struct PoolState {
    buckets: HashMap<Endpoint, Bucket>,
    /// Primary waiter index; tokens in the secondary queues that are no
    /// longer present here are tombstones.
    waiters: HashMap<u64, Waiter>,
    /// Waiters parked on global capacity, FIFO.
    global_waiters: VecDeque<u64>,
    total_open: usize,
    total_in_use: usize,
    next_conn_id: u64,
    next_waiter_id: u64,
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    connect: ConnectOptions,
    tls: tokio_rustls::TlsConnector,
    alive: AtomicBool,
    metrics: PoolMetrics,
    state: Mutex<PoolState>,
}

/// A shareable handle to the connection pool.
///
/// Cloning is cheap; all clones drive the same pool. Leases post their
/// connections back from whatever thread drops them.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Create a pool. Connections inherit `connect` (timeouts, body cap,
    /// TLS verification mode).
    pub fn new(config: PoolConfig, connect: ConnectOptions) -> Self {
        let tls = tls::client_connector(connect.verify_tls);
        Self {
            shared: Arc::new(PoolShared {
                config,
                connect,
                tls,
                alive: AtomicBool::new(true),
                metrics: PoolMetrics::default(),
                state: Mutex::new(PoolState {
                    buckets: HashMap::new(),
                    waiters: HashMap::new(),
                    global_waiters: VecDeque::new(),
                    total_open: 0,
                    total_in_use: 0,
                    next_conn_id: 0,
                    next_waiter_id: 0,
                }),
            }),
        }
    }

    /// Non-blocking acquisition. Returns `None` if the pool is shutting
    /// down, the endpoint's circuit breaker is open, or capacity is full.
    pub fn try_acquire(&self, endpoint: &Endpoint) -> Option<Lease> {
        let endpoint = endpoint.clone().normalize();
        let mut st = self.shared.state.lock();
        match self
            .shared
            .try_acquire_locked(&mut st, &endpoint, Instant::now())
        {
            TryAcquireOutcome::Acquired(leased) => {
                self.shared.sync_gauges(&st);
                drop(st);
                self.shared
                    .metrics
                    .acquire_success
                    .fetch_add(1, Ordering::Relaxed);
                Some(Lease::new(Arc::downgrade(&self.shared), leased))
            }
            _ => {
                self.shared.sync_gauges(&st);
                None
            }
        }
    }

    /// Acquire a lease, waiting up to `timeout` for capacity. `None`
    /// waits indefinitely.
    ///
    /// Waiters are served FIFO within their class: a release into an
    /// endpoint wakes that endpoint's oldest waiter first, then the
    /// oldest global waiter.
    pub async fn acquire(&self, endpoint: &Endpoint, timeout: Option<Duration>) -> Result<Lease> {
        let endpoint = endpoint.clone().normalize();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let (waiter_id, rx) = {
                let mut st = self.shared.state.lock();
                match self
                    .shared
                    .try_acquire_locked(&mut st, &endpoint, Instant::now())
                {
                    TryAcquireOutcome::Acquired(leased) => {
                        self.shared.sync_gauges(&st);
                        drop(st);
                        self.shared
                            .metrics
                            .acquire_success
                            .fetch_add(1, Ordering::Relaxed);
                        return Ok(Lease::new(Arc::downgrade(&self.shared), leased));
                    }
                    TryAcquireOutcome::Shutdown => {
                        drop(st);
                        self.shared
                            .metrics
                            .acquire_shutdown
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(shutdown_error());
                    }
                    TryAcquireOutcome::CircuitOpen => {
                        drop(st);
                        self.shared
                            .metrics
                            .acquire_circuit_open
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(Error::NetworkError(format!(
                            "circuit breaker open for {}",
                            endpoint
                        )));
                    }
                    outcome @ (TryAcquireOutcome::EndpointFull | TryAcquireOutcome::GlobalFull) => {
                        let reason = match outcome {
                            TryAcquireOutcome::EndpointFull => WaitReason::EndpointCapacity,
                            _ => WaitReason::GlobalCapacity,
                        };
                        let (tx, rx) = oneshot::channel();
                        let id = st.next_waiter_id;
                        st.next_waiter_id += 1;

                        match reason {
                            WaitReason::EndpointCapacity => match st.buckets.get_mut(&endpoint) {
                                Some(bucket) => bucket.local_waiters.push_back(id),
                                None => st.global_waiters.push_back(id),
                            },
                            WaitReason::GlobalCapacity => st.global_waiters.push_back(id),
                        }
                        st.waiters.insert(
                            id,
                            Waiter {
                                endpoint: endpoint.clone(),
                                reason,
                                tx,
                            },
                        );
                        trace!(endpoint = %endpoint, ?reason, waiter = id, "parked acquirer");

                        // A release between the failed attempt above and the
                        // enqueue must not be lost: try once more while still
                        // holding the lock.
                        match self
                            .shared
                            .try_acquire_locked(&mut st, &endpoint, Instant::now())
                        {
                            TryAcquireOutcome::Acquired(leased) => {
                                st.waiters.remove(&id);
                                self.shared.sync_gauges(&st);
                                drop(st);
                                self.shared
                                    .metrics
                                    .acquire_success
                                    .fetch_add(1, Ordering::Relaxed);
                                return Ok(Lease::new(Arc::downgrade(&self.shared), leased));
                            }
                            TryAcquireOutcome::Shutdown => {
                                st.waiters.remove(&id);
                                drop(st);
                                self.shared
                                    .metrics
                                    .acquire_shutdown
                                    .fetch_add(1, Ordering::Relaxed);
                                return Err(shutdown_error());
                            }
                            _ => {}
                        }
                        self.shared.sync_gauges(&st);
                        (id, rx)
                    }
                }
            };

            // Park outside the lock. The timer and the releaser's wake share
            // this one suspension point.
            let wake = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx).await {
                    Ok(wake) => wake,
                    Err(_) => {
                        // Timer elapsed. If a releaser adopted this waiter in
                        // the same instant, the token is already gone and the
                        // wake-up must not be wasted.
                        let mut st = self.shared.state.lock();
                        let still_parked = st.waiters.remove(&waiter_id).is_some();
                        self.shared.sync_gauges(&st);
                        drop(st);
                        if !still_parked {
                            continue;
                        }
                        self.shared
                            .metrics
                            .acquire_timeout
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(Error::Timeout(format!(
                            "timed out waiting for a connection to {}",
                            endpoint
                        )));
                    }
                },
                None => rx.await,
            };

            match wake {
                Ok(()) => continue,
                Err(_) => {
                    // Sender dropped without firing: the pool drained us.
                    if self.shared.alive.load(Ordering::Acquire) {
                        self.shared
                            .metrics
                            .acquire_internal_error
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(Error::NetworkError(
                            "pool waiter abandoned unexpectedly".to_string(),
                        ));
                    }
                    self.shared
                        .metrics
                        .acquire_shutdown
                        .fetch_add(1, Ordering::Relaxed);
                    return Err(shutdown_error());
                }
            }
        }
    }

    /// Report a successful transaction against `endpoint`, closing its
    /// circuit breaker. The pool never calls this itself.
    pub fn report_success(&self, endpoint: &Endpoint) {
        let endpoint = endpoint.clone().normalize();
        let mut st = self.shared.state.lock();
        if let Some(bucket) = st.buckets.get_mut(&endpoint) {
            if bucket.consecutive_failures > 0 {
                bucket.consecutive_failures = 0;
                bucket.open_until = None;
                self.shared
                    .metrics
                    .circuit_breaker_closed
                    .fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %endpoint, "circuit breaker closed");
            }
        }
    }

    /// Report a failed transaction against `endpoint`. Hitting the
    /// configured threshold opens the circuit breaker for the configured
    /// window; further failures keep it open.
    pub fn report_failure(&self, endpoint: &Endpoint) {
        let endpoint = endpoint.clone().normalize();
        let now = Instant::now();
        let mut st = self.shared.state.lock();
        let bucket = st.buckets.entry(endpoint.clone()).or_default();
        bucket.consecutive_failures += 1;
        if bucket.consecutive_failures >= self.shared.config.circuit_breaker_failure_threshold {
            let was_open = bucket.circuit_open(now);
            bucket.open_until = Some(now + self.shared.config.circuit_breaker_timeout);
            if !was_open {
                self.shared
                    .metrics
                    .circuit_breaker_opened
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    endpoint = %endpoint,
                    failures = bucket.consecutive_failures,
                    "circuit breaker opened"
                );
            }
        }
    }

    /// Shut the pool down: future acquisitions fail, every parked waiter
    /// is woken with a shutdown error, and (if configured) idle
    /// connections are closed. Leases already out keep working against
    /// their sockets until dropped.
    pub fn shutdown(&self) {
        if !self.shared.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        let mut cancelled = Vec::new();
        {
            let mut st = self.shared.state.lock();
            let PoolState {
                buckets,
                waiters,
                global_waiters,
                total_open,
                ..
            } = &mut *st;

            for (_, waiter) in waiters.drain() {
                cancelled.push(waiter.tx);
            }
            global_waiters.clear();

            for bucket in buckets.values_mut() {
                bucket.local_waiters.clear();
                if self.shared.config.close_on_shutdown {
                    while let Some(mut entry) = bucket.idle.pop_front() {
                        entry.conn.close();
                        *total_open -= 1;
                    }
                }
            }
            self.shared.sync_gauges(&st);
        }

        debug!(waiters = cancelled.len(), "connection pool shut down");
        // Waiter cancellation happens outside the lock: dropping the
        // senders wakes every parked acquirer with a shutdown error.
        drop(cancelled);
    }

    /// Wait until no connections are out on leases, polling every 100 ms.
    /// Returns false if `timeout` elapses first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.shared.state.lock().total_in_use == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// False once [`shutdown`](Self::shutdown) has run.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Current connection counts.
    pub fn stats(&self) -> PoolStats {
        let st = self.shared.state.lock();
        PoolStats {
            total_open: st.total_open,
            total_idle: st.buckets.values().map(|b| b.idle.len()).sum(),
            total_in_use: st.total_in_use,
        }
    }

    /// Snapshot of the pool's counters and gauges.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("alive", &self.is_alive())
            .field("stats", &self.stats())
            .finish()
    }
}

fn shutdown_error() -> Error {
    Error::Unknown("connection pool is shutting down".to_string())
}

impl PoolShared {
    /// The acquisition fast path. Caller holds the lock.
    ///
    /// Prunes expired idle entries, rejects on shutdown or an open
    /// breaker, prefers reusing the oldest valid idle connection, and
    /// otherwise creates a fresh one if both capacity caps allow.
    fn try_acquire_locked(
        &self,
        st: &mut PoolState,
        endpoint: &Endpoint,
        now: Instant,
    ) -> TryAcquireOutcome {
        if !self.alive.load(Ordering::Acquire) {
            return TryAcquireOutcome::Shutdown;
        }

        self.prune_idle_locked(st, now);

        let PoolState {
            buckets,
            total_open,
            total_in_use,
            next_conn_id,
            ..
        } = st;
        let bucket = buckets.entry(endpoint.clone()).or_default();

        if bucket.circuit_open(now) {
            return TryAcquireOutcome::CircuitOpen;
        }

        // Reuse beats creating: pop idle entries until one validates.
        while let Some(mut entry) = bucket.idle.pop_front() {
            if !entry.conn.is_healthy() {
                self.metrics
                    .connection_dropped_unhealthy
                    .fetch_add(1, Ordering::Relaxed);
                *total_open -= 1;
                trace!(endpoint = %endpoint, "dropped unhealthy idle connection");
                continue;
            }
            if entry.reuse_count >= self.config.max_connection_reuse_count {
                entry.conn.close();
                self.metrics
                    .connection_dropped_reuse_limit
                    .fetch_add(1, Ordering::Relaxed);
                *total_open -= 1;
                trace!(endpoint = %endpoint, "dropped idle connection at reuse limit");
                continue;
            }
            if now.duration_since(entry.created) > self.config.max_connection_age {
                entry.conn.close();
                self.metrics
                    .connection_dropped_age_limit
                    .fetch_add(1, Ordering::Relaxed);
                *total_open -= 1;
                trace!(endpoint = %endpoint, "dropped idle connection at age limit");
                continue;
            }

            let id = *next_conn_id;
            *next_conn_id += 1;
            bucket.in_use.insert(id);
            *total_in_use += 1;
            self.metrics
                .connection_reused
                .fetch_add(1, Ordering::Relaxed);
            return TryAcquireOutcome::Acquired(LeasedConn {
                conn: entry.conn,
                endpoint: endpoint.clone(),
                id,
                created: entry.created,
                reuse_count: entry.reuse_count + 1,
            });
        }

        if bucket.open_count() >= self.config.max_connections_per_endpoint {
            return TryAcquireOutcome::EndpointFull;
        }
        if *total_open >= self.config.max_total_connections {
            return TryAcquireOutcome::GlobalFull;
        }

        // Fresh connection, no I/O yet; it connects lazily on first use.
        let conn = Connection::new(endpoint.clone(), self.connect.clone(), self.tls.clone());
        let id = *next_conn_id;
        *next_conn_id += 1;
        bucket.in_use.insert(id);
        *total_open += 1;
        *total_in_use += 1;
        self.metrics
            .connection_created
            .fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = %endpoint, id, "created connection");
        TryAcquireOutcome::Acquired(LeasedConn {
            conn,
            endpoint: endpoint.clone(),
            id,
            created: now,
            reuse_count: 0,
        })
    }

    /// Evict idle entries that outlived the idle TTL, in every bucket,
    /// and drop buckets with nothing left to remember.
    fn prune_idle_locked(&self, st: &mut PoolState, now: Instant) {
        let ttl = self.config.connection_idle_ttl;
        let PoolState {
            buckets,
            waiters,
            total_open,
            ..
        } = st;

        // A zero TTL disables eviction by idle age, not the bucket GC below.
        if !ttl.is_zero() {
            for bucket in buckets.values_mut() {
                while bucket
                    .idle
                    .front()
                    .is_some_and(|entry| now.duration_since(entry.last_used) > ttl)
                {
                    if let Some(mut entry) = bucket.idle.pop_front() {
                        if self.config.close_on_prune {
                            entry.conn.close();
                        }
                        *total_open -= 1;
                        self.metrics
                            .connection_pruned
                            .fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        // A bucket may only be forgotten once it is fully quiescent;
        // breaker state must survive connection churn.
        buckets.retain(|_, bucket| {
            bucket.local_waiters.retain(|id| waiters.contains_key(id));
            !bucket.idle.is_empty()
                || !bucket.in_use.is_empty()
                || !bucket.local_waiters.is_empty()
                || bucket.consecutive_failures > 0
                || bucket.circuit_open(now)
        });
    }

    /// Return a leased connection. Invoked from `Lease::drop`, possibly
    /// on a different thread than the acquirer's.
    pub(crate) fn release(&self, leased: LeasedConn) {
        let LeasedConn {
            mut conn,
            endpoint,
            id,
            created,
            reuse_count,
        } = leased;

        let woken = {
            let mut st = self.state.lock();
            let PoolState {
                buckets,
                waiters,
                global_waiters,
                total_open,
                total_in_use,
                ..
            } = &mut *st;

            let Some(bucket) = buckets.get_mut(&endpoint) else {
                self.metrics
                    .release_invalid_id
                    .fetch_add(1, Ordering::Relaxed);
                return;
            };
            if !bucket.in_use.remove(&id) {
                self.metrics
                    .release_invalid_id
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
            *total_in_use -= 1;

            if !self.alive.load(Ordering::Acquire) {
                // Shut down while this lease was out: do not re-idle.
                conn.close();
                *total_open -= 1;
            } else if conn.is_healthy() {
                trace!(endpoint = %endpoint, id, reuse_count, "returned connection to idle");
                bucket.idle.push_back(IdleEntry {
                    conn,
                    last_used: Instant::now(),
                    created,
                    // Reuse counting restarts on every release.
                    reuse_count: 0,
                });
            } else {
                self.metrics
                    .connection_dropped_unhealthy
                    .fetch_add(1, Ordering::Relaxed);
                *total_open -= 1;
                trace!(endpoint = %endpoint, id, "released connection was unhealthy");
            }

            // Capacity was freed either way; wake the oldest local waiter,
            // else the oldest global one.
            let woken = pop_waiter(buckets, waiters, global_waiters, &endpoint);
            self.sync_gauges(&st);
            woken
        };

        // Wake-ups never fire under the lock.
        if let Some(waiter) = woken {
            trace!(
                endpoint = %waiter.endpoint,
                reason = ?waiter.reason,
                "waking parked acquirer"
            );
            let _ = waiter.tx.send(());
        }
    }

    fn sync_gauges(&self, st: &PoolState) {
        self.metrics
            .total_in_use
            .store(st.total_in_use as u64, Ordering::Relaxed);
        let idle: usize = st.buckets.values().map(|b| b.idle.len()).sum();
        self.metrics.total_idle.store(idle as u64, Ordering::Relaxed);
        self.metrics
            .waiters_total
            .store(st.waiters.len() as u64, Ordering::Relaxed);
    }
}

/// Pop the next live waiter: local queue for `endpoint` first, then the
/// global queue. Tombstoned tokens are skipped and discarded.
fn pop_waiter(
    buckets: &mut HashMap<Endpoint, Bucket>,
    waiters: &mut HashMap<u64, Waiter>,
    global_waiters: &mut VecDeque<u64>,
    endpoint: &Endpoint,
) -> Option<Waiter> {
    if let Some(bucket) = buckets.get_mut(endpoint) {
        while let Some(id) = bucket.local_waiters.pop_front() {
            if let Some(waiter) = waiters.remove(&id) {
                return Some(waiter);
            }
        }
    }
    while let Some(id) = global_waiters.pop_front() {
        if let Some(waiter) = waiters.remove(&id) {
            return Some(waiter);
        }
    }
    None
}
