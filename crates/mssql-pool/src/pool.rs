//! Pool set implementation.
//!
//! A [`PoolSet`] owns a fixed number of [`Pool`]s, each wrapping one native
//! pool. Leases are spread across pools by [`select_pool`]; a pool that has
//! never been used is only connected once the selection lands on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::lifecycle::{PoolState, select_pool};
use crate::native::{Connector, FailureNotifier, NativePool};

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// One native pool plus its connectivity state and lease counter.
pub struct Pool {
    index: usize,
    set_id: u64,
    native: Arc<dyn NativePool>,
    state: Mutex<PoolState>,
    /// Serializes connect attempts.
    connect_gate: tokio::sync::Mutex<()>,
    leases: AtomicU32,
    next_lease_id: AtomicU64,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

/// Internal metrics tracking.
#[derive(Debug, Default, Clone, Copy)]
struct PoolMetricsInner {
    connects: u64,
    connect_failures: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    releases: u64,
    prepares: u64,
    unprepare_failures: u64,
}

impl Pool {
    fn new(index: usize, set_id: u64, native: Arc<dyn NativePool>) -> Self {
        Self {
            index,
            set_id,
            native,
            state: Mutex::new(PoolState::Disconnected),
            connect_gate: tokio::sync::Mutex::new(()),
            leases: AtomicU32::new(0),
            next_lease_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        }
    }

    /// Position of the pool within its set.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current connectivity state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    /// Number of outstanding leases.
    #[must_use]
    pub fn leases(&self) -> u32 {
        self.leases.load(Ordering::Acquire)
    }

    /// Check if the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == PoolState::Closed
    }

    /// The wrapped native pool.
    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativePool> {
        &self.native
    }

    /// Snapshot of state and load.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            index: self.index,
            state: self.state(),
            in_use: self.leases(),
        }
    }

    /// Count a statement preparation.
    pub fn record_prepare(&self) {
        self.metrics.lock().prepares += 1;
    }

    /// Count a failed unprepare.
    pub fn record_unprepare_failure(&self) {
        self.metrics.lock().unprepare_failures += 1;
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics::from_inner(*self.metrics.lock(), self.created_at.elapsed())
    }

    /// Connect the native pool unless it already is.
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.state().is_connected() {
            return Ok(());
        }

        let _gate = self.connect_gate.lock().await;
        {
            let mut state = self.state.lock();
            match *state {
                PoolState::Connected => return Ok(()),
                PoolState::Closed => return Err(PoolError::Closed),
                PoolState::Disconnected | PoolState::Connecting => {
                    *state = PoolState::Connecting;
                }
            }
        }

        tracing::trace!(pool = self.index, "pool state: connecting");
        let outcome = self.native.connect().await;

        let mut state = self.state.lock();
        match outcome {
            Ok(()) => {
                if *state != PoolState::Closed {
                    *state = PoolState::Connected;
                }
                self.metrics.lock().connects += 1;
                tracing::info!(pool = self.index, "native pool connected");
                Ok(())
            }
            Err(source) => {
                if *state != PoolState::Closed {
                    *state = PoolState::Disconnected;
                }
                self.metrics.lock().connect_failures += 1;
                tracing::warn!(pool = self.index, error = %source, "native pool failed to connect");
                Err(PoolError::Connect {
                    index: self.index,
                    source,
                })
            }
        }
    }

    async fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), PoolState::Closed);
        if previous != PoolState::Closed {
            self.native.close().await;
            tracing::debug!(pool = self.index, "native pool closed");
        }
    }

    fn return_lease(&self) {
        // The counter never underflows, even if a closed pool was reset.
        let _ = self
            .leases
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("leases", &self.leases())
            .finish_non_exhaustive()
    }
}

/// A fixed set of native pools.
///
/// # Example
///
/// ```rust,ignore
/// let pools = PoolSet::new(PoolConfig::new().max_pools(2), &connector, notifier)?;
/// pools.connect_first().await?;
/// let mut lease = pools.acquire().await?;
/// pools.release(&mut lease)?;
/// pools.close().await;
/// ```
pub struct PoolSet {
    id: u64,
    config: PoolConfig,
    pools: Vec<Arc<Pool>>,
    closed: AtomicBool,
}

impl PoolSet {
    /// Build the set without connecting anything.
    pub fn new(
        config: PoolConfig,
        connector: &dyn Connector,
        notifier: FailureNotifier,
    ) -> Result<Self> {
        config.validate()?;

        let id = NEXT_SET_ID.fetch_add(1, Ordering::Relaxed);
        let pools = (0..config.max_pools as usize)
            .map(|index| {
                let native = connector.create_pool(index, Arc::clone(&notifier));
                Arc::new(Pool::new(index, id, native))
            })
            .collect();

        tracing::info!(
            set = id,
            pools = config.max_pools,
            connections_per_pool = config.connections_per_pool,
            "pool set created"
        );

        Ok(Self {
            id,
            config,
            pools,
            closed: AtomicBool::new(false),
        })
    }

    /// Identity of this set, stamped on every lease it hands out.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of pools in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Check if the set has no pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Get a pool by position.
    #[must_use]
    pub fn pool(&self, index: usize) -> Option<&Arc<Pool>> {
        self.pools.get(index)
    }

    /// Connect the first pool.
    pub async fn connect_first(&self) -> Result<Arc<Pool>> {
        let pool = self
            .pools
            .first()
            .ok_or(PoolError::Exhausted { pools: 0 })?;
        pool.ensure_connected().await?;
        Ok(Arc::clone(pool))
    }

    /// Lease a pool, connecting it first if the selection requires it.
    pub async fn acquire(&self) -> Result<Lease> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        let selection = select_pool(
            self.pools.iter().map(|p| (p.state(), p.leases())),
            self.config.saturation_threshold,
        )
        .ok_or(PoolError::Exhausted {
            pools: self.pools.len(),
        })?;

        let pool = self
            .pools
            .get(selection.index)
            .ok_or(PoolError::Exhausted {
                pools: self.pools.len(),
            })?;

        tracing::trace!(pool = selection.index, tier = ?selection.tier, "pool selected");

        // Counted before connecting so concurrent callers see the load; the
        // lease gives the slot back if the connect fails or is cancelled.
        let lease = Lease::new(Arc::clone(pool));
        if selection.needs_connect() {
            if let Err(e) = pool.ensure_connected().await {
                pool.metrics.lock().checkouts_failed += 1;
                return Err(e);
            }
        }

        pool.metrics.lock().checkouts_successful += 1;
        Ok(lease)
    }

    /// Check if `lease` was handed out by this set.
    #[must_use]
    pub fn owns(&self, lease: &Lease) -> bool {
        lease.pool.set_id == self.id
    }

    /// Return a lease.
    ///
    /// A lease from another set is rejected without touching any state.
    pub fn release(&self, lease: &mut Lease) -> Result<()> {
        if !self.owns(lease) {
            return Err(PoolError::ForeignLease);
        }
        lease.release()
    }

    /// Close every pool. Further acquires fail with [`PoolError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for pool in &self.pools {
            pool.close().await;
        }
        tracing::info!(set = self.id, "pool set closed");
    }

    /// Check if the set is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the current status of every pool.
    #[must_use]
    pub fn status(&self) -> PoolSetStatus {
        PoolSetStatus {
            pools: self.pools.iter().map(|p| p.status()).collect(),
        }
    }

    /// Get metrics aggregated over every pool.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let mut total = PoolMetricsInner::default();
        let mut uptime = Duration::ZERO;
        for pool in &self.pools {
            let inner = *pool.metrics.lock();
            total.connects += inner.connects;
            total.connect_failures += inner.connect_failures;
            total.checkouts_successful += inner.checkouts_successful;
            total.checkouts_failed += inner.checkouts_failed;
            total.releases += inner.releases;
            total.prepares += inner.prepares;
            total.unprepare_failures += inner.unprepare_failures;
            uptime = uptime.max(pool.created_at.elapsed());
        }
        PoolMetrics::from_inner(total, uptime)
    }
}

impl std::fmt::Debug for PoolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSet")
            .field("id", &self.id)
            .field("pools", &self.pools)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A lease on one pool.
///
/// Released exactly once: explicitly through [`Lease::release`] (or
/// [`PoolSet::release`]), otherwise when dropped.
pub struct Lease {
    pool: Arc<Pool>,
    id: u64,
    released: bool,
}

impl Lease {
    fn new(pool: Arc<Pool>) -> Self {
        pool.leases.fetch_add(1, Ordering::AcqRel);
        let id = pool.next_lease_id.fetch_add(1, Ordering::Relaxed);
        Self {
            pool,
            id,
            released: false,
        }
    }

    /// Lease number, unique within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The leased pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Identity of the set that handed out this lease.
    #[must_use]
    pub fn set_id(&self) -> u64 {
        self.pool.set_id
    }

    /// Check if the lease has been returned.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Check if the lease can still run requests.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.released && !self.pool.is_closed()
    }

    /// Return the lease to its pool.
    ///
    /// Returning a lease on a closed pool still succeeds; the lease is
    /// marked released and the event is logged.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(PoolError::AlreadyReleased);
        }
        self.released = true;
        self.pool.return_lease();
        self.pool.metrics.lock().releases += 1;

        if self.pool.is_closed() {
            tracing::debug!(
                pool = self.pool.index,
                lease = self.id,
                "lease returned to a closed pool"
            );
        } else {
            tracing::trace!(pool = self.pool.index, lease = self.id, "lease released");
        }
        Ok(())
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            tracing::trace!(
                pool = self.pool.index,
                lease = self.id,
                "lease dropped without release"
            );
            self.pool.return_lease();
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool.index)
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

/// Status information about one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Position in the set.
    pub index: usize,
    /// Connectivity state.
    pub state: PoolState,
    /// Outstanding leases.
    pub in_use: u32,
}

impl PoolStatus {
    /// Check if the pool is connected with no leases.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.is_connected() && self.in_use == 0
    }
}

/// Status of every pool in a set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSetStatus {
    /// Per-pool status, in set order.
    pub pools: Vec<PoolStatus>,
}

impl PoolSetStatus {
    /// Total outstanding leases.
    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.pools.iter().map(|p| p.in_use).sum()
    }

    /// Number of connected pools.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.pools.iter().filter(|p| p.state.is_connected()).count()
    }
}

/// Metrics collected from one pool or a whole set.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetrics {
    /// Successful native connects.
    pub connects: u64,
    /// Failed native connects.
    pub connect_failures: u64,
    /// Leases handed out.
    pub checkouts_successful: u64,
    /// Lease attempts that failed while connecting.
    pub checkouts_failed: u64,
    /// Leases explicitly returned.
    pub releases: u64,
    /// Statements prepared.
    pub prepares: u64,
    /// Unprepare calls that failed.
    pub unprepare_failures: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    fn from_inner(inner: PoolMetricsInner, uptime: Duration) -> Self {
        Self {
            connects: inner.connects,
            connect_failures: inner.connect_failures,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            releases: inner.releases,
            prepares: inner.prepares,
            unprepare_failures: inner.unprepare_failures,
            uptime,
        }
    }

    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::native::{NativeError, NativeErrorKind, NativeStatement};
    use async_trait::async_trait;
    use mssql_adapter_types::TypedParameter;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct StubPool {
        connects: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl NativePool for StubPool {
        async fn connect(&self) -> std::result::Result<(), NativeError> {
            tokio::task::yield_now().await;
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(NativeError::new(NativeErrorKind::Connection, "refused"));
            }
            Ok(())
        }

        async fn prepare(
            &self,
            _sql: &str,
            _params: &[TypedParameter],
        ) -> std::result::Result<Box<dyn NativeStatement>, NativeError> {
            Err(NativeError::new(NativeErrorKind::Prepare, "not scripted"))
        }

        async fn close(&self) {}
    }

    #[derive(Default)]
    struct StubConnector {
        pools: Mutex<Vec<Arc<StubPool>>>,
        fail: bool,
    }

    impl Connector for StubConnector {
        fn create_pool(&self, _index: usize, _notifier: FailureNotifier) -> Arc<dyn NativePool> {
            let pool = Arc::new(StubPool::default());
            pool.fail.store(self.fail, Ordering::SeqCst);
            self.pools.lock().push(Arc::clone(&pool));
            pool
        }
    }

    fn notifier() -> FailureNotifier {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_acquire_connects_lazily() {
        let connector = StubConnector::default();
        let set = PoolSet::new(PoolConfig::new().max_pools(3), &connector, notifier()).unwrap();
        assert_eq!(set.status().connected(), 0);

        set.connect_first().await.unwrap();
        let first = set.acquire().await.unwrap();
        assert_eq!(first.pool().index(), 0);

        // Pool 0 is busy, so the next lease brings up pool 1.
        let second = set.acquire().await.unwrap();
        assert_eq!(second.pool().index(), 1);
        assert_eq!(set.status().connected(), 2);
        assert_eq!(connector.pools.lock()[2].connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_pool() {
        let connector = StubConnector::default();
        let set = Arc::new(PoolSet::new(PoolConfig::new(), &connector, notifier()).unwrap());

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let set = Arc::clone(&set);
                tokio::spawn(async move { set.acquire().await })
            })
            .collect();

        let mut leases = Vec::new();
        for task in tasks {
            leases.push(task.await.unwrap().unwrap());
        }
        assert_eq!(set.status().in_use(), 10);
        assert_eq!(connector.pools.lock()[0].connects.load(Ordering::SeqCst), 1);

        for lease in &mut leases {
            set.release(lease).unwrap();
        }
        assert_eq!(set.status().in_use(), 0);
    }

    #[tokio::test]
    async fn test_foreign_lease_is_rejected() {
        let connector = StubConnector::default();
        let a = PoolSet::new(PoolConfig::new(), &connector, notifier()).unwrap();
        let b = PoolSet::new(PoolConfig::new(), &connector, notifier()).unwrap();

        let mut lease = a.acquire().await.unwrap();
        assert!(matches!(b.release(&mut lease), Err(PoolError::ForeignLease)));
        assert!(!lease.is_released());
        assert_eq!(a.status().in_use(), 1);
    }

    #[tokio::test]
    async fn test_release_exactly_once() {
        let connector = StubConnector::default();
        let set = PoolSet::new(PoolConfig::new(), &connector, notifier()).unwrap();

        let mut lease = set.acquire().await.unwrap();
        set.release(&mut lease).unwrap();
        assert!(matches!(
            set.release(&mut lease),
            Err(PoolError::AlreadyReleased)
        ));
        drop(lease);
        assert_eq!(set.status().in_use(), 0);
    }

    #[tokio::test]
    async fn test_dropped_lease_returns_slot() {
        let connector = StubConnector::default();
        let set = PoolSet::new(PoolConfig::new(), &connector, notifier()).unwrap();

        let lease = set.acquire().await.unwrap();
        assert_eq!(set.status().in_use(), 1);
        drop(lease);
        assert_eq!(set.status().in_use(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_pool_disconnected() {
        let connector = StubConnector {
            fail: true,
            ..Default::default()
        };
        let set = PoolSet::new(PoolConfig::new(), &connector, notifier()).unwrap();

        let err = set.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Connect { index: 0, .. }));
        let status = set.status();
        assert_eq!(status.pools[0].state, PoolState::Disconnected);
        assert_eq!(status.in_use(), 0);
        assert_eq!(set.metrics().checkouts_failed, 1);
    }

    #[tokio::test]
    async fn test_closed_set_rejects_acquire() {
        let connector = StubConnector::default();
        let set = PoolSet::new(PoolConfig::new(), &connector, notifier()).unwrap();
        let mut lease = set.acquire().await.unwrap();

        set.close().await;
        assert!(matches!(set.acquire().await, Err(PoolError::Closed)));
        assert!(!lease.is_usable());

        // Returning a lease after close still succeeds.
        set.release(&mut lease).unwrap();
        assert!(lease.is_released());
    }

    #[test]
    fn test_metrics_success_rate() {
        let metrics = PoolMetrics {
            connects: 1,
            connect_failures: 0,
            checkouts_successful: 9,
            checkouts_failed: 1,
            releases: 9,
            prepares: 9,
            unprepare_failures: 0,
            uptime: Duration::from_secs(60),
        };
        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
    }
}
