//! Resource pool implementation.
//!
//! A pool lends each owner at most one resource at a time for the duration
//! of a [`Pool::hold`] call. Free resources are kept on a LIFO list so the
//! most recently used (and warmest) one is handed out first. Checked-out
//! resources are tracked per owner, which lets nested holds by the same
//! owner share a resource and lets the pool reclaim resources from owners
//! that died without returning them.
//!
//! All bookkeeping happens under a single lock. Waiting for a free resource
//! does not: callers poll with a fixed sleep between attempts, so a released
//! resource may sit idle for up to one poll interval before a waiter takes
//! it. Waiters are not served in arrival order.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::Lifecycle;
use crate::owner::{Owner, OwnerId, OwnerLink};

/// A bounded pool of resources checked out one per owner.
///
/// # Example
///
/// ```rust
/// use affine_pool::{Owner, Pool, PoolError};
///
/// let pool = Pool::builder(|| Some(String::from("connection")))
///     .max_size(2)
///     .build()?;
///
/// let owner = Owner::current();
/// let len = pool.hold(&owner, |conn| Ok::<_, PoolError>(conn.len()))?;
/// assert_eq!(len, 10);
/// assert_eq!(pool.size(), 1);
/// # Ok::<(), PoolError>(())
/// ```
pub struct Pool<R> {
    config: PoolConfig,
    lifecycle: Lifecycle<R>,
    state: Mutex<PoolState<R>>,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

/// A checked-out resource and a link back to the owner holding it.
struct Held<R> {
    resource: Arc<R>,
    owner: OwnerLink,
}

/// Everything guarded by the pool lock.
struct PoolState<R> {
    /// Free resources, most recently released last.
    free: Vec<Arc<R>>,
    /// Checked-out resources keyed by owner.
    active: HashMap<OwnerId, Held<R>>,
}

impl<R> PoolState<R> {
    fn size(&self) -> usize {
        self.free.len() + self.active.len()
    }

    fn owned(&self, owner: OwnerId) -> Option<Arc<R>> {
        self.active.get(&owner).map(|held| Arc::clone(&held.resource))
    }

    fn release(&mut self, owner: OwnerId) {
        if let Some(held) = self.active.remove(&owner) {
            self.free.push(held.resource);
        }
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    resources_created: u64,
    resources_destroyed: u64,
    resources_salvaged: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    timeouts: u64,
}

impl<R> Pool<R> {
    /// Create a new pool builder around `factory`.
    pub fn builder<F>(factory: F) -> PoolBuilder<R>
    where
        F: Fn() -> Option<R> + Send + Sync + 'static,
    {
        PoolBuilder::new(factory)
    }

    /// Create a new pool with the given configuration and factory.
    ///
    /// For a destructor or finer control, use [`Pool::builder()`].
    pub fn new<F>(config: PoolConfig, factory: F) -> Result<Self, PoolError>
    where
        F: Fn() -> Option<R> + Send + Sync + 'static,
    {
        Self::with_lifecycle(config, Lifecycle::new(factory))
    }

    /// Create a new pool with the given configuration and lifecycle callbacks.
    pub fn with_lifecycle(config: PoolConfig, lifecycle: Lifecycle<R>) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::info!(
            max_size = config.max_size,
            timeout = ?config.pool_timeout,
            destructor = lifecycle.has_destructor(),
            "resource pool created"
        );

        Ok(Self {
            state: Mutex::new(PoolState {
                free: Vec::with_capacity(config.max_size),
                active: HashMap::with_capacity(config.max_size),
            }),
            config,
            lifecycle,
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        })
    }

    /// Run `work` with a resource checked out to `owner`.
    ///
    /// If `owner` already holds a resource (a nested call inside another
    /// `hold`), that resource is reused and left for the outer call to
    /// release. Otherwise a free resource is taken, or a new one created
    /// while below `max_size`. When neither is possible the call polls until
    /// one frees up or `pool_timeout` elapses.
    ///
    /// The resource goes back to the pool on every exit path, including a
    /// panic in `work`, unless `work` discarded it with
    /// [`discard_current`](Self::discard_current).
    ///
    /// # Errors
    ///
    /// Errors returned by `work` are passed through untouched. Pool failures
    /// are converted into the caller's error type:
    /// - [`PoolError::ResourceNotAvailable`] when `pool_timeout` is zero and
    ///   nothing is free.
    /// - [`PoolError::PoolTimeout`] when the wait exceeded `pool_timeout`.
    /// - [`PoolError::InvalidFactoryResult`] when the factory yields nothing.
    pub fn hold<T, E, F>(&self, owner: &Owner, work: F) -> Result<T, E>
    where
        F: FnOnce(&R) -> Result<T, E>,
        E: From<PoolError>,
    {
        let id = owner.id();

        let acquired = {
            let mut state = self.state.lock();
            if let Some(resource) = state.owned(id) {
                drop(state);
                tracing::trace!(owner = %id, "reusing resource already held by owner");
                return work(&*resource);
            }
            self.acquire(&mut state, owner)?
        };

        let resource = match acquired {
            Some(resource) => resource,
            None => self.wait_for(owner)?,
        };

        let guard = ReleaseGuard {
            pool: self,
            owner: id,
            resource,
        };
        work(&*guard.resource)
    }

    /// Permanently remove the resource held by `owner` from the pool.
    ///
    /// Meant to be called from inside a [`hold`](Self::hold) body when the
    /// resource turned out to be broken. The destructor runs on it and it is
    /// not returned to the free list; the enclosing `hold` then skips its
    /// release. Returns `false` if `owner` holds nothing.
    pub fn discard_current(&self, owner: &Owner) -> bool {
        let id = owner.id();
        let Some(held) = self.state.lock().active.remove(&id) else {
            return false;
        };

        self.lifecycle.destroy(&held.resource);
        self.metrics.lock().resources_destroyed += 1;
        tracing::debug!(owner = %id, "discarded bad resource");
        true
    }

    /// Destroy every free resource using the configured destructor.
    ///
    /// Checked-out resources are not touched and return to the (now empty)
    /// free list when their holds end. Returns the number destroyed.
    pub fn release_all(&self) -> usize {
        self.drain_free(|resource| self.lifecycle.destroy(resource))
    }

    /// Destroy every free resource using `destroy` instead of the configured
    /// destructor.
    ///
    /// See [`release_all`](Self::release_all).
    pub fn release_all_with<D>(&self, destroy: D) -> usize
    where
        D: FnMut(&R),
    {
        self.drain_free(destroy)
    }

    /// Number of resources currently in existence, free or checked out.
    ///
    /// This is a snapshot; it may be stale as soon as it is returned.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().size()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            available: state.free.len(),
            in_use: state.active.len(),
            total: state.size(),
            max: self.config.max_size,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.metrics.lock();
        PoolMetrics {
            resources_created: inner.resources_created,
            resources_destroyed: inner.resources_destroyed,
            resources_salvaged: inner.resources_salvaged,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            timeouts: inner.timeouts,
            uptime: self.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Give `owner` a resource, from the free list or freshly created.
    ///
    /// Returns `Ok(None)` when the pool is at capacity.
    fn acquire(
        &self,
        state: &mut PoolState<R>,
        owner: &Owner,
    ) -> Result<Option<Arc<R>>, PoolError> {
        let id = owner.id();
        debug_assert!(
            !state.active.contains_key(&id),
            "owner acquired twice without releasing"
        );

        let resource = match state.free.pop() {
            Some(resource) => resource,
            None => match self.make_new(state)? {
                Some(resource) => resource,
                None => return Ok(None),
            },
        };

        state.active.insert(
            id,
            Held {
                resource: Arc::clone(&resource),
                owner: owner.link(),
            },
        );
        self.metrics.lock().checkouts_successful += 1;
        tracing::trace!(owner = %id, "acquired resource");

        Ok(Some(resource))
    }

    fn make_new(&self, state: &mut PoolState<R>) -> Result<Option<Arc<R>>, PoolError> {
        if state.size() >= self.config.max_size {
            self.salvage(state);
        }

        if state.size() >= self.config.max_size {
            return Ok(None);
        }

        let resource = Arc::new(self.lifecycle.create()?);
        self.metrics.lock().resources_created += 1;
        tracing::debug!(size = state.size() + 1, "created new resource");

        Ok(Some(resource))
    }

    /// Return resources held by dead owners to the free list.
    ///
    /// Salvaged resources are recycled as they are, without running the
    /// destructor, so whatever state a dead owner left them in carries over
    /// to the next owner.
    fn salvage(&self, state: &mut PoolState<R>) -> usize {
        let dead: Vec<OwnerId> = state
            .active
            .iter()
            .filter(|(_, held)| !held.owner.is_alive())
            .map(|(id, _)| *id)
            .collect();

        for id in &dead {
            state.release(*id);
            tracing::warn!(owner = %id, "salvaged resource from dead owner");
        }

        if !dead.is_empty() {
            self.metrics.lock().resources_salvaged += dead.len() as u64;
        }
        dead.len()
    }

    /// Poll for a resource until one frees up or the timeout elapses.
    fn wait_for(&self, owner: &Owner) -> Result<Arc<R>, PoolError> {
        let timeout = self.config.pool_timeout;
        if timeout.is_zero() {
            self.metrics.lock().checkouts_failed += 1;
            tracing::trace!(owner = %owner.id(), "no resource available");
            return Err(PoolError::ResourceNotAvailable);
        }

        let interval = self.config.pool_sleep_interval;
        let start = Instant::now();
        // A timeout too large to represent as an instant never expires.
        let deadline = start.checked_add(timeout);
        let mut attempts: u64 = 0;

        loop {
            let now = Instant::now();
            let nap = match deadline {
                Some(deadline) if now < deadline => interval.min(deadline - now),
                None => interval,
                Some(_) => {
                    let waited = now - start;
                    {
                        let mut metrics = self.metrics.lock();
                        metrics.checkouts_failed += 1;
                        metrics.timeouts += 1;
                    }
                    tracing::warn!(
                        owner = %owner.id(),
                        waited = ?waited,
                        attempts,
                        "timed out waiting for pooled resource"
                    );
                    return Err(PoolError::PoolTimeout { waited });
                }
            };

            std::thread::sleep(nap);
            attempts += 1;

            let acquired = {
                let mut state = self.state.lock();
                self.acquire(&mut state, owner)?
            };
            if let Some(resource) = acquired {
                tracing::trace!(owner = %owner.id(), attempts, "acquired resource after waiting");
                return Ok(resource);
            }
        }
    }

    /// Return `resource` to the free list if `owner` still holds it.
    fn release_if_held(&self, owner: OwnerId, resource: &Arc<R>) {
        let mut state = self.state.lock();
        let still_held = state
            .active
            .get(&owner)
            .is_some_and(|held| Arc::ptr_eq(&held.resource, resource));

        if still_held {
            state.release(owner);
            tracing::trace!(owner = %owner, "released resource");
        } else {
            tracing::trace!(owner = %owner, "resource no longer held, skipping release");
        }
    }

    fn drain_free<D>(&self, mut destroy: D) -> usize
    where
        D: FnMut(&R),
    {
        let drained = std::mem::take(&mut self.state.lock().free);
        for resource in &drained {
            destroy(resource);
        }

        self.metrics.lock().resources_destroyed += drained.len() as u64;
        tracing::info!(count = drained.len(), "released all free resources");
        drained.len()
    }
}

impl<R> fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Releases a checked-out resource when a hold ends, however it ends.
struct ReleaseGuard<'a, R> {
    pool: &'a Pool<R>,
    owner: OwnerId,
    resource: Arc<R>,
}

impl<R> Drop for ReleaseGuard<'_, R> {
    fn drop(&mut self) {
        self.pool.release_if_held(self.owner, &self.resource);
    }
}

/// Builder for creating a resource pool.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use affine_pool::Pool;
///
/// let pool = Pool::builder(|| Some(Vec::<u8>::with_capacity(1024)))
///     .max_size(8)
///     .pool_timeout(Duration::from_millis(500))
///     .destructor(|buf: &Vec<u8>| println!("dropping {} byte buffer", buf.capacity()))
///     .build()
///     .unwrap();
/// assert_eq!(pool.config().max_size, 8);
/// ```
pub struct PoolBuilder<R> {
    pool_config: PoolConfig,
    lifecycle: Lifecycle<R>,
}

impl<R> PoolBuilder<R> {
    /// Create a new pool builder with default settings.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Option<R> + Send + Sync + 'static,
    {
        Self {
            pool_config: PoolConfig::default(),
            lifecycle: Lifecycle::new(factory),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the maximum number of resources.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.pool_config.max_size = size;
        self
    }

    /// Set the wait timeout. Zero disables waiting.
    #[must_use]
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.pool_timeout = timeout;
        self
    }

    /// Set the polling interval used while waiting.
    #[must_use]
    pub fn pool_sleep_interval(mut self, interval: Duration) -> Self {
        self.pool_config.pool_sleep_interval = interval;
        self
    }

    /// Set the destructor run on discarded resources.
    #[must_use]
    pub fn destructor<D>(mut self, destructor: D) -> Self
    where
        D: Fn(&R) + Send + Sync + 'static,
    {
        self.lifecycle = self.lifecycle.with_destructor(destructor);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<R>, PoolError> {
        Pool::with_lifecycle(self.pool_config, self.lifecycle)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of free resources.
    pub available: usize,
    /// Number of resources currently checked out.
    pub in_use: usize,
    /// Total number of resources.
    pub total: usize,
    /// Maximum allowed resources.
    pub max: usize,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Resources created by the factory since pool start.
    pub resources_created: u64,
    /// Resources destroyed by discard or release-all.
    pub resources_destroyed: u64,
    /// Resources reclaimed from dead owners.
    pub resources_salvaged: u64,
    /// Successful checkouts. Nested holds reusing a resource are not counted.
    pub checkouts_successful: u64,
    /// Failed checkouts (unavailable or timed out).
    pub checkouts_failed: u64,
    /// Failed checkouts that waited the full timeout.
    pub timeouts: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
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
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;

    use super::*;

    fn counting_pool(max_size: usize) -> (Pool<usize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let pool = Pool::builder(move || Some(counter.fetch_add(1, Ordering::SeqCst)))
            .max_size(max_size)
            .build()
            .unwrap();
        (pool, created)
    }

    /// Place a resource in the active map on behalf of `owner`.
    fn checkout(pool: &Pool<usize>, owner: &Owner) -> Option<Arc<usize>> {
        let mut state = pool.state.lock();
        pool.acquire(&mut state, owner).unwrap()
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 1,
            in_use: 1,
            total: 2,
            max: 4,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 4,
            total: 4,
            max: 4,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            available: 1,
            in_use: 1,
            total: 2,
            max: 4,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rate() {
        let metrics = PoolMetrics {
            resources_created: 4,
            resources_destroyed: 0,
            resources_salvaged: 0,
            checkouts_successful: 90,
            checkouts_failed: 10,
            timeouts: 10,
            uptime: Duration::from_secs(60),
        };
        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_defaults() {
        let pool = Pool::builder(|| Some(())).build().unwrap();
        assert_eq!(pool.config(), &PoolConfig::default());
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Pool::builder(|| Some(())).max_size(0).build();
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_acquire_reuses_most_recently_released() {
        let (pool, _) = counting_pool(4);
        let a = Owner::new();
        let b = Owner::new();

        let first = checkout(&pool, &a).unwrap();
        let second = checkout(&pool, &b).unwrap();
        {
            let mut state = pool.state.lock();
            state.release(a.id());
            state.release(b.id());
            assert_eq!(state.free.len(), 2);
        }

        let c = Owner::new();
        let reused = checkout(&pool, &c).unwrap();
        assert!(Arc::ptr_eq(&reused, &second));
        assert!(!Arc::ptr_eq(&reused, &first));
    }

    #[test]
    fn test_make_new_respects_capacity() {
        let (pool, created) = counting_pool(2);
        let a = Owner::new();
        let b = Owner::new();
        let c = Owner::new();

        assert!(checkout(&pool, &a).is_some());
        assert!(checkout(&pool, &b).is_some());
        assert!(checkout(&pool, &c).is_none());

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(!pool.state.lock().active.contains_key(&c.id()));
    }

    #[test]
    fn test_make_new_skips_salvage_below_capacity() {
        let (pool, _) = counting_pool(2);
        let dead = Owner::new();
        checkout(&pool, &dead).unwrap();
        drop(dead);

        // One slot is still free, so the dead owner keeps its entry.
        let live = Owner::new();
        checkout(&pool, &live).unwrap();
        assert_eq!(pool.state.lock().active.len(), 2);
        assert_eq!(pool.metrics().resources_salvaged, 0);
    }

    #[test]
    fn test_salvage_recycles_dead_owner_resource() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&destroyed);
        let pool = Pool::builder(|| Some(7usize))
            .max_size(1)
            .destructor(move |_: &usize| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        let dead = Owner::new();
        let dead_id = dead.id();
        let original = checkout(&pool, &dead).unwrap();
        drop(dead);

        {
            let mut state = pool.state.lock();
            assert_eq!(pool.salvage(&mut state), 1);
            assert!(!state.active.contains_key(&dead_id));
            assert_eq!(state.free.len(), 1);
            assert!(Arc::ptr_eq(&state.free[0], &original));
        }
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(pool.metrics().resources_salvaged, 1);
    }

    #[test]
    fn test_capacity_exhaustion_triggers_salvage() {
        let (pool, created) = counting_pool(1);
        let dead = Owner::new();
        let original = checkout(&pool, &dead).unwrap();
        drop(dead);

        // Salvage frees no capacity by itself: the reclaimed resource lands
        // on the free list and the next attempt picks it up.
        let next = Owner::new();
        assert!(checkout(&pool, &next).is_none());
        assert_eq!(pool.status().available, 1);

        let reused = checkout(&pool, &next).unwrap();
        assert!(Arc::ptr_eq(&reused, &original));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_if_held_skips_foreign_resource() {
        let (pool, _) = counting_pool(2);
        let owner = Owner::new();
        let held = checkout(&pool, &owner).unwrap();
        let stranger = Arc::new(99usize);

        pool.release_if_held(owner.id(), &stranger);
        assert_eq!(pool.status().in_use, 1);

        pool.release_if_held(owner.id(), &held);
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(pool.status().available, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Acquire(usize),
        Release(usize),
        Discard(usize),
        Kill(usize),
        ReleaseAll,
    }

    fn op_strategy(owners: usize) -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..owners).prop_map(Op::Acquire),
            3 => (0..owners).prop_map(Op::Release),
            1 => (0..owners).prop_map(Op::Discard),
            1 => (0..owners).prop_map(Op::Kill),
            1 => Just(Op::ReleaseAll),
        ]
    }

    proptest! {
        #[test]
        fn prop_size_and_membership_invariants(
            max_size in 1usize..5,
            ops in prop::collection::vec(op_strategy(6), 1..64),
        ) {
            let (pool, _) = counting_pool(max_size);
            let mut owners: Vec<Owner> = (0..6).map(|_| Owner::new()).collect();

            for op in ops {
                match op {
                    Op::Acquire(i) => {
                        let mut state = pool.state.lock();
                        if !state.active.contains_key(&owners[i].id()) {
                            pool.acquire(&mut state, &owners[i]).unwrap();
                        }
                    }
                    Op::Release(i) => pool.state.lock().release(owners[i].id()),
                    Op::Discard(i) => {
                        pool.discard_current(&owners[i]);
                    }
                    Op::Kill(i) => owners[i] = Owner::new(),
                    Op::ReleaseAll => {
                        pool.release_all();
                    }
                }

                let state = pool.state.lock();
                prop_assert!(state.size() <= max_size);

                let mut seen: Vec<*const usize> = state.free.iter().map(Arc::as_ptr).collect();
                seen.extend(state.active.values().map(|held| Arc::as_ptr(&held.resource)));
                let total = seen.len();
                seen.sort();
                seen.dedup();
                prop_assert_eq!(seen.len(), total);
            }
        }
    }
}
