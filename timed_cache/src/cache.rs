//! Self-refreshing cached value.
//!
//! [`TimedCache`] keeps one value produced by a supplier and decides on every
//! read whether to serve it as-is, refresh it first, or retry because the
//! value is not good enough for the caller. Refreshes happen on the calling
//! thread; there is no background refresher.
//!
//! Two independent pieces of synchronization are involved:
//!
//! - an `RwLock` over the value, its stamps and the cached failure, held
//!   only while copying or replacing them, never across a supplier call;
//! - a [`ComputeGate`] bounding how many supplier calls run at once. Readers
//!   that find no free slot keep serving the current value.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{ConfigError, CreateError, SharedError};
use crate::gate::{ComputeGate, GatePermit};
use crate::tracker::{RefreshSummary, RefreshTracker};

type Supplier<T, E> = Box<dyn Fn() -> Result<T, E> + Send + Sync>;

/// When the state was last written. `None` means only an initial value is
/// present, which is always due for refresh.
type Stamp = Option<Instant>;

const DEFAULT_NAME: &str = "timed_cache";

struct CacheState<T, E> {
    value: T,
    /// Last value commit, or the first failure of an outage. Drives staleness.
    updated_at: Stamp,
    /// Last commit of any kind, including repeated failures. Paces refreshes.
    attempted_at: Stamp,
    error: Option<SharedError<E>>,
}

/// Consistent copy of the state plus the decisions derived from it.
struct Snapshot<T, E> {
    value: T,
    attempted_at: Stamp,
    error: Option<SharedError<E>>,
    must_refresh: bool,
    may_retry: bool,
}

fn has_elapsed(updated_at: Stamp, now: Instant, duration: Duration) -> bool {
    match updated_at {
        Some(at) => now.saturating_duration_since(at) >= duration,
        None => true,
    }
}

/// A value refreshed on demand from a fallible supplier.
///
/// Reads clone the stored value, so `T` should be cheap to clone; wrap large
/// values in an `Arc`.
pub struct TimedCache<T, E> {
    name: String,
    config: CacheConfig,
    supplier: Supplier<T, E>,
    state: RwLock<CacheState<T, E>>,
    gate: ComputeGate,
    clock: Arc<dyn Clock>,
    tracker: RefreshTracker,
}

/// Builder for [`TimedCache`].
pub struct CacheBuilder<T, E> {
    name: String,
    config: CacheConfig,
    supplier: Supplier<T, E>,
    initial: Option<T>,
    clock: Arc<dyn Clock>,
}

impl<T, E> CacheBuilder<T, E> {
    /// Name used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Seeds the cache without calling the supplier. The seed does not count
    /// as a computation, so the first read refreshes.
    pub fn initial_value(mut self, value: T) -> Self {
        self.initial = Some(value);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validates the config and, without an initial value, runs the first
    /// computation synchronously.
    pub fn build(mut self) -> Result<TimedCache<T, E>, CreateError<E>> {
        self.config.validate()?;
        let tracker = RefreshTracker::new();
        match self.initial.take() {
            Some(value) => Ok(self.assemble(value, None, tracker)),
            None => {
                tracker.record_started();
                let value = (self.supplier)().map_err(CreateError::Supplier)?;
                tracker.record_success();
                let now = self.clock.now();
                Ok(self.assemble(value, Some(now), tracker))
            }
        }
    }

    fn assemble(self, value: T, updated_at: Stamp, tracker: RefreshTracker) -> TimedCache<T, E> {
        debug!(cache = %self.name, seeded = updated_at.is_none(), "created cache");
        TimedCache {
            gate: ComputeGate::new(self.config.max_simultaneous_compute),
            name: self.name,
            config: self.config,
            supplier: self.supplier,
            state: RwLock::new(CacheState {
                value,
                updated_at,
                attempted_at: updated_at,
                error: None,
            }),
            clock: self.clock,
            tracker,
        }
    }
}

impl<T, E> TimedCache<T, E> {
    pub fn builder<F>(supplier: F) -> CacheBuilder<T, E>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        CacheBuilder {
            name: DEFAULT_NAME.to_string(),
            config: CacheConfig::default(),
            supplier: Box::new(supplier),
            initial: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Creates a cache and computes its first value right away. A failing
    /// supplier fails construction.
    pub fn new<F>(config: CacheConfig, supplier: F) -> Result<Self, CreateError<E>>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self::builder(supplier).config(config).build()
    }

    /// Creates a cache seeded with `initial`, which the first read replaces.
    pub fn with_initial<F>(config: CacheConfig, supplier: F, initial: T) -> Result<Self, ConfigError>
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        config.validate()?;
        let builder = Self::builder(supplier).config(config);
        Ok(builder.assemble(initial, None, RefreshTracker::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether the value is older than the refresh duration plus the stale
    /// threshold. During an outage the age counts from the first cached
    /// failure, so retries do not make the value look fresh. Never triggers a
    /// computation.
    pub fn is_stale(&self) -> bool {
        let updated_at = self.read_state().updated_at;
        has_elapsed(updated_at, self.clock.now(), self.config.stale_duration())
    }

    /// The cached failure, if any.
    pub fn error(&self) -> Option<SharedError<E>> {
        self.read_state().error.clone()
    }

    pub fn stats(&self) -> RefreshSummary {
        self.tracker.summary()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, CacheState<T, E>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, CacheState<T, E>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn commit_error(&self, error: &SharedError<E>) {
        if !self.config.cache_exceptions {
            return;
        }
        let mut state = self.write_state();
        let now = self.clock.now();
        if state.error.is_some() {
            // Keep the original failure and its stamp; only pace the next retry.
            state.attempted_at = Some(now);
        } else if has_elapsed(state.updated_at, now, self.config.retry_duration) {
            state.error = Some(Arc::clone(error));
            state.updated_at = Some(now);
            state.attempted_at = Some(now);
        } else {
            debug!(cache = %self.name, "not caching failure, value was refreshed within the retry window");
        }
    }
}

impl<T: Clone, E> TimedCache<T, E> {
    /// The stored value, without applying any freshness policy.
    pub fn value(&self) -> T {
        self.read_state().value.clone()
    }

    /// Returns the value, refreshing it first when it is due.
    pub fn get(&self) -> Result<T, SharedError<E>> {
        self.get_valid(|_| true)
    }

    /// Returns the value. When `is_valid` rejects it and the retry duration has
    /// passed since the last update, refreshes once and returns the result.
    pub fn get_valid(&self, is_valid: impl Fn(&T) -> bool) -> Result<T, SharedError<E>> {
        let snapshot = self.snapshot();
        if let Some(error) = &snapshot.error {
            return self.recover(&snapshot, error);
        }
        if snapshot.must_refresh || (snapshot.may_retry && !is_valid(&snapshot.value)) {
            if let Some(result) = self.try_refresh_since(snapshot.attempted_at, None) {
                return result;
            }
        }
        Ok(snapshot.value)
    }

    /// Applies `transform` to the chosen value. When `is_valid` rejects the
    /// projection and the retry duration has passed, refreshes once and
    /// projects the refreshed value instead.
    pub fn query<S>(
        &self,
        transform: impl Fn(&T) -> S,
        is_valid: impl Fn(&S) -> bool,
    ) -> Result<S, SharedError<E>> {
        let snapshot = self.snapshot();
        if let Some(error) = &snapshot.error {
            return self.recover(&snapshot, error).map(|value| transform(&value));
        }
        if snapshot.must_refresh {
            return match self.try_refresh_since(snapshot.attempted_at, None) {
                Some(result) => result.map(|value| transform(&value)),
                None => Ok(transform(&snapshot.value)),
            };
        }
        let result = transform(&snapshot.value);
        if is_valid(&result) || !snapshot.may_retry {
            return Ok(result);
        }
        match self.try_refresh_since(snapshot.attempted_at, None) {
            Some(refreshed) => refreshed.map(|value| transform(&value)),
            None => Ok(result),
        }
    }

    /// Tests `predicate` on the value, retrying once on `false` when the retry
    /// duration has passed.
    pub fn test(&self, predicate: impl Fn(&T) -> bool) -> Result<bool, SharedError<E>> {
        self.query(predicate, |matched| *matched)
    }

    /// Refreshes now, waiting for a free slot as long as it takes.
    pub fn refresh(&self) -> Result<T, SharedError<E>> {
        let _permit = self.gate.acquire();
        self.compute(None)
    }

    /// Refreshes if a slot is free immediately, or within `wait` when given.
    /// Returns `None` when no slot could be acquired.
    pub fn try_refresh(&self, wait: Option<Duration>) -> Option<Result<T, SharedError<E>>> {
        let _permit = self.acquire_slot(wait)?;
        Some(self.compute(None))
    }

    fn snapshot(&self) -> Snapshot<T, E> {
        let state = self.read_state();
        let now = self.clock.now();
        Snapshot {
            value: state.value.clone(),
            attempted_at: state.attempted_at,
            error: state.error.clone(),
            must_refresh: has_elapsed(state.attempted_at, now, self.config.refresh_duration),
            may_retry: has_elapsed(state.attempted_at, now, self.config.retry_duration),
        }
    }

    /// Read path while a failure is cached: retry when allowed, otherwise
    /// replay the failure.
    fn recover(
        &self,
        snapshot: &Snapshot<T, E>,
        error: &SharedError<E>,
    ) -> Result<T, SharedError<E>> {
        if snapshot.must_refresh || snapshot.may_retry {
            let wait = Some(self.config.exception_lock_duration);
            if let Some(result) = self.try_refresh_since(snapshot.attempted_at, wait) {
                return result;
            }
        }
        trace!(cache = %self.name, "replaying cached failure");
        self.tracker.record_replay();
        Err(Arc::clone(error))
    }

    fn acquire_slot(&self, wait: Option<Duration>) -> Option<GatePermit<'_>> {
        let permit = match wait {
            Some(wait) => self.gate.try_acquire_for(wait),
            None => self.gate.try_acquire(),
        };
        if permit.is_none() {
            self.tracker.record_slot_unavailable();
            debug!(cache = %self.name, "no refresh slot available, serving current state");
        }
        permit
    }

    fn try_refresh_since(
        &self,
        seen: Stamp,
        wait: Option<Duration>,
    ) -> Option<Result<T, SharedError<E>>> {
        let _permit = self.acquire_slot(wait)?;
        Some(self.compute(Some(seen)))
    }

    /// Calls the supplier and commits the outcome. Must hold a gate permit.
    ///
    /// With `seen`, a state written after that stamp is returned (or its
    /// failure replayed) instead of computing again.
    fn compute(&self, seen: Option<Stamp>) -> Result<T, SharedError<E>> {
        if let Some(seen) = seen {
            let state = self.read_state();
            if state.attempted_at > seen {
                if let Some(error) = &state.error {
                    self.tracker.record_replay();
                    return Err(Arc::clone(error));
                }
                trace!(cache = %self.name, "value refreshed while waiting for a slot");
                return Ok(state.value.clone());
            }
        }

        self.tracker.record_started();
        let started = self.clock.now();
        debug!(cache = %self.name, "refreshing");
        match (self.supplier)() {
            Ok(value) => {
                self.tracker.record_success();
                self.commit_value(&value, started);
                Ok(value)
            }
            Err(error) => {
                self.tracker.record_failure();
                warn!(cache = %self.name, "refresh failed");
                let error = Arc::new(error);
                self.commit_error(&error);
                Err(error)
            }
        }
    }

    fn commit_value(&self, value: &T, started: Instant) {
        let mut state = self.write_state();
        let superseded = state.error.is_none() && state.updated_at.is_some_and(|at| at > started);
        if superseded {
            self.tracker.record_superseded();
            debug!(cache = %self.name, "newer value already committed, keeping it");
            return;
        }
        let now = Some(self.clock.now());
        state.value = value.clone();
        state.error = None;
        state.updated_at = now;
        state.attempted_at = now;
    }
}

impl<T, E> fmt::Debug for TimedCache<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.tracker.summary())
            .finish_non_exhaustive()
    }
}
