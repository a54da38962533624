//! Map-shaped caches.
//!
//! [`TimedMap`] and [`TimedSet`] publish immutable `Arc` snapshots of a
//! collection and use the collection itself as the validity condition: a
//! missing key, an unmatched predicate or an empty collection allows a retry
//! refresh once the retry duration has passed.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheBuilder, TimedCache};
use crate::config::CacheConfig;
use crate::error::{ConfigError, SharedError};
use crate::tracker::RefreshSummary;

/// A key/value directory refreshed on demand.
///
/// Starts out empty, so the first access refreshes. "Key absent" and "map not
/// computed yet" look the same to callers.
pub struct TimedMap<K, V, E> {
    cache: TimedCache<Arc<HashMap<K, V>>, E>,
}

impl<K, V, E> TimedMap<K, V, E>
where
    K: Eq + Hash,
{
    pub fn new<F>(config: CacheConfig, supplier: F) -> Result<Self, ConfigError>
    where
        F: Fn() -> Result<HashMap<K, V>, E> + Send + Sync + 'static,
    {
        let cache = TimedCache::with_initial(
            config,
            move || supplier().map(Arc::new),
            Arc::new(HashMap::new()),
        )?;
        Ok(Self { cache })
    }

    /// A cache builder seeded with an empty map. Finish with
    /// `TimedMap::from(builder.build()?)`.
    pub fn builder<F>(supplier: F) -> CacheBuilder<Arc<HashMap<K, V>>, E>
    where
        F: Fn() -> Result<HashMap<K, V>, E> + Send + Sync + 'static,
    {
        TimedCache::builder(move || supplier().map(Arc::new)).initial_value(Arc::new(HashMap::new()))
    }

    /// Whether `key` is present, retrying once when it is not.
    pub fn contains<Q>(&self, key: &Q) -> Result<bool, SharedError<E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.test(|map| map.contains_key(key))
    }

    /// The value for `key`, retrying once when it is missing.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<V>, SharedError<E>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.cache
            .query(|map| map.get(key).cloned(), Option::is_some)
    }

    /// Some entry matching `predicate`, retrying once when none does.
    ///
    /// Map order is unspecified: encode any priority among matches in the
    /// predicate itself.
    pub fn find(
        &self,
        predicate: impl Fn(&K, &V) -> bool,
    ) -> Result<Option<(K, V)>, SharedError<E>>
    where
        K: Clone,
        V: Clone,
    {
        self.cache.query(
            |map| {
                map.iter()
                    .find(|(k, v)| predicate(k, v))
                    .map(|(k, v)| (k.clone(), v.clone()))
            },
            Option::is_some,
        )
    }

    /// Some value matching `predicate`, retrying once when none does.
    pub fn find_value(&self, predicate: impl Fn(&V) -> bool) -> Result<Option<V>, SharedError<E>>
    where
        V: Clone,
    {
        self.cache
            .query(|map| map.values().find(|v| predicate(v)).cloned(), Option::is_some)
    }

    /// The whole map. An empty map is never good enough to skip a retry.
    pub fn get_all(&self) -> Result<Arc<HashMap<K, V>>, SharedError<E>> {
        self.cache.get_valid(|map| !map.is_empty())
    }

    pub fn refresh(&self) -> Result<Arc<HashMap<K, V>>, SharedError<E>> {
        self.cache.refresh()
    }

    pub fn try_refresh(
        &self,
        wait: Option<Duration>,
    ) -> Option<Result<Arc<HashMap<K, V>>, SharedError<E>>> {
        self.cache.try_refresh(wait)
    }

    /// The stored map without any freshness policy.
    pub fn value(&self) -> Arc<HashMap<K, V>> {
        self.cache.value()
    }

    pub fn is_stale(&self) -> bool {
        self.cache.is_stale()
    }

    pub fn error(&self) -> Option<SharedError<E>> {
        self.cache.error()
    }

    pub fn stats(&self) -> RefreshSummary {
        self.cache.stats()
    }

    pub fn inner(&self) -> &TimedCache<Arc<HashMap<K, V>>, E> {
        &self.cache
    }
}

impl<K, V, E> From<TimedCache<Arc<HashMap<K, V>>, E>> for TimedMap<K, V, E> {
    fn from(cache: TimedCache<Arc<HashMap<K, V>>, E>) -> Self {
        Self { cache }
    }
}

/// A set refreshed on demand. Starts out empty.
pub struct TimedSet<T, E> {
    cache: TimedCache<Arc<HashSet<T>>, E>,
}

impl<T, E> TimedSet<T, E>
where
    T: Eq + Hash,
{
    pub fn new<F>(config: CacheConfig, supplier: F) -> Result<Self, ConfigError>
    where
        F: Fn() -> Result<HashSet<T>, E> + Send + Sync + 'static,
    {
        let cache = TimedCache::with_initial(
            config,
            move || supplier().map(Arc::new),
            Arc::new(HashSet::new()),
        )?;
        Ok(Self { cache })
    }

    pub fn builder<F>(supplier: F) -> CacheBuilder<Arc<HashSet<T>>, E>
    where
        F: Fn() -> Result<HashSet<T>, E> + Send + Sync + 'static,
    {
        TimedCache::builder(move || supplier().map(Arc::new)).initial_value(Arc::new(HashSet::new()))
    }

    pub fn contains<Q>(&self, value: &Q) -> Result<bool, SharedError<E>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.test(|set| set.contains(value))
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Result<Option<T>, SharedError<E>>
    where
        T: Clone,
    {
        self.cache
            .query(|set| set.iter().find(|v| predicate(v)).cloned(), Option::is_some)
    }

    pub fn get_all(&self) -> Result<Arc<HashSet<T>>, SharedError<E>> {
        self.cache.get_valid(|set| !set.is_empty())
    }

    pub fn refresh(&self) -> Result<Arc<HashSet<T>>, SharedError<E>> {
        self.cache.refresh()
    }

    pub fn try_refresh(
        &self,
        wait: Option<Duration>,
    ) -> Option<Result<Arc<HashSet<T>>, SharedError<E>>> {
        self.cache.try_refresh(wait)
    }

    pub fn value(&self) -> Arc<HashSet<T>> {
        self.cache.value()
    }

    pub fn is_stale(&self) -> bool {
        self.cache.is_stale()
    }

    pub fn error(&self) -> Option<SharedError<E>> {
        self.cache.error()
    }

    pub fn stats(&self) -> RefreshSummary {
        self.cache.stats()
    }

    pub fn inner(&self) -> &TimedCache<Arc<HashSet<T>>, E> {
        &self.cache
    }
}

impl<T, E> From<TimedCache<Arc<HashSet<T>>, E>> for TimedSet<T, E> {
    fn from(cache: TimedCache<Arc<HashSet<T>>, E>) -> Self {
        Self { cache }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, thiserror::Error)]
    #[error("directory unavailable")]
    struct DirectoryDown;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Map whose supplier returns whatever `source` currently holds.
    fn scripted(
        config: CacheConfig,
        clock: &ManualClock,
    ) -> (
        Arc<Mutex<HashMap<String, String>>>,
        Arc<AtomicU32>,
        TimedMap<String, String, DirectoryDown>,
    ) {
        let source = Arc::new(Mutex::new(HashMap::new()));
        let calls = Arc::new(AtomicU32::new(0));
        let (supplier_source, counter) = (Arc::clone(&source), Arc::clone(&calls));
        let cache = TimedMap::builder(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(supplier_source.lock().unwrap().clone())
        })
        .config(config)
        .clock(clock.clone())
        .build()
        .unwrap();
        (source, calls, TimedMap::from(cache))
    }

    fn put(source: &Mutex<HashMap<String, String>>, key: &str, value: &str) {
        source
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    #[test]
    fn missing_key_retries_after_retry_duration() {
        let clock = ManualClock::new();
        let (source, calls, map) = scripted(CacheConfig::new(ms(1000), ms(10)), &clock);

        assert_eq!(map.get("k").unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        put(&source, "k", "v");
        assert_eq!(map.get("k").unwrap(), None, "within retry window");

        clock.advance(ms(10));
        assert_eq!(map.get("k").unwrap(), Some("v".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn present_key_does_not_refresh() {
        let clock = ManualClock::new();
        let (source, calls, map) = scripted(CacheConfig::new(ms(1000), ms(10)), &clock);
        put(&source, "k", "v");

        assert_eq!(map.get("k").unwrap(), Some("v".to_string()));
        clock.advance(ms(100));
        assert!(map.contains("k").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contains_retries_on_absent_key() {
        let clock = ManualClock::new();
        let (source, _, map) = scripted(CacheConfig::new(ms(1000), ms(10)), &clock);
        put(&source, "a", "1");

        assert!(!map.contains("b").unwrap());
        put(&source, "b", "2");
        assert!(!map.contains("b").unwrap());
        clock.advance(ms(10));
        assert!(map.contains("b").unwrap());
    }

    #[test]
    fn find_and_find_value() {
        let clock = ManualClock::new();
        let (source, _, map) = scripted(CacheConfig::new(ms(1000), ms(10)), &clock);
        put(&source, "alice", "admin");
        put(&source, "bob", "viewer");

        let found = map.find(|_, role| role == "admin").unwrap();
        assert_eq!(found, Some(("alice".to_string(), "admin".to_string())));
        assert_eq!(
            map.find_value(|role| role.starts_with('v')).unwrap(),
            Some("viewer".to_string())
        );
        assert_eq!(map.find(|user, _| user == "carol").unwrap(), None);
    }

    #[test]
    fn empty_map_is_retried_by_get_all() {
        let clock = ManualClock::new();
        let (source, calls, map) = scripted(CacheConfig::new(ms(1000), ms(10)), &clock);

        assert!(map.get_all().unwrap().is_empty());
        put(&source, "k", "v");
        assert!(map.get_all().unwrap().is_empty());
        clock.advance(ms(10));
        assert_eq!(map.get_all().unwrap().len(), 1);
        clock.advance(ms(10));
        assert_eq!(map.get_all().unwrap().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn published_snapshots_are_not_mutated() {
        let clock = ManualClock::new();
        let (source, _, map) = scripted(CacheConfig::new(ms(10), ms(10)), &clock);
        put(&source, "k", "v1");
        let before = map.get_all().unwrap();

        put(&source, "k", "v2");
        clock.advance(ms(10));
        let after = map.get_all().unwrap();

        assert_eq!(before.get("k").map(String::as_str), Some("v1"));
        assert_eq!(after.get("k").map(String::as_str), Some("v2"));
    }

    #[test]
    fn supplier_failure_reaches_map_callers() {
        let map: TimedMap<String, String, DirectoryDown> =
            TimedMap::new(CacheConfig::default(), || Err(DirectoryDown)).unwrap();
        assert!(map.get("k").is_err());
        assert!(map.error().is_some());
        assert!(map.contains("k").is_err());
    }

    #[test]
    fn set_contains_and_find() {
        let clock = ManualClock::new();
        let source = Arc::new(Mutex::new(HashSet::from(["alpha".to_string()])));
        let supplier_source = Arc::clone(&source);
        let set: TimedSet<String, DirectoryDown> = TimedSet::from(
            TimedSet::builder(move || Ok(supplier_source.lock().unwrap().clone()))
                .config(CacheConfig::new(ms(1000), ms(10)))
                .clock(clock.clone())
                .build()
                .unwrap(),
        );

        assert!(set.contains("alpha").unwrap());
        source.lock().unwrap().insert("beta".to_string());
        assert!(!set.contains("beta").unwrap());
        clock.advance(ms(10));
        assert_eq!(
            set.find(|v| v.starts_with('b')).unwrap(),
            Some("beta".to_string())
        );
        assert_eq!(set.get_all().unwrap().len(), 2);
    }

    #[test]
    fn set_value_and_try_refresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let set: TimedSet<u32, DirectoryDown> = TimedSet::new(CacheConfig::default(), move || {
            Ok(HashSet::from([counter.fetch_add(1, Ordering::SeqCst) + 1]))
        })
        .unwrap();

        assert!(set.value().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let refreshed = set.try_refresh(None).expect("slot is free").unwrap();
        assert!(refreshed.contains(&1));
        assert!(set.value().contains(&1));

        let again = set.try_refresh(Some(ms(5))).expect("slot is free").unwrap();
        assert!(again.contains(&2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
