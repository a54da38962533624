//! Lazily populated registry of per-key caches backed by `DashMap`.
//!
//! One sub-cache per external id (for example one [`TimedMap`](crate::TimedMap)
//! per project), created on first access and kept for the registry's lifetime.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// Thread-safe map from id to a shared sub-cache.
///
/// Creation is atomic per id: concurrent callers asking for the same missing
/// id run the builder once and all receive the same `Arc`. The builder runs
/// while that id's shard is locked, so it should not block on slow I/O;
/// prefer seeded caches that compute on first read.
pub struct CacheRegistry<Id, C> {
    caches: DashMap<Id, Arc<C>>,
}

impl<Id, C> CacheRegistry<Id, C>
where
    Id: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            caches: DashMap::new(),
        }
    }

    /// Returns the cache for `id`, building it with `build` if absent.
    pub fn get_or_create(&self, id: Id, build: impl FnOnce(&Id) -> C) -> Arc<C> {
        if let Some(existing) = self.caches.get(&id) {
            return Arc::clone(existing.value());
        }
        match self.caches.entry(id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let cache = Arc::new(build(entry.key()));
                debug!(id = ?entry.key(), "registered sub-cache");
                entry.insert(Arc::clone(&cache));
                cache
            }
        }
    }

    /// Like [`get_or_create`](Self::get_or_create) with a fallible builder.
    /// Nothing is registered when the builder fails.
    pub fn get_or_try_create<Err>(
        &self,
        id: Id,
        build: impl FnOnce(&Id) -> Result<C, Err>,
    ) -> Result<Arc<C>, Err> {
        if let Some(existing) = self.caches.get(&id) {
            return Ok(Arc::clone(existing.value()));
        }
        match self.caches.entry(id) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let cache = Arc::new(build(entry.key())?);
                debug!(id = ?entry.key(), "registered sub-cache");
                entry.insert(Arc::clone(&cache));
                Ok(cache)
            }
        }
    }

    pub fn get(&self, id: &Id) -> Option<Arc<C>> {
        self.caches.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: &Id) -> Option<Arc<C>> {
        self.caches.remove(id).map(|(_, cache)| cache)
    }

    pub fn ids(&self) -> Vec<Id> {
        self.caches.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl<Id, C> Default for CacheRegistry<Id, C>
where
    Id: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
