//! Concurrent id-keyed registry.
//!
//! Every operation takes the lock for the duration of one map access and
//! hands back owned values, so callers never hold a registry lock while
//! touching another object's lock.

use rustc_hash::FxHashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Map from string id to a shared, separately-locked object.
pub struct Registry<V> {
    entries: RwLock<FxHashMap<String, Arc<V>>>,
}

impl<V> Registry<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    /// Insert `value` under `id`, returning the entry it replaced.
    pub fn insert(&self, id: impl Into<String>, value: Arc<V>) -> Option<Arc<V>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), value)
    }

    pub fn remove(&self, id: &str) -> Option<Arc<V>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Copy of the current values. Later mutations are not reflected.
    pub fn snapshot(&self) -> Vec<Arc<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for Registry<V> {
    fn default() -> Self {
        Self::new()
    }
}
