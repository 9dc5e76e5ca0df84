//! Bounded cache of serialized coin records.

use std::sync::Mutex;

use lru_cache::LruCache;

use crate::model::Outpoint;

/// LRU cache mapping the textual outpoint form `"<hash>/<vout>"` to the
/// serialized coin bytes, so readers share the exact representation that is
/// persisted. Populated from committed state only: point reads fill it and
/// committing sessions write through; a dropped batch never touches it.
pub struct CoinCache {
    inner: Mutex<LruCache<String, Vec<u8>>>,
}

impl CoinCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, outpoint: &Outpoint) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().ok()?;
        inner.get_mut(&outpoint.to_string()).cloned()
    }

    pub fn insert(&self, outpoint: &Outpoint, bytes: Vec<u8>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert(outpoint.to_string(), bytes);
        }
    }

    pub fn remove(&self, outpoint: &Outpoint) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(&outpoint.to_string());
        }
    }

    pub fn contains(&self, outpoint: &Outpoint) -> bool {
        match self.inner.lock() {
            Ok(mut inner) => inner.contains_key(&outpoint.to_string()),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
