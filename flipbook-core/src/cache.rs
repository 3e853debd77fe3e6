//! Fixed-capacity, insertion-ordered cache with a disposal hook.
//!
//! Victims are chosen in insertion order among entries the caller reports as
//! unlocked. Locked entries are never evicted, so a cache whose entries are all
//! locked may temporarily hold more than `capacity` values; callers shrink it
//! back with [`BoundedCache::trim`] once locks are released.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use tracing::debug;

/// Values that own resources which must be released before they are dropped.
pub trait Dispose {
    fn dispose(&mut self);
}

pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
    V: Dispose,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Inserts `value`, disposing any previous value stored under `key`, then
    /// evicts unlocked entries until the cache fits. Returns the evicted keys.
    pub fn put<F>(&mut self, key: K, value: V, locked: F) -> Vec<K>
    where
        F: Fn(&K, &V) -> bool,
    {
        if let Some(mut previous) = self.entries.remove(&key) {
            previous.dispose();
            self.order.retain(|k| k != &key);
        }
        self.entries.insert(key, value);
        self.order.push_back(key);
        self.trim(locked)
    }

    /// Evicts the earliest-inserted unlocked entries while over capacity.
    pub fn trim<F>(&mut self, locked: F) -> Vec<K>
    where
        F: Fn(&K, &V) -> bool,
    {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            let victim = self
                .order
                .iter()
                .position(|key| match self.entries.get(key) {
                    Some(value) => !locked(key, value),
                    None => true,
                });
            let Some(position) = victim else {
                debug!(
                    len = self.entries.len(),
                    capacity = self.capacity,
                    "every cached entry is locked, eviction deferred"
                );
                break;
            };
            let Some(key) = self.order.remove(position) else {
                break;
            };
            if let Some(mut value) = self.entries.remove(&key) {
                value.dispose();
                evicted.push(key);
            }
        }
        evicted
    }

    /// Disposes and removes `key`. Returns false, leaving the entry in place,
    /// when it is absent or locked.
    pub fn remove<F>(&mut self, key: &K, locked: F) -> bool
    where
        F: Fn(&K, &V) -> bool,
    {
        match self.entries.get(key) {
            Some(value) if !locked(key, value) => {}
            _ => return false,
        }
        self.order.retain(|k| k != key);
        match self.entries.remove(key) {
            Some(mut value) => {
                value.dispose();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the keys in insertion order. Bulk operations iterate this
    /// snapshot rather than the live cache.
    pub fn keys(&self) -> Vec<K> {
        self.order.iter().copied().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|value| (key, value)))
    }

    pub fn dispose_all(&mut self) {
        for key in self.order.drain(..) {
            if let Some(mut value) = self.entries.remove(&key) {
                value.dispose();
            }
        }
        self.entries.clear();
    }
}
