//! Capacity-bounded eviction policies for regions.
//!
//! A policy only tracks key order; the region owns the entries and removes
//! whatever victims the policy hands back. Swapping the policy never changes
//! the region contract.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use stowage_core::RegionConfig;

use crate::key::CacheKey;

/// Decides which entries leave a region when it grows past its bound.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Record that `key` was stored. Returns the keys to evict, oldest first.
    fn record_insert(&self, key: &CacheKey) -> Vec<CacheKey>;

    /// Record a read hit on `key`.
    fn record_access(&self, key: &CacheKey);

    /// Record that `key` left the region for any other reason.
    fn record_remove(&self, key: &CacheKey);

    /// Forget every tracked key.
    fn clear(&self);
}

/// No bound; nothing is ever evicted by policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn record_insert(&self, _key: &CacheKey) -> Vec<CacheKey> {
        Vec::new()
    }

    fn record_access(&self, _key: &CacheKey) {}

    fn record_remove(&self, _key: &CacheKey) {}

    fn clear(&self) {}
}

/// Evicts the least recently used key once `capacity` is exceeded.
///
/// Uses `IndexMap` insertion order as recency: accessed keys move to the back,
/// victims are taken from the front.
#[derive(Debug)]
pub struct LeastRecentlyUsed {
    capacity: usize,
    order: Mutex<IndexMap<CacheKey, ()>>,
}

impl LeastRecentlyUsed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: Mutex::new(IndexMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn touch(order: &mut IndexMap<CacheKey, ()>, key: &CacheKey) -> bool {
        let Some(idx) = order.get_index_of(key) else {
            return false;
        };
        let last = order.len() - 1;
        order.move_index(idx, last);
        true
    }
}

impl EvictionPolicy for LeastRecentlyUsed {
    fn record_insert(&self, key: &CacheKey) -> Vec<CacheKey> {
        let mut order = self.order.lock();
        if !Self::touch(&mut order, key) {
            order.insert(key.clone(), ());
        }

        let mut victims = Vec::new();
        while order.len() > self.capacity {
            match order.shift_remove_index(0) {
                Some((victim, ())) => victims.push(victim),
                None => break,
            }
        }
        victims
    }

    fn record_access(&self, key: &CacheKey) {
        Self::touch(&mut self.order.lock(), key);
    }

    fn record_remove(&self, key: &CacheKey) {
        self.order.lock().shift_remove(key);
    }

    fn clear(&self) {
        self.order.lock().clear();
    }
}

/// Pick the policy matching a region configuration.
pub fn policy_for(config: &RegionConfig) -> Arc<dyn EvictionPolicy> {
    match config.capacity {
        Some(capacity) => Arc::new(LeastRecentlyUsed::new(capacity)),
        None => Arc::new(Unbounded),
    }
}
