//! Resource aggregation cache.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::{aggregation::AggregationScope, data_model::Attributes, hash::hash_single_fast};

/// Computes the fingerprint of a resource.
///
/// When `key_attributes` is empty, every attribute of the resource contributes to the fingerprint. Otherwise, only the
/// listed attributes do. Attributes are hashed in key order, so the order in which they were inserted does not matter.
pub fn resource_fingerprint(attributes: &Attributes, key_attributes: &[String]) -> u64 {
    let mut sorted = attributes.sorted();
    if !key_attributes.is_empty() {
        sorted.retain(|(key, _)| key_attributes.iter().any(|allowed| allowed == key));
    }
    hash_single_fast(&sorted)
}

/// A bounded cache of aggregation scopes, keyed by resource fingerprint.
///
/// When full, creating a scope evicts the least recently used one, along with all of its aggregated state.
pub struct ResourceCache {
    scopes: LruCache<u64, AggregationScope>,
}

impl ResourceCache {
    /// Creates an empty cache holding at most `capacity` scopes.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            scopes: LruCache::new(capacity),
        }
    }

    /// Returns the scope for the given fingerprint, creating it with `init` if it does not exist.
    ///
    /// The scope is marked as seen, and becomes the most recently used one. The returned flag is `true` if another
    /// scope had to be evicted to make room.
    pub fn get_or_create<F>(&mut self, fingerprint: u64, init: F) -> (&mut AggregationScope, bool)
    where
        F: FnOnce() -> AggregationScope,
    {
        let evicted = !self.scopes.contains(&fingerprint) && self.scopes.len() >= self.scopes.cap().get();
        let scope = self.scopes.get_or_insert_mut(fingerprint, init);
        scope.mark();
        (scope, evicted)
    }

    /// Returns the number of scopes.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Returns `true` if there are no scopes.
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Returns every scope along with its fingerprint, without changing their recency.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut AggregationScope)> {
        self.scopes.iter_mut().map(|(fingerprint, scope)| (*fingerprint, scope))
    }

    /// Removes every scope that has not been seen for at least `expiration` nanoseconds, returning how many were
    /// removed.
    ///
    /// Scopes seen since the previous sweep are refreshed instead. An expiration of zero disables expiry entirely.
    pub fn garbage_collect(&mut self, now: u64, expiration: u64) -> usize {
        if expiration == 0 {
            return 0;
        }

        let expired = self
            .scopes
            .iter_mut()
            .filter_map(|(fingerprint, scope)| scope.sweep(now, expiration).then_some(*fingerprint))
            .collect::<Vec<_>>();

        for fingerprint in &expired {
            self.scopes.pop(fingerprint);
        }

        expired.len()
    }
}
