//! Last-emission timestamps for delta temporality.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::key::SeriesKey;

/// The metric a series belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricKind {
    /// Span counts.
    Calls,

    /// Span durations.
    Duration,

    /// Span event counts.
    Events,
}

/// Identifies a series across every resource and metric.
///
/// The overflow series of a metric has no series key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TimestampKey {
    resource: u64,
    metric: MetricKind,
    series: Option<SeriesKey>,
}

impl TimestampKey {
    /// Creates a new `TimestampKey`.
    pub fn new(resource: u64, metric: MetricKind, series: Option<SeriesKey>) -> Self {
        Self {
            resource,
            metric,
            series,
        }
    }
}

/// A bounded cache of the last time each series was emitted.
///
/// When full, the least recently used entry is evicted. Entries belonging to resources that no longer exist are never
/// removed explicitly, and simply age out.
pub struct DeltaTimestampCache {
    entries: LruCache<TimestampKey, u64>,
}

impl DeltaTimestampCache {
    /// Creates an empty cache holding at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Returns the last emission time of a series, marking it as recently used.
    pub fn get(&mut self, key: &TimestampKey) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Records the emission time of a series.
    pub fn put(&mut self, key: TimestampKey, timestamp: u64) {
        self.entries.put(key, timestamp);
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(resource: u64, metric: MetricKind) -> TimestampKey {
        TimestampKey::new(resource, metric, None)
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = DeltaTimestampCache::new(NonZeroUsize::new(2).unwrap());
        cache.put(key(1, MetricKind::Calls), 10);
        cache.put(key(2, MetricKind::Calls), 20);

        // Touch the first entry so that the second one is evicted next.
        assert_eq!(cache.get(&key(1, MetricKind::Calls)), Some(10));
        cache.put(key(3, MetricKind::Calls), 30);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(2, MetricKind::Calls)), None);
        assert_eq!(cache.get(&key(1, MetricKind::Calls)), Some(10));
        assert_eq!(cache.get(&key(3, MetricKind::Calls)), Some(30));
    }

    #[test]
    fn metric_kind_is_part_of_the_key() {
        let mut cache = DeltaTimestampCache::new(NonZeroUsize::new(4).unwrap());
        cache.put(key(1, MetricKind::Calls), 10);
        cache.put(key(1, MetricKind::Duration), 20);

        assert_eq!(cache.get(&key(1, MetricKind::Calls)), Some(10));
        assert_eq!(cache.get(&key(1, MetricKind::Duration)), Some(20));
        assert_eq!(cache.get(&key(1, MetricKind::Events)), None);
    }

    #[test]
    fn put_overwrites() {
        let mut cache = DeltaTimestampCache::new(NonZeroUsize::new(1).unwrap());
        cache.put(key(1, MetricKind::Calls), 10);
        cache.put(key(1, MetricKind::Calls), 15);
        assert_eq!(cache.get(&key(1, MetricKind::Calls)), Some(15));
        assert_eq!(cache.len(), 1);
    }
}
