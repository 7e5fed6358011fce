use hashbrown::hash_map::EntryRef;

use super::Series;
use crate::{data_model::Attributes, hash::FastHashMap, key::SeriesKey};

/// Attribute marking the series that absorbs spans beyond the cardinality limit.
pub const OVERFLOW_ATTRIBUTE: &str = "otel.metric.overflow";

/// A map of series whose number of distinct keys is capped.
///
/// Once the limit is reached, lookups for keys that are not already tracked are routed to a single overflow series
/// instead. Tracked keys are never evicted to make room, and the overflow series does not count towards the limit.
pub struct LimitedSeriesMap<V> {
    limit: usize,
    series: FastHashMap<SeriesKey, Series<V>>,
    overflow: Option<Series<V>>,
}

impl<V> LimitedSeriesMap<V> {
    /// Creates an empty map. A limit of zero means unlimited.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            series: FastHashMap::default(),
            overflow: None,
        }
    }

    fn at_limit(&self) -> bool {
        self.limit > 0 && self.series.len() >= self.limit
    }

    /// Returns the series for the given key, creating it if necessary.
    ///
    /// `attributes` and `value` are only called when a series has to be created. The returned flag is `true` if the
    /// key was routed to the overflow series.
    pub fn get_or_create<A, F>(&mut self, key: &SeriesKey, now: u64, attributes: A, value: F) -> (&mut Series<V>, bool)
    where
        A: FnOnce() -> Attributes,
        F: FnOnce() -> V,
    {
        let at_limit = self.at_limit();
        match self.series.entry_ref(key) {
            EntryRef::Occupied(entry) => (entry.into_mut(), false),
            EntryRef::Vacant(entry) if !at_limit => (entry.insert(Series::new(attributes(), value(), now)), false),
            EntryRef::Vacant(_) => {
                let overflow = self.overflow.get_or_insert_with(|| {
                    let attributes = Attributes::new().with(OVERFLOW_ATTRIBUTE, true);
                    Series::new(attributes, value(), now)
                });
                (overflow, true)
            }
        }
    }

    /// Returns the number of individually tracked series, excluding the overflow series.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Returns `true` if no series are tracked individually.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Returns the tracked series for the given key, if any.
    pub fn get(&self, key: &SeriesKey) -> Option<&Series<V>> {
        self.series.get(key)
    }

    /// Returns the overflow series, if anything has overflowed.
    pub fn overflow(&self) -> Option<&Series<V>> {
        self.overflow.as_ref()
    }

    /// Returns every series, including the overflow series, keyed by its series key.
    ///
    /// The overflow series has no key.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Option<&SeriesKey>, &mut Series<V>)> {
        self.series
            .iter_mut()
            .map(|(key, series)| (Some(key), series))
            .chain(self.overflow.iter_mut().map(|series| (None, series)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Dimension, data_model::trace::Span, key::KeyBuilder};

    fn key(name: &str) -> SeriesKey {
        let mut builder = KeyBuilder::new(&[]);
        builder.build("svc", &Span::new(name), &[] as &[Dimension], &Attributes::new())
    }

    #[test]
    fn unlimited() {
        let mut map = LimitedSeriesMap::new(0);
        for i in 0..100 {
            let (series, overflowed) = map.get_or_create(&key(&i.to_string()), 0, Attributes::new, || 0u64);
            series.value += 1;
            assert!(!overflowed);
        }

        assert_eq!(map.len(), 100);
        assert!(map.overflow().is_none());
    }

    #[test]
    fn routes_new_keys_to_overflow() {
        let mut map = LimitedSeriesMap::new(2);
        let names = ["a", "b", "c", "d", "e"];

        for _ in 0..2 {
            for name in names {
                let (series, _) = map.get_or_create(&key(name), 0, Attributes::new, || 0u64);
                series.value += 1;
            }
        }

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&key("a")).map(|s| s.value), Some(2));
        assert_eq!(map.get(&key("b")).map(|s| s.value), Some(2));
        assert!(map.get(&key("c")).is_none());

        let overflow = map.overflow().expect("overflow series should exist");
        assert_eq!(overflow.value, 6);
        assert_eq!(overflow.attributes.get(OVERFLOW_ATTRIBUTE), Some(&true.into()));
        assert_eq!(map.iter_mut().count(), 3);
    }

    #[test]
    fn existing_keys_keep_updating_at_limit() {
        let mut map = LimitedSeriesMap::new(1);
        map.get_or_create(&key("a"), 0, Attributes::new, || 0u64);

        let (_, overflowed) = map.get_or_create(&key("b"), 0, Attributes::new, || 0u64);
        assert!(overflowed);

        let (series, overflowed) = map.get_or_create(&key("a"), 0, Attributes::new, || 0u64);
        assert!(!overflowed);
        series.value += 1;
        assert_eq!(map.get(&key("a")).map(|s| s.value), Some(1));
    }
}
