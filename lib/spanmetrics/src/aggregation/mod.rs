//! Per-resource aggregation state.

use std::collections::VecDeque;

use crate::{
    data_model::{
        metric::{
            Exemplar, ExponentialHistogramDataPoint, HistogramDataPoint, Metric, MetricData, NumberDataPoint,
            Temporality,
        },
        Attributes,
    },
    histogram::Histogram,
    timestamps::{DeltaTimestampCache, MetricKind, TimestampKey},
    unit::Unit,
};

mod limiter;
pub use self::limiter::{LimitedSeriesMap, OVERFLOW_ATTRIBUTE};

/// Exemplars sampled for a series during the current flush window.
///
/// Only the most recent exemplars, up to the configured maximum, are kept.
#[derive(Debug, Default)]
pub struct Exemplars {
    items: VecDeque<Exemplar>,
}

impl Exemplars {
    /// Adds an exemplar, dropping the oldest one if `max` exemplars are already held.
    pub fn push(&mut self, exemplar: Exemplar, max: usize) {
        if max == 0 {
            return;
        }
        while self.items.len() >= max {
            self.items.pop_front();
        }
        self.items.push_back(exemplar);
    }

    /// Removes and returns every held exemplar.
    pub fn take(&mut self) -> Vec<Exemplar> {
        self.items.drain(..).collect()
    }

    /// Returns the number of held exemplars.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no exemplars are held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A single aggregated series.
#[derive(Debug)]
pub struct Series<V> {
    /// Attributes emitted on the series' data points.
    pub attributes: Attributes,

    /// Aggregated value.
    pub value: V,

    /// Exemplars sampled since the last flush.
    pub exemplars: Exemplars,

    /// Whether the series has been emitted at least once.
    pub emitted: bool,

    /// When the series was created, in nanoseconds since the Unix epoch.
    pub created_at: u64,
}

impl<V> Series<V> {
    /// Creates a new series.
    pub fn new(attributes: Attributes, value: V, created_at: u64) -> Self {
        Self {
            attributes,
            value,
            exemplars: Exemplars::default(),
            emitted: false,
            created_at,
        }
    }
}

/// Returns the start timestamp of a series being flushed.
///
/// Cumulative series start when their scope was created. Delta series start when they were last flushed. If that is
/// not known, a series that was never flushed starts when it was created, and any other series starts at the flush
/// time itself. The flush time is then recorded for the next flush.
///
/// Timestamp keys outlive the scope that recorded them, so a cached timestamp older than the series itself belongs to
/// a previous incarnation of the resource and is ignored.
fn start_time<V>(
    ctx: &FlushContext<'_>, scope_created_at: u64, series: &Series<V>, timestamps: &mut DeltaTimestampCache,
    key: TimestampKey,
) -> u64 {
    match ctx.temporality {
        Temporality::Cumulative => scope_created_at,
        Temporality::Delta => {
            let fallback = if series.emitted { ctx.now } else { series.created_at };
            let start = timestamps
                .get(&key)
                .filter(|last_emitted| *last_emitted >= series.created_at)
                .unwrap_or(fallback);
            timestamps.put(key, ctx.now);
            start
        }
    }
}

/// Settings shared by every scope when building metrics.
pub struct FlushContext<'a> {
    /// Flush time, in nanoseconds since the Unix epoch.
    pub now: u64,

    /// Aggregation temporality.
    pub temporality: Temporality,

    /// Unit of the duration histogram.
    pub unit: Unit,

    /// Full name of the calls metric.
    pub calls_name: &'a str,

    /// Full name of the duration metric.
    pub duration_name: &'a str,

    /// Full name of the events metric.
    pub events_name: &'a str,
}

/// All aggregated state for a single resource.
pub struct AggregationScope {
    resource_attributes: Attributes,
    created_at: u64,
    marked: bool,
    last_seen: u64,

    /// Span counts, per series.
    pub calls: LimitedSeriesMap<u64>,

    /// Span durations, per series. `None` when histograms are disabled.
    pub durations: Option<LimitedSeriesMap<Histogram>>,

    /// Span event counts, per series. `None` when event metrics are disabled.
    pub events: Option<LimitedSeriesMap<u64>>,
}

impl AggregationScope {
    /// Creates an empty scope for a resource.
    pub fn new(
        resource_attributes: Attributes, now: u64, cardinality_limit: usize, histograms: bool, events: bool,
    ) -> Self {
        Self {
            resource_attributes,
            created_at: now,
            marked: true,
            last_seen: now,
            calls: LimitedSeriesMap::new(cardinality_limit),
            durations: histograms.then(|| LimitedSeriesMap::new(cardinality_limit)),
            events: events.then(|| LimitedSeriesMap::new(cardinality_limit)),
        }
    }

    /// Returns the attributes of the resource this scope aggregates.
    pub fn resource_attributes(&self) -> &Attributes {
        &self.resource_attributes
    }

    /// Returns when the scope was created, in nanoseconds since the Unix epoch.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Marks the scope as seen during the current cycle.
    #[inline]
    pub fn mark(&mut self) {
        self.marked = true;
    }

    /// Ends the current cycle, returning `true` if the scope has expired.
    ///
    /// A scope that was marked during the cycle is refreshed. Otherwise, it expires once at least `expiration` has
    /// passed since it was last refreshed.
    pub fn sweep(&mut self, now: u64, expiration: u64) -> bool {
        if std::mem::take(&mut self.marked) {
            self.last_seen = now;
            return false;
        }
        now.saturating_sub(self.last_seen) >= expiration
    }

    fn collect_sums(
        &mut self, ctx: &FlushContext<'_>, timestamps: &mut DeltaTimestampCache, fingerprint: u64, kind: MetricKind,
    ) -> Option<Vec<NumberDataPoint>> {
        let created_at = self.created_at;
        let series_map = match kind {
            MetricKind::Events => self.events.as_mut()?,
            _ => &mut self.calls,
        };

        let mut data_points = Vec::with_capacity(series_map.len() + 1);
        for (key, series) in series_map.iter_mut() {
            let timestamp_key = TimestampKey::new(fingerprint, kind, key.cloned());
            let start_time_unix_nano = start_time(ctx, created_at, series, timestamps, timestamp_key);

            // A cumulative series reports zero the first time it is seen, so that its first real value is
            // interpreted as an increase rather than as the starting point of the counter.
            let value = match ctx.temporality {
                Temporality::Cumulative if !series.emitted => 0,
                _ => series.value,
            };

            data_points.push(NumberDataPoint {
                attributes: series.attributes.clone(),
                start_time_unix_nano,
                time_unix_nano: ctx.now,
                value,
                exemplars: series.exemplars.take(),
            });

            series.emitted = true;
            if ctx.temporality == Temporality::Delta {
                series.value = 0;
            }
        }

        Some(data_points)
    }

    fn collect_histograms(
        &mut self, ctx: &FlushContext<'_>, timestamps: &mut DeltaTimestampCache, fingerprint: u64,
    ) -> Option<MetricData> {
        let created_at = self.created_at;
        let series_map = self.durations.as_mut()?;

        let mut explicit = Vec::new();
        let mut exponential = Vec::new();
        for (key, series) in series_map.iter_mut() {
            let timestamp_key = TimestampKey::new(fingerprint, MetricKind::Duration, key.cloned());
            let start_time_unix_nano = start_time(ctx, created_at, series, timestamps, timestamp_key);
            let attributes = series.attributes.clone();
            let exemplars = series.exemplars.take();

            match &series.value {
                Histogram::Explicit(h) => explicit.push(HistogramDataPoint {
                    attributes,
                    start_time_unix_nano,
                    time_unix_nano: ctx.now,
                    count: h.count(),
                    sum: h.sum(),
                    bucket_counts: h.bucket_counts().to_vec(),
                    explicit_bounds: h.bounds().to_vec(),
                    exemplars,
                }),
                Histogram::Exponential(h) => exponential.push(ExponentialHistogramDataPoint {
                    attributes,
                    start_time_unix_nano,
                    time_unix_nano: ctx.now,
                    count: h.count(),
                    sum: h.sum(),
                    scale: h.scale(),
                    zero_count: h.zero_count(),
                    positive: h.positive(),
                    negative: h.negative(),
                    exemplars,
                }),
            }

            series.emitted = true;
            if ctx.temporality == Temporality::Delta {
                series.value.reset();
            }
        }

        // Every series in a scope shares one strategy, so at most one of these is non-empty.
        let data = if exponential.is_empty() {
            MetricData::Histogram {
                temporality: ctx.temporality,
                data_points: explicit,
            }
        } else {
            MetricData::ExponentialHistogram {
                temporality: ctx.temporality,
                data_points: exponential,
            }
        };
        Some(data)
    }

    /// Builds the metrics for this scope.
    ///
    /// Under delta temporality, every emitted series is reset and its emission time recorded in `timestamps`.
    /// Exemplars are cleared regardless of temporality.
    pub fn collect(
        &mut self, ctx: &FlushContext<'_>, timestamps: &mut DeltaTimestampCache, fingerprint: u64,
    ) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(3);

        if let Some(data_points) = self.collect_sums(ctx, timestamps, fingerprint, MetricKind::Calls) {
            metrics.push(Metric::new(
                ctx.calls_name,
                "",
                MetricData::Sum {
                    temporality: ctx.temporality,
                    data_points,
                },
            ));
        }

        if let Some(data) = self.collect_histograms(ctx, timestamps, fingerprint) {
            metrics.push(Metric::new(ctx.duration_name, ctx.unit.as_str(), data));
        }

        if let Some(data_points) = self.collect_sums(ctx, timestamps, fingerprint, MetricKind::Events) {
            metrics.push(Metric::new(
                ctx.events_name,
                "",
                MetricData::Sum {
                    temporality: ctx.temporality,
                    data_points,
                },
            ));
        }

        metrics
    }
}
