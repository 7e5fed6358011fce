//! Metrics.

use super::{
    trace::{SpanId, TraceId},
    Attributes,
};

/// Aggregation temporality of a metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Temporality {
    /// Values accumulate across reporting intervals, from a fixed start time.
    Cumulative,

    /// Values cover only the interval since the previous report.
    Delta,
}

/// A sampled reference to the span that contributed to a data point.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Trace identifier of the sampled span.
    pub trace_id: TraceId,

    /// Span identifier of the sampled span.
    pub span_id: SpanId,

    /// Recorded value.
    pub value: f64,

    /// Time the value was recorded, in nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
}

/// A monotonic sum data point.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberDataPoint {
    /// Series attributes.
    pub attributes: Attributes,

    /// Start of the reporting window, in nanoseconds since the Unix epoch.
    pub start_time_unix_nano: u64,

    /// End of the reporting window, in nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,

    /// Value.
    pub value: u64,

    /// Exemplars.
    pub exemplars: Vec<Exemplar>,
}

/// An explicit-bucket histogram data point.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramDataPoint {
    /// Series attributes.
    pub attributes: Attributes,

    /// Start of the reporting window, in nanoseconds since the Unix epoch.
    pub start_time_unix_nano: u64,

    /// End of the reporting window, in nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,

    /// Number of recorded values.
    pub count: u64,

    /// Sum of recorded values.
    pub sum: f64,

    /// Count per bucket. Always one longer than `explicit_bounds`.
    pub bucket_counts: Vec<u64>,

    /// Upper bounds of each bucket, excluding the implicit overflow bucket.
    pub explicit_bounds: Vec<f64>,

    /// Exemplars.
    pub exemplars: Vec<Exemplar>,
}

/// A contiguous range of exponential histogram buckets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExponentialBuckets {
    /// Index of the first bucket.
    pub offset: i32,

    /// Count per bucket, starting at `offset`.
    pub bucket_counts: Vec<u64>,
}

/// An exponential histogram data point.
#[derive(Clone, Debug, PartialEq)]
pub struct ExponentialHistogramDataPoint {
    /// Series attributes.
    pub attributes: Attributes,

    /// Start of the reporting window, in nanoseconds since the Unix epoch.
    pub start_time_unix_nano: u64,

    /// End of the reporting window, in nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,

    /// Number of recorded values.
    pub count: u64,

    /// Sum of recorded values.
    pub sum: f64,

    /// Resolution of the bucket boundaries: the base is `2^(2^-scale)`.
    pub scale: i32,

    /// Number of values that were exactly zero.
    pub zero_count: u64,

    /// Buckets for positive values.
    pub positive: ExponentialBuckets,

    /// Buckets for negative values, by magnitude.
    pub negative: ExponentialBuckets,

    /// Exemplars.
    pub exemplars: Vec<Exemplar>,
}

/// The data of a metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricData {
    /// A monotonic sum.
    Sum {
        /// Temporality.
        temporality: Temporality,

        /// Data points.
        data_points: Vec<NumberDataPoint>,
    },

    /// An explicit-bucket histogram.
    Histogram {
        /// Temporality.
        temporality: Temporality,

        /// Data points.
        data_points: Vec<HistogramDataPoint>,
    },

    /// An exponential histogram.
    ExponentialHistogram {
        /// Temporality.
        temporality: Temporality,

        /// Data points.
        data_points: Vec<ExponentialHistogramDataPoint>,
    },
}

impl MetricData {
    /// Returns the number of data points.
    pub fn data_point_count(&self) -> usize {
        match self {
            Self::Sum { data_points, .. } => data_points.len(),
            Self::Histogram { data_points, .. } => data_points.len(),
            Self::ExponentialHistogram { data_points, .. } => data_points.len(),
        }
    }

    /// Returns the temporality.
    pub fn temporality(&self) -> Temporality {
        match self {
            Self::Sum { temporality, .. }
            | Self::Histogram { temporality, .. }
            | Self::ExponentialHistogram { temporality, .. } => *temporality,
        }
    }
}

/// A named metric.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    name: String,
    unit: &'static str,
    data: MetricData,
}

impl Metric {
    /// Creates a new `Metric`.
    pub fn new(name: impl Into<String>, unit: &'static str, data: MetricData) -> Self {
        Self {
            name: name.into(),
            unit,
            data,
        }
    }

    /// Returns the name of the metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the unit of the metric.
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// Returns the data of the metric.
    pub fn data(&self) -> &MetricData {
        &self.data
    }

    /// Returns the monotonic sum data points, if this metric is a sum.
    pub fn sum_data_points(&self) -> Option<&[NumberDataPoint]> {
        match &self.data {
            MetricData::Sum { data_points, .. } => Some(data_points),
            _ => None,
        }
    }

    /// Returns the explicit histogram data points, if this metric is an explicit-bucket histogram.
    pub fn histogram_data_points(&self) -> Option<&[HistogramDataPoint]> {
        match &self.data {
            MetricData::Histogram { data_points, .. } => Some(data_points),
            _ => None,
        }
    }

    /// Returns the exponential histogram data points, if this metric is an exponential histogram.
    pub fn exponential_histogram_data_points(&self) -> Option<&[ExponentialHistogramDataPoint]> {
        match &self.data {
            MetricData::ExponentialHistogram { data_points, .. } => Some(data_points),
            _ => None,
        }
    }
}

/// Metrics for a single resource.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceMetrics {
    resource_attributes: Attributes,
    scope_name: &'static str,
    metrics: Vec<Metric>,
}

impl ResourceMetrics {
    /// Creates a new `ResourceMetrics`.
    pub fn new(resource_attributes: Attributes, scope_name: &'static str, metrics: Vec<Metric>) -> Self {
        Self {
            resource_attributes,
            scope_name,
            metrics,
        }
    }

    /// Returns the attributes of the resource.
    pub fn resource_attributes(&self) -> &Attributes {
        &self.resource_attributes
    }

    /// Returns the name of the instrumentation scope that produced the metrics.
    pub fn scope_name(&self) -> &'static str {
        self.scope_name
    }

    /// Returns the metrics.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Returns the metric with the given name, if present.
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name() == name)
    }
}

/// A batch of metrics, grouped by resource.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsBatch {
    resource_metrics: Vec<ResourceMetrics>,
}

impl MetricsBatch {
    /// Creates a new `MetricsBatch`.
    pub fn new(resource_metrics: Vec<ResourceMetrics>) -> Self {
        Self { resource_metrics }
    }

    /// Returns the metrics, grouped by resource.
    pub fn resource_metrics(&self) -> &[ResourceMetrics] {
        &self.resource_metrics
    }

    /// Returns `true` if the batch holds no resources.
    pub fn is_empty(&self) -> bool {
        self.resource_metrics.is_empty()
    }

    /// Returns the total number of data points across all resources and metrics.
    pub fn data_point_count(&self) -> usize {
        self.resource_metrics
            .iter()
            .flat_map(|rm| rm.metrics())
            .map(|m| m.data().data_point_count())
            .sum()
    }
}
