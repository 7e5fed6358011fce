//! Configuration.

use std::time::Duration;

use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, DurationSecondsWithFrac};
use snafu::{ensure, Snafu};
use spanmetrics_config::deser::PermissiveBool;

use crate::unit::Unit;

/// Default namespace prefixed to every emitted metric name.
pub const DEFAULT_NAMESPACE: &str = "traces.span.metrics";

/// Default explicit histogram bucket boundaries, in milliseconds.
pub const DEFAULT_EXPLICIT_BUCKETS_MS: [f64; 16] = [
    2.0, 4.0, 6.0, 8.0, 10.0, 50.0, 100.0, 200.0, 400.0, 800.0, 1000.0, 1400.0, 2000.0, 5000.0, 10000.0, 15000.0,
];

const fn default_resource_metrics_cache_size() -> usize {
    1000
}

const fn default_delta_timestamp_cache_size() -> usize {
    1000
}

const fn default_flush_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_exponential_max_size() -> usize {
    160
}

const fn default_exemplars_max_per_data_point() -> usize {
    1
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_explicit_buckets() -> Vec<f64> {
    DEFAULT_EXPLICIT_BUCKETS_MS.to_vec()
}

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigError {
    /// Explicit bucket boundaries were not strictly increasing.
    #[snafu(display(
        "Explicit histogram buckets must be strictly increasing: bucket {} ({}) is not greater than the previous bucket ({}).",
        index,
        value,
        previous
    ))]
    UnorderedBuckets {
        /// Position of the offending boundary.
        index: usize,

        /// Offending boundary.
        value: f64,

        /// Boundary preceding the offending one.
        previous: f64,
    },

    /// An explicit bucket boundary was NaN or infinite.
    #[snafu(display("Explicit histogram bucket {} must be a finite number.", index))]
    NonFiniteBucket {
        /// Position of the offending boundary.
        index: usize,
    },

    /// Both explicit and exponential histograms were configured.
    #[snafu(display("Only one of `histogram.explicit` and `histogram.exponential` may be configured."))]
    AmbiguousHistogram,

    /// The exponential histogram maximum size was too small to hold any meaningful distribution.
    #[snafu(display("Exponential histogram `max_size` must be at least 2, got {}.", max_size))]
    ExponentialMaxSizeTooSmall {
        /// Configured maximum size.
        max_size: usize,
    },

    /// A cache size was set to zero.
    #[snafu(display("`{}` must be greater than zero.", field))]
    ZeroCacheSize {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The flush interval was zero.
    #[snafu(display("`metrics_flush_interval` must be greater than zero."))]
    ZeroFlushInterval,

    /// Exemplars were enabled with a per-data-point cap of zero.
    #[snafu(display("`exemplars.max_per_data_point` must be greater than zero when exemplars are enabled."))]
    ZeroExemplarCap,

    /// Span event metrics were enabled without any dimensions to group them by.
    #[snafu(display("`events.dimensions` must not be empty when `events.enabled` is set."))]
    EventsWithoutDimensions,
}

/// Aggregation temporality of the emitted metrics.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum AggregationTemporality {
    /// Values accumulate across flushes.
    #[default]
    #[serde(rename = "cumulative", alias = "AGGREGATION_TEMPORALITY_CUMULATIVE")]
    Cumulative,

    /// Values reset after every flush.
    #[serde(rename = "delta", alias = "AGGREGATION_TEMPORALITY_DELTA")]
    Delta,
}

/// An optional series dimension.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Dimension {
    /// Attribute name to look up on the span, then on the resource.
    pub name: String,

    /// Value used when neither the span nor the resource carry the attribute.
    ///
    /// When unset, the dimension is omitted entirely for that span.
    #[serde(default)]
    pub default: Option<String>,
}

impl Dimension {
    /// Creates a dimension with no default value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// Sets the default value of the dimension.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Explicit-bucket histogram configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ExplicitHistogramConfiguration {
    /// Upper bounds of each bucket, in the histogram unit.
    ///
    /// Defaults to `[2, 4, 6, 8, 10, 50, 100, 200, 400, 800, 1000, 1400, 2000, 5000, 10000, 15000]`.
    #[serde(default = "default_explicit_buckets")]
    pub buckets: Vec<f64>,
}

impl Default for ExplicitHistogramConfiguration {
    fn default() -> Self {
        Self {
            buckets: default_explicit_buckets(),
        }
    }
}

/// Exponential histogram configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ExponentialHistogramConfiguration {
    /// Maximum number of buckets, per sign, before the histogram reduces its resolution.
    ///
    /// Defaults to 160.
    #[serde(default = "default_exponential_max_size")]
    pub max_size: usize,
}

impl Default for ExponentialHistogramConfiguration {
    fn default() -> Self {
        Self {
            max_size: default_exponential_max_size(),
        }
    }
}

/// Duration histogram configuration.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct HistogramConfiguration {
    /// Whether to skip the duration histogram entirely.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub disable: bool,

    /// Unit in which durations are recorded.
    ///
    /// Defaults to milliseconds.
    #[serde(default)]
    pub unit: Unit,

    /// Explicit-bucket histogram settings. Used when neither strategy is configured.
    #[serde(default)]
    pub explicit: Option<ExplicitHistogramConfiguration>,

    /// Exponential histogram settings.
    #[serde(default)]
    pub exponential: Option<ExponentialHistogramConfiguration>,

    /// Additional dimensions applied to the duration histogram only.
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

/// Histogram strategy resolved from [`HistogramConfiguration`].
#[derive(Clone, Debug, PartialEq)]
pub enum HistogramStrategy {
    /// No duration histogram is produced.
    Disabled,

    /// Explicit bucket boundaries.
    Explicit {
        /// Upper bounds of each bucket.
        bounds: Vec<f64>,
    },

    /// Exponential buckets.
    Exponential {
        /// Maximum number of buckets per sign.
        max_size: usize,
    },
}

impl HistogramConfiguration {
    /// Returns the histogram strategy described by this configuration.
    pub fn strategy(&self) -> HistogramStrategy {
        if self.disable {
            return HistogramStrategy::Disabled;
        }

        match (&self.explicit, &self.exponential) {
            (_, Some(exponential)) => HistogramStrategy::Exponential {
                max_size: exponential.max_size,
            },
            (Some(explicit), None) => HistogramStrategy::Explicit {
                bounds: explicit.buckets.clone(),
            },
            (None, None) => HistogramStrategy::Explicit {
                bounds: default_explicit_buckets(),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.disable {
            return Ok(());
        }

        ensure!(
            self.explicit.is_none() || self.exponential.is_none(),
            AmbiguousHistogram
        );

        if let Some(explicit) = &self.explicit {
            for (index, value) in explicit.buckets.iter().enumerate() {
                ensure!(value.is_finite(), NonFiniteBucket { index });
                if index > 0 {
                    let previous = explicit.buckets[index - 1];
                    ensure!(
                        *value > previous,
                        UnorderedBuckets {
                            index,
                            value: *value,
                            previous
                        }
                    );
                }
            }
        }

        if let Some(exponential) = &self.exponential {
            ensure!(
                exponential.max_size >= 2,
                ExponentialMaxSizeTooSmall {
                    max_size: exponential.max_size
                }
            );
        }

        Ok(())
    }
}

/// Exemplar configuration.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ExemplarsConfiguration {
    /// Whether to attach exemplars to data points.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub enabled: bool,

    /// Maximum number of exemplars kept per data point, per flush. The most recent spans win.
    ///
    /// Defaults to 1.
    #[serde(default = "default_exemplars_max_per_data_point")]
    pub max_per_data_point: usize,
}

impl Default for ExemplarsConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            max_per_data_point: default_exemplars_max_per_data_point(),
        }
    }
}

/// Span event metrics configuration.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct EventsConfiguration {
    /// Whether to produce the `events` metric.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub enabled: bool,

    /// Dimensions resolved against each event's attributes, then the resource's attributes.
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

/// Span metrics configuration.
///
/// Controls which dimensions spans are grouped by, how durations are bucketed, how long aggregated state is retained,
/// and how often metrics are flushed downstream.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SpanMetricsConfiguration {
    /// Aggregation temporality of emitted metrics.
    ///
    /// Defaults to `cumulative`.
    #[serde(default)]
    pub(crate) aggregation_temporality: AggregationTemporality,

    /// Optional dimensions, applied to every metric, in order.
    #[serde(default)]
    pub(crate) dimensions: Vec<Dimension>,

    /// Additional dimensions applied to the `calls` metric only.
    #[serde(default)]
    pub(crate) calls_dimensions: Vec<Dimension>,

    /// Base dimensions to leave out of series keys and attributes.
    ///
    /// Recognized names are `service.name`, `span.name`, `span.kind`, and `status.code`. Anything else is ignored.
    #[serde(default)]
    pub(crate) exclude_dimensions: Vec<String>,

    /// Duration histogram settings.
    #[serde(default)]
    pub(crate) histogram: HistogramConfiguration,

    /// Maximum number of distinct resources to aggregate at once.
    ///
    /// When exceeded, the least recently used resource, and all of its aggregated state, is evicted.
    ///
    /// Defaults to 1000.
    #[serde(default = "default_resource_metrics_cache_size")]
    pub(crate) resource_metrics_cache_size: usize,

    /// Resource attributes used to tell resources apart.
    ///
    /// When empty, every resource attribute is used. Resources that agree on these attributes share aggregated state,
    /// even if they differ in other attributes.
    #[serde(default)]
    pub(crate) resource_metrics_key_attributes: Vec<String>,

    /// Maximum number of distinct series per metric, per resource.
    ///
    /// Spans that would create a series beyond the limit are folded into a single overflow series carrying the
    /// `otel.metric.overflow=true` attribute. The identity of folded series is lost.
    ///
    /// Defaults to 0 (unlimited).
    #[serde(default)]
    pub(crate) aggregation_cardinality_limit: usize,

    /// How often to flush metrics downstream, in seconds.
    ///
    /// Defaults to 60 seconds.
    #[serde_as(as = "DurationSecondsWithFrac<f64, Flexible>")]
    #[serde(default = "default_flush_interval")]
    pub(crate) metrics_flush_interval: Duration,

    /// How long a resource may go without spans before its aggregated state is dropped, in seconds.
    ///
    /// Defaults to 0 (never expire).
    #[serde_as(as = "DurationSecondsWithFrac<f64, Flexible>")]
    #[serde(default)]
    pub(crate) metrics_expiration: Duration,

    /// Maximum number of delta series whose last flush time is remembered.
    ///
    /// Series evicted from this cache start their next delta window at the flush time rather than at the previous
    /// flush.
    ///
    /// Defaults to 1000.
    #[serde(default = "default_delta_timestamp_cache_size")]
    pub(crate) delta_timestamp_cache_size: usize,

    /// Exemplar settings.
    #[serde(default)]
    pub(crate) exemplars: ExemplarsConfiguration,

    /// Span event metric settings.
    #[serde(default)]
    pub(crate) events: EventsConfiguration,

    /// Prefix for every emitted metric name.
    ///
    /// Defaults to `traces.span.metrics`.
    #[serde(default = "default_namespace")]
    pub(crate) namespace: String,

    /// Instrumentation scope names whose name and version are added as series dimensions.
    #[serde(default)]
    pub(crate) include_instrumentation_scope: Vec<String>,
}

impl SpanMetricsConfiguration {
    /// Creates a new `SpanMetricsConfiguration` with default values.
    pub fn with_defaults() -> Self {
        Self {
            aggregation_temporality: AggregationTemporality::default(),
            dimensions: Vec::new(),
            calls_dimensions: Vec::new(),
            exclude_dimensions: Vec::new(),
            histogram: HistogramConfiguration::default(),
            resource_metrics_cache_size: default_resource_metrics_cache_size(),
            resource_metrics_key_attributes: Vec::new(),
            aggregation_cardinality_limit: 0,
            metrics_flush_interval: default_flush_interval(),
            metrics_expiration: Duration::ZERO,
            delta_timestamp_cache_size: default_delta_timestamp_cache_size(),
            exemplars: ExemplarsConfiguration::default(),
            events: EventsConfiguration::default(),
            namespace: default_namespace(),
            include_instrumentation_scope: Vec::new(),
        }
    }

    /// Sets the aggregation temporality.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_temporality(mut self, temporality: AggregationTemporality) -> Self {
        self.aggregation_temporality = temporality;
        self
    }

    /// Sets the optional dimensions applied to every metric.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Sets the duration histogram settings.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_histogram(mut self, histogram: HistogramConfiguration) -> Self {
        self.histogram = histogram;
        self
    }

    /// Sets the flush interval.
    ///
    /// This variant is specifically for use in builder-style APIs.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.metrics_flush_interval = interval;
        self
    }

    /// Returns the aggregation temporality.
    pub fn temporality(&self) -> AggregationTemporality {
        self.aggregation_temporality
    }

    /// Returns the flush interval.
    pub fn flush_interval(&self) -> Duration {
        self.metrics_flush_interval
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If any setting is out of range or inconsistent with another, an error is returned describing the first problem
    /// found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.histogram.validate()?;

        ensure!(
            self.resource_metrics_cache_size > 0,
            ZeroCacheSize {
                field: "resource_metrics_cache_size"
            }
        );
        ensure!(
            self.delta_timestamp_cache_size > 0,
            ZeroCacheSize {
                field: "delta_timestamp_cache_size"
            }
        );
        ensure!(!self.metrics_flush_interval.is_zero(), ZeroFlushInterval);
        ensure!(
            !self.exemplars.enabled || self.exemplars.max_per_data_point > 0,
            ZeroExemplarCap
        );
        ensure!(
            !self.events.enabled || !self.events.dimensions.is_empty(),
            EventsWithoutDimensions
        );

        Ok(())
    }
}
