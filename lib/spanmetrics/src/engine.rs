//! Span ingestion and metric building.

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use crate::{
    aggregation::{AggregationScope, FlushContext},
    cache::{resource_fingerprint, ResourceCache},
    clock::Clock,
    config::{AggregationTemporality, ConfigError, Dimension, SpanMetricsConfiguration},
    data_model::{
        metric::{Exemplar, MetricsBatch, ResourceMetrics, Temporality},
        trace::{InstrumentationScope, ResourceSpans, Span},
        AttributeValue, Attributes,
    },
    histogram::Histogram,
    key::{build_metric_name, KeyBuilder, SERVICE_NAME_KEY},
    telemetry::Telemetry,
    timestamps::DeltaTimestampCache,
    unit::Unit,
};

/// Name of the instrumentation scope attached to every emitted resource.
pub const SCOPE_NAME: &str = "spanmetrics";

const METRIC_NAME_CALLS: &str = "calls";
const METRIC_NAME_DURATION: &str = "duration";
const METRIC_NAME_EVENTS: &str = "events";

/// Full names of the emitted metrics.
#[derive(Clone, Debug)]
pub struct MetricNames {
    calls: String,
    duration: String,
    events: String,
}

impl MetricNames {
    fn new(namespace: &str) -> Self {
        Self {
            calls: build_metric_name(namespace, METRIC_NAME_CALLS),
            duration: build_metric_name(namespace, METRIC_NAME_DURATION),
            events: build_metric_name(namespace, METRIC_NAME_EVENTS),
        }
    }

    /// Returns the name of the span count metric.
    pub fn calls(&self) -> &str {
        &self.calls
    }

    /// Returns the name of the span duration metric.
    pub fn duration(&self) -> &str {
        &self.duration
    }

    /// Returns the name of the span event count metric.
    pub fn events(&self) -> &str {
        &self.events
    }
}

struct State {
    resources: ResourceCache,
    timestamps: DeltaTimestampCache,
    key_builder: KeyBuilder,
}

/// Aggregates spans into metrics.
///
/// Spans are counted, and their durations recorded, per resource and per series. All aggregated state lives behind a
/// single lock, which is taken once per ingested batch and once per flush.
pub struct SpanMetrics {
    temporality: Temporality,
    unit: Unit,
    names: MetricNames,
    calls_dimensions: Vec<Dimension>,
    duration_dimensions: Vec<Dimension>,
    events_dimensions: Vec<Dimension>,
    histogram: Option<Histogram>,
    events_enabled: bool,
    exemplars_enabled: bool,
    max_exemplars: usize,
    cardinality_limit: usize,
    key_attributes: Vec<String>,
    include_instrumentation_scope: Vec<String>,
    expiration: u64,
    clock: Arc<dyn Clock>,
    telemetry: Telemetry,
    state: Mutex<State>,
}

impl SpanMetrics {
    /// Creates a new `SpanMetrics` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn from_configuration(config: &SpanMetricsConfiguration, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let resource_capacity =
            NonZeroUsize::new(config.resource_metrics_cache_size).ok_or(ConfigError::ZeroCacheSize {
                field: "resource_metrics_cache_size",
            })?;
        let timestamps_capacity =
            NonZeroUsize::new(config.delta_timestamp_cache_size).ok_or(ConfigError::ZeroCacheSize {
                field: "delta_timestamp_cache_size",
            })?;

        let temporality = match config.aggregation_temporality {
            AggregationTemporality::Cumulative => Temporality::Cumulative,
            AggregationTemporality::Delta => Temporality::Delta,
        };

        let per_metric = |extra: &[Dimension]| {
            config
                .dimensions
                .iter()
                .chain(extra.iter())
                .cloned()
                .collect::<Vec<_>>()
        };

        Ok(Self {
            temporality,
            unit: config.histogram.unit,
            names: MetricNames::new(&config.namespace),
            calls_dimensions: per_metric(&config.calls_dimensions),
            duration_dimensions: per_metric(&config.histogram.dimensions),
            events_dimensions: per_metric(&config.events.dimensions),
            histogram: Histogram::from_strategy(&config.histogram.strategy()),
            events_enabled: config.events.enabled,
            exemplars_enabled: config.exemplars.enabled,
            max_exemplars: config.exemplars.max_per_data_point,
            cardinality_limit: config.aggregation_cardinality_limit,
            key_attributes: config.resource_metrics_key_attributes.clone(),
            include_instrumentation_scope: config.include_instrumentation_scope.clone(),
            expiration: config.metrics_expiration.as_nanos() as u64,
            clock,
            telemetry: Telemetry::new(),
            state: Mutex::new(State {
                resources: ResourceCache::new(resource_capacity),
                timestamps: DeltaTimestampCache::new(timestamps_capacity),
                key_builder: KeyBuilder::new(&config.exclude_dimensions),
            }),
        })
    }

    #[cfg(test)]
    fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Returns the names of the emitted metrics.
    pub fn metric_names(&self) -> &MetricNames {
        &self.names
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        // The state is plain data, so it stays usable even if a previous holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the number of resources currently being aggregated.
    pub fn active_resources(&self) -> usize {
        self.lock_state().resources.len()
    }

    /// Aggregates a batch of spans.
    ///
    /// Resources without a `service.name` attribute are skipped.
    pub fn consume_traces(&self, batch: &[ResourceSpans]) {
        let now = self.clock.now();
        let mut spans_received = 0;

        let mut state = self.lock_state();
        let State {
            resources, key_builder, ..
        } = &mut *state;

        for resource_spans in batch {
            let resource_attributes = resource_spans.resource().attributes();
            let Some(service_name) = resource_attributes.get(SERVICE_NAME_KEY).and_then(AttributeValue::as_str) else {
                debug!("Skipping resource without a service name.");
                continue;
            };

            let fingerprint = resource_fingerprint(resource_attributes, &self.key_attributes);
            let (scope, evicted) = resources.get_or_create(fingerprint, || {
                AggregationScope::new(
                    resource_attributes.clone(),
                    now,
                    self.cardinality_limit,
                    self.histogram.is_some(),
                    self.events_enabled,
                )
            });
            if evicted {
                self.telemetry.increment_resources_evicted();
            }

            for scope_spans in resource_spans.scope_spans() {
                let instrumentation_scope = self.included_scope(scope_spans.scope());
                for span in scope_spans.spans() {
                    spans_received += 1;
                    let ctx = SpanContext {
                        service_name,
                        span,
                        instrumentation_scope,
                        resource_attributes,
                        now,
                    };
                    self.aggregate_span(key_builder, scope, &ctx);
                }
            }
        }

        self.telemetry.set_active_resources(resources.len());
        self.telemetry.increment_spans_received(spans_received);
    }

    fn included_scope<'a>(&self, scope: &'a InstrumentationScope) -> Option<&'a InstrumentationScope> {
        self.include_instrumentation_scope
            .iter()
            .any(|name| name == scope.name())
            .then_some(scope)
    }

    fn exemplar(&self, span: &Span, value: f64) -> Option<Exemplar> {
        self.exemplars_enabled.then(|| Exemplar {
            trace_id: span.trace_id(),
            span_id: span.span_id(),
            value,
            time_unix_nano: span.end_time_unix_nano(),
        })
    }

    fn aggregate_span(&self, key_builder: &mut KeyBuilder, scope: &mut AggregationScope, ctx: &SpanContext<'_>) {
        let span = ctx.span;
        let duration = self.unit.from_nanos(span.duration_nanos());
        let sources = [span.attributes(), ctx.resource_attributes];

        let key = key_builder.build_with_sources(
            ctx.service_name,
            span,
            ctx.instrumentation_scope,
            &self.calls_dimensions,
            &sources,
        );
        let (series, overflowed) = scope.calls.get_or_create(
            &key,
            ctx.now,
            || ctx.attributes(key_builder, &self.calls_dimensions, &sources),
            || 0,
        );
        series.value += 1;
        if let Some(exemplar) = self.exemplar(span, duration) {
            series.exemplars.push(exemplar, self.max_exemplars);
        }
        if overflowed {
            self.telemetry.increment_overflow();
        }

        if let (Some(durations), Some(template)) = (scope.durations.as_mut(), self.histogram.as_ref()) {
            let key = key_builder.build_with_sources(
                ctx.service_name,
                span,
                ctx.instrumentation_scope,
                &self.duration_dimensions,
                &sources,
            );
            let (series, overflowed) = durations.get_or_create(
                &key,
                ctx.now,
                || ctx.attributes(key_builder, &self.duration_dimensions, &sources),
                || template.clone(),
            );
            series.value.record(duration);
            if let Some(exemplar) = self.exemplar(span, duration) {
                series.exemplars.push(exemplar, self.max_exemplars);
            }
            if overflowed {
                self.telemetry.increment_overflow();
            }
        }

        if let Some(events) = scope.events.as_mut() {
            for event in span.events() {
                let sources = [span.attributes(), event.attributes(), ctx.resource_attributes];
                let key = key_builder.build_with_sources(
                    ctx.service_name,
                    span,
                    ctx.instrumentation_scope,
                    &self.events_dimensions,
                    &sources,
                );
                let (series, overflowed) = events.get_or_create(
                    &key,
                    ctx.now,
                    || ctx.attributes(key_builder, &self.events_dimensions, &sources),
                    || 0,
                );
                series.value += 1;
                if let Some(exemplar) = self.exemplar(span, 0.0) {
                    series.exemplars.push(exemplar, self.max_exemplars);
                }
                if overflowed {
                    self.telemetry.increment_overflow();
                }
            }
        }
    }

    /// Builds metrics from the current state of every resource.
    ///
    /// Under delta temporality, every series is reset afterwards. Exemplars are always cleared. Resources that have not
    /// received any spans for at least the configured expiration are then removed.
    pub fn build_metrics(&self) -> MetricsBatch {
        let now = self.clock.now();

        let mut state = self.lock_state();
        let State {
            resources, timestamps, ..
        } = &mut *state;

        let ctx = FlushContext {
            now,
            temporality: self.temporality,
            unit: self.unit,
            calls_name: &self.names.calls,
            duration_name: &self.names.duration,
            events_name: &self.names.events,
        };

        let mut resource_metrics = Vec::with_capacity(resources.len());
        for (fingerprint, scope) in resources.iter_mut() {
            let metrics = scope.collect(&ctx, timestamps, fingerprint);
            resource_metrics.push(ResourceMetrics::new(
                scope.resource_attributes().clone(),
                SCOPE_NAME,
                metrics,
            ));
        }

        let expired = resources.garbage_collect(now, self.expiration);
        if expired > 0 {
            debug!(expired, remaining = resources.len(), "Expired idle resources.");
            self.telemetry.increment_resources_expired(expired as u64);
        }
        self.telemetry.set_active_resources(resources.len());

        MetricsBatch::new(resource_metrics)
    }
}

struct SpanContext<'a> {
    service_name: &'a str,
    span: &'a Span,
    instrumentation_scope: Option<&'a InstrumentationScope>,
    resource_attributes: &'a Attributes,
    now: u64,
}

impl SpanContext<'_> {
    fn attributes(&self, key_builder: &KeyBuilder, dimensions: &[Dimension], sources: &[&Attributes]) -> Attributes {
        key_builder.build_attributes(
            self.service_name,
            self.span,
            self.instrumentation_scope,
            dimensions,
            sources,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metrics_util::debugging::DebuggingRecorder;

    use super::*;
    use crate::{
        aggregation::OVERFLOW_ATTRIBUTE,
        clock::ManualClock,
        config::{
            EventsConfiguration, ExemplarsConfiguration, ExponentialHistogramConfiguration, HistogramConfiguration,
        },
        data_model::{
            metric::{Metric, MetricData},
            trace::{Resource, ScopeSpans, SpanEvent, SpanId, SpanKind, StatusCode, TraceId},
        },
        key::{SPAN_KIND_KEY, SPAN_NAME_KEY},
        telemetry::test_util::{get_counter_value, get_gauge_value},
    };

    const SAMPLE_LATENCY_NANOS: u64 = 11_000_000;
    const SAMPLE_LATENCY_MS: f64 = 11.0;
    const START_TIME: u64 = 1_000_000_000;

    struct Harness {
        clock: ManualClock,
        engine: SpanMetrics,
    }

    impl Harness {
        fn new(config: SpanMetricsConfiguration) -> Self {
            let clock = ManualClock::new(START_TIME);
            let engine = SpanMetrics::from_configuration(&config, Arc::new(clock.clone()))
                .expect("configuration should be valid")
                .with_telemetry(Telemetry::noop());
            Self { clock, engine }
        }

        fn recorded(config: SpanMetricsConfiguration, recorder: &DebuggingRecorder) -> Self {
            let clock = ManualClock::new(START_TIME);
            let engine = metrics::with_local_recorder(recorder, || {
                SpanMetrics::from_configuration(&config, Arc::new(clock.clone())).expect("configuration should be valid")
            });
            Self { clock, engine }
        }

        fn consume(&self, batch: &[ResourceSpans]) {
            self.engine.consume_traces(batch);
            self.clock.advance(Duration::from_nanos(1));
        }

        fn flush(&self) -> MetricsBatch {
            let batch = self.engine.build_metrics();
            self.clock.advance(Duration::from_nanos(1));
            batch
        }
    }

    fn trace_id(seed: u8) -> TraceId {
        TraceId::from_bytes([seed; 16])
    }

    fn span_id(seed: u8) -> SpanId {
        SpanId::from_bytes([seed; 8])
    }

    fn sample_span(name: &str, kind: SpanKind, status: StatusCode, trace: u8) -> Span {
        Span::new(name)
            .with_ids(trace_id(trace), span_id(trace))
            .with_kind(kind)
            .with_status(status)
            .with_timestamps(START_TIME, START_TIME + SAMPLE_LATENCY_NANOS)
            .with_attributes(
                Attributes::new()
                    .with("string.attr", "stringAttrValue")
                    .with("int.attr", 99i64)
                    .with("double.attr", 99.99f64)
                    .with("bool.attr", true),
            )
            .with_events(vec![SpanEvent::new("exception")
                .with_attributes(Attributes::new().with("exception.type", "NullPointerException"))])
    }

    fn resource_spans(service: &str, spans: Vec<Span>) -> ResourceSpans {
        let resource = Resource::new(
            Attributes::new()
                .with(SERVICE_NAME_KEY, service)
                .with("region", "us-east-1"),
        );
        ResourceSpans::new(
            resource,
            vec![ScopeSpans::new(InstrumentationScope::new("express", "1.0.0"), spans)],
        )
    }

    /// Service A has a server span and its client child, service B a single server span.
    fn sample_trace_with(trace: u8) -> Vec<ResourceSpans> {
        vec![
            resource_spans(
                "service-a",
                vec![
                    sample_span("/ping", SpanKind::Server, StatusCode::Ok, trace),
                    sample_span("/ping", SpanKind::Client, StatusCode::Ok, trace),
                ],
            ),
            resource_spans(
                "service-b",
                vec![sample_span("/ping", SpanKind::Server, StatusCode::Error, trace)],
            ),
        ]
    }

    fn sample_trace() -> Vec<ResourceSpans> {
        sample_trace_with(1)
    }

    fn service_trace(service: &str) -> Vec<ResourceSpans> {
        vec![resource_spans(
            service,
            vec![sample_span("/ping", SpanKind::Server, StatusCode::Ok, 1)],
        )]
    }

    fn resource<'a>(batch: &'a MetricsBatch, service: &str) -> &'a ResourceMetrics {
        batch
            .resource_metrics()
            .iter()
            .find(|rm| rm.resource_attributes().get(SERVICE_NAME_KEY).and_then(AttributeValue::as_str) == Some(service))
            .expect("resource should be present")
    }

    fn calls<'a>(engine: &SpanMetrics, rm: &'a ResourceMetrics) -> &'a Metric {
        rm.metric(engine.metric_names().calls()).expect("calls metric should be present")
    }

    fn calls_values(engine: &SpanMetrics, batch: &MetricsBatch) -> Vec<u64> {
        let mut values = batch
            .resource_metrics()
            .iter()
            .flat_map(|rm| calls(engine, rm).sum_data_points().unwrap_or_default())
            .map(|dp| dp.value)
            .collect::<Vec<_>>();
        values.sort_unstable();
        values
    }

    fn all_start_and_end(batch: &MetricsBatch, service: &str) -> (u64, u64) {
        let rm = resource(batch, service);
        let mut pairs = Vec::new();
        for metric in rm.metrics() {
            match metric.data() {
                MetricData::Sum { data_points, .. } => {
                    pairs.extend(data_points.iter().map(|dp| (dp.start_time_unix_nano, dp.time_unix_nano)))
                }
                MetricData::Histogram { data_points, .. } => {
                    pairs.extend(data_points.iter().map(|dp| (dp.start_time_unix_nano, dp.time_unix_nano)))
                }
                MetricData::ExponentialHistogram { data_points, .. } => {
                    pairs.extend(data_points.iter().map(|dp| (dp.start_time_unix_nano, dp.time_unix_nano)))
                }
            }
        }

        let first = pairs[0];
        assert!(pairs.iter().all(|pair| *pair == first), "all data points should share timestamps");
        first
    }

    #[test]
    fn end_to_end_sample_trace() {
        let harness = Harness::new(SpanMetricsConfiguration::with_defaults());
        harness.consume(&sample_trace());
        let batch = harness.flush();

        assert_eq!(batch.resource_metrics().len(), 2);
        assert_eq!(batch.data_point_count(), 6);

        for (service, expected_series) in [("service-a", 2), ("service-b", 1)] {
            let rm = resource(&batch, service);
            assert_eq!(rm.scope_name(), SCOPE_NAME);
            assert_eq!(rm.metrics().len(), 2);

            let calls = calls(&harness.engine, rm);
            assert_eq!(calls.name(), "traces.span.metrics.calls");
            assert_eq!(calls.data().temporality(), Temporality::Cumulative);
            assert_eq!(calls.sum_data_points().map(<[_]>::len), Some(expected_series));

            let duration = rm
                .metric(harness.engine.metric_names().duration())
                .expect("duration metric should be present");
            assert_eq!(duration.unit(), "ms");
            let data_points = duration.histogram_data_points().expect("explicit histogram");
            assert_eq!(data_points.len(), expected_series);
            for dp in data_points {
                assert_eq!(dp.count, 1);
                assert_eq!(dp.sum, SAMPLE_LATENCY_MS);
                assert_eq!(dp.bucket_counts.len(), dp.explicit_bounds.len() + 1);

                // 11ms lands in the (10, 50] bucket.
                let index = dp.explicit_bounds.iter().position(|b| *b >= SAMPLE_LATENCY_MS).unwrap();
                for (i, count) in dp.bucket_counts.iter().enumerate() {
                    assert_eq!(*count, u64::from(i == index));
                }
            }
        }

        let rm = resource(&batch, "service-a");
        let dp = &calls(&harness.engine, rm).sum_data_points().unwrap()[0];
        assert_eq!(
            dp.attributes.get(SERVICE_NAME_KEY).and_then(AttributeValue::as_str),
            Some("service-a")
        );
        assert_eq!(dp.attributes.get(SPAN_NAME_KEY).and_then(AttributeValue::as_str), Some("/ping"));
        assert!(dp.attributes.get(SPAN_KIND_KEY).is_some());
    }

    #[test]
    fn cumulative_initial_zero_then_running_total() {
        let harness = Harness::new(SpanMetricsConfiguration::with_defaults());

        let mut observed = Vec::new();
        for _ in 0..3 {
            harness.consume(&service_trace("service-a"));
            harness.consume(&service_trace("service-a"));
            let batch = harness.flush();
            observed.push(calls_values(&harness.engine, &batch));
        }
        assert_eq!(observed, vec![vec![0], vec![4], vec![6]]);

        // Histograms carry their full value from the first flush.
        let batch = harness.flush();
        let rm = resource(&batch, "service-a");
        let duration = rm.metric(harness.engine.metric_names().duration()).unwrap();
        assert_eq!(duration.histogram_data_points().unwrap()[0].count, 6);
    }

    #[test]
    fn cumulative_consume_each_time() {
        let harness = Harness::new(SpanMetricsConfiguration::with_defaults());

        let mut observed = Vec::new();
        for _ in 0..3 {
            harness.consume(&service_trace("service-a"));
            observed.push(calls_values(&harness.engine, &harness.flush()));
        }
        assert_eq!(observed, vec![vec![0], vec![2], vec![3]]);
    }

    #[test]
    fn cumulative_consume_once_flush_twice() {
        let harness = Harness::new(SpanMetricsConfiguration::with_defaults());
        harness.consume(&service_trace("service-a"));

        assert_eq!(calls_values(&harness.engine, &harness.flush()), vec![0]);
        assert_eq!(calls_values(&harness.engine, &harness.flush()), vec![1]);
    }

    #[test]
    fn delta_resets_after_flush() {
        let config = SpanMetricsConfiguration::with_defaults().with_temporality(AggregationTemporality::Delta);
        let harness = Harness::new(config);

        for _ in 0..3 {
            harness.consume(&service_trace("service-a"));
        }
        let batch = harness.flush();
        assert_eq!(calls_values(&harness.engine, &batch), vec![3]);

        let rm = resource(&batch, "service-a");
        let duration = rm.metric(harness.engine.metric_names().duration()).unwrap();
        assert_eq!(duration.data().temporality(), Temporality::Delta);
        assert_eq!(duration.histogram_data_points().unwrap()[0].count, 3);

        let batch = harness.flush();
        assert_eq!(calls_values(&harness.engine, &batch), vec![0]);
        let rm = resource(&batch, "service-a");
        let duration = rm.metric(harness.engine.metric_names().duration()).unwrap();
        let dp = &duration.histogram_data_points().unwrap()[0];
        assert_eq!(dp.count, 0);
        assert_eq!(dp.sum, 0.0);
    }

    #[test]
    fn resources_without_service_name_are_skipped() {
        let harness = Harness::new(SpanMetricsConfiguration::with_defaults());
        let batch = vec![ResourceSpans::new(
            Resource::new(Attributes::new().with("host", "h1")),
            vec![ScopeSpans::new(
                InstrumentationScope::new("", ""),
                vec![sample_span("/ping", SpanKind::Server, StatusCode::Ok, 1)],
            )],
        )];
        harness.consume(&batch);

        assert_eq!(harness.engine.active_resources(), 0);
        assert!(harness.flush().is_empty());
    }

    #[test]
    fn resource_cache_is_bounded() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.resource_metrics_cache_size = 5;
        let harness = Harness::new(config);

        for i in 0..10 {
            harness.consume(&service_trace(&format!("service-{}", i)));
        }
        assert_eq!(harness.engine.active_resources(), 5);

        let batch = harness.flush();
        let mut services = batch
            .resource_metrics()
            .iter()
            .filter_map(|rm| rm.resource_attributes().get(SERVICE_NAME_KEY))
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect::<Vec<_>>();
        services.sort();
        assert_eq!(
            services,
            (5..10).map(|i| format!("service-{}", i)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn resource_key_attributes_group_resources() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.resource_metrics_key_attributes = vec![SERVICE_NAME_KEY.to_string()];
        let harness = Harness::new(config);

        let with_host = |host: &str| {
            vec![ResourceSpans::new(
                Resource::new(Attributes::new().with(SERVICE_NAME_KEY, "service-a").with("host", host)),
                vec![ScopeSpans::new(
                    InstrumentationScope::new("", ""),
                    vec![sample_span("/ping", SpanKind::Server, StatusCode::Ok, 1)],
                )],
            )]
        };
        harness.consume(&with_host("h1"));
        harness.consume(&with_host("h2"));
        assert_eq!(harness.engine.active_resources(), 1);

        // The first resource seen provides the emitted attributes.
        let batch = harness.flush();
        let rm = resource(&batch, "service-a");
        assert_eq!(rm.resource_attributes().get("host").and_then(AttributeValue::as_str), Some("h1"));
        assert_eq!(calls_values(&harness.engine, &harness.flush()), vec![2]);
    }

    #[test]
    fn cardinality_limit_routes_to_overflow() {
        let mut config = SpanMetricsConfiguration::with_defaults()
            .with_temporality(AggregationTemporality::Delta)
            .with_dimensions(vec![]);
        config.aggregation_cardinality_limit = 2;
        config.events = EventsConfiguration {
            enabled: true,
            dimensions: vec![Dimension::new("exception.type")],
        };
        let harness = Harness::new(config);

        let batch = vec![resource_spans(
            "service-a",
            ["a", "b", "c", "d", "e"]
                .into_iter()
                .map(|name| sample_span(name, SpanKind::Server, StatusCode::Ok, 1))
                .collect(),
        )];
        harness.consume(&batch);
        harness.consume(&batch);

        let out = harness.flush();
        let rm = resource(&out, "service-a");
        let names = harness.engine.metric_names();

        let sums = |name: &str| {
            let metric = rm.metric(name).expect("metric should be present");
            let data_points = metric.sum_data_points().unwrap();
            assert_eq!(data_points.len(), 3);

            let overflow = data_points
                .iter()
                .find(|dp| dp.attributes.get(OVERFLOW_ATTRIBUTE).is_some())
                .expect("overflow series should be present");
            assert_eq!(overflow.attributes.len(), 1);
            assert_eq!(overflow.value, 6);

            let mut regular = data_points
                .iter()
                .filter(|dp| dp.attributes.get(OVERFLOW_ATTRIBUTE).is_none())
                .map(|dp| dp.value)
                .collect::<Vec<_>>();
            regular.sort_unstable();
            assert_eq!(regular, vec![2, 2]);
        };
        sums(names.calls());
        sums(names.events());

        let duration = rm.metric(names.duration()).unwrap();
        let data_points = duration.histogram_data_points().unwrap();
        assert_eq!(data_points.len(), 3);
        let overflow = data_points
            .iter()
            .find(|dp| dp.attributes.get(OVERFLOW_ATTRIBUTE).is_some())
            .unwrap();
        assert_eq!(overflow.count, 6);
    }

    #[test]
    fn exemplars_are_discarded_after_flushing() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.exemplars = ExemplarsConfiguration {
            enabled: true,
            max_per_data_point: 1,
        };
        config.events = EventsConfiguration {
            enabled: true,
            dimensions: vec![Dimension::new("exception.type")],
        };
        let harness = Harness::new(config);

        let check = |batch: &MetricsBatch, expected: TraceId| {
            for rm in batch.resource_metrics() {
                for metric in rm.metrics() {
                    let exemplars = match metric.data() {
                        MetricData::Sum { data_points, .. } => {
                            data_points.iter().map(|dp| dp.exemplars.clone()).collect::<Vec<_>>()
                        }
                        MetricData::Histogram { data_points, .. } => {
                            data_points.iter().map(|dp| dp.exemplars.clone()).collect()
                        }
                        MetricData::ExponentialHistogram { data_points, .. } => {
                            data_points.iter().map(|dp| dp.exemplars.clone()).collect()
                        }
                    };
                    for exemplars in exemplars {
                        assert_eq!(exemplars.len(), 1);
                        assert_eq!(exemplars[0].trace_id, expected);
                    }
                }
            }
        };

        harness.consume(&sample_trace_with(1));
        check(&harness.flush(), trace_id(1));

        harness.consume(&sample_trace_with(2));
        check(&harness.flush(), trace_id(2));
    }

    #[test]
    fn exemplar_cap_keeps_most_recent() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.exemplars = ExemplarsConfiguration {
            enabled: true,
            max_per_data_point: 2,
        };
        let harness = Harness::new(config);

        for trace in 1..=3 {
            harness.consume(&[resource_spans(
                "service-a",
                vec![sample_span("/ping", SpanKind::Server, StatusCode::Ok, trace)],
            )]);
        }

        let batch = harness.flush();
        let rm = resource(&batch, "service-a");
        let dp = &calls(&harness.engine, rm).sum_data_points().unwrap()[0];
        let traces = dp.exemplars.iter().map(|e| e.trace_id).collect::<Vec<_>>();
        assert_eq!(traces, vec![trace_id(2), trace_id(3)]);
        assert_eq!(dp.exemplars[0].value, SAMPLE_LATENCY_MS);
    }

    #[test]
    fn timestamps_for_uninterrupted_stream() {
        for temporality in [AggregationTemporality::Cumulative, AggregationTemporality::Delta] {
            let mut config = SpanMetricsConfiguration::with_defaults().with_temporality(temporality);
            config.events = EventsConfiguration {
                enabled: true,
                dimensions: vec![Dimension::new("exception.type")],
            };
            let harness = Harness::new(config);

            harness.consume(&sample_trace());
            let (start1, end1) = all_start_and_end(&harness.flush(), "service-a");

            harness.consume(&service_trace("unrelated-service"));
            let _ = harness.flush();

            harness.consume(&sample_trace());
            let (start2, end2) = all_start_and_end(&harness.flush(), "service-a");

            assert!(end1 > start1);
            assert!(end2 > start2);
            match temporality {
                AggregationTemporality::Cumulative => assert_eq!(start1, start2),
                // The unrelated flush in between also emitted service A, with no spans.
                AggregationTemporality::Delta => assert!(start2 > end1),
            }
        }
    }

    #[test]
    fn delta_windows_are_contiguous() {
        let config = SpanMetricsConfiguration::with_defaults().with_temporality(AggregationTemporality::Delta);
        let harness = Harness::new(config);

        let mut windows = Vec::new();
        for _ in 0..3 {
            harness.consume(&service_trace("service-a"));
            windows.push(all_start_and_end(&harness.flush(), "service-a"));
        }

        assert!(windows[0].1 > windows[0].0);
        assert_eq!(windows[1].0, windows[0].1);
        assert_eq!(windows[2].0, windows[1].1);
    }

    #[test]
    fn delta_timestamp_cache_eviction() {
        let mut config = SpanMetricsConfiguration::with_defaults().with_temporality(AggregationTemporality::Delta);
        config.delta_timestamp_cache_size = 1;
        config.histogram = HistogramConfiguration {
            exponential: Some(ExponentialHistogramConfiguration { max_size: 160 }),
            ..Default::default()
        };
        let harness = Harness::new(config);

        let first_calls_point = |batch: &MetricsBatch, service: &str| {
            let rm = resource(batch, service);
            calls(&harness.engine, rm).sum_data_points().unwrap()[0].clone()
        };

        harness.consume(&service_trace("service-a"));
        let a1 = first_calls_point(&harness.flush(), "service-a");

        harness.consume(&service_trace("service-b"));
        let _ = harness.flush();

        harness.consume(&service_trace("service-a"));
        let a2 = first_calls_point(&harness.flush(), "service-a");

        // Service A's last emission was evicted, so its next window cannot start where the previous one ended.
        assert!(a2.start_time_unix_nano > a1.time_unix_nano);
        assert_eq!(a2.value, 1);
    }

    #[test]
    fn delta_windows_restart_after_resource_eviction() {
        let mut config = SpanMetricsConfiguration::with_defaults().with_temporality(AggregationTemporality::Delta);
        config.resource_metrics_cache_size = 1;
        let harness = Harness::new(config);

        harness.consume(&service_trace("service-a"));
        let (_, first_end) = all_start_and_end(&harness.flush(), "service-a");

        // Service A receives a span, is evicted by service B, and is then rebuilt before the next flush.
        harness.consume(&service_trace("service-a"));
        harness.consume(&service_trace("service-b"));
        let rebuilt_at = harness.clock.now();
        harness.consume(&service_trace("service-a"));

        let batch = harness.flush();
        let (start, _) = all_start_and_end(&batch, "service-a");
        assert!(start >= rebuilt_at);
        assert!(start > first_end);
        assert_eq!(calls_values(&harness.engine, &batch), vec![1]);
    }

    #[test]
    fn delta_windows_restart_after_resource_expiry() {
        let mut config = SpanMetricsConfiguration::with_defaults().with_temporality(AggregationTemporality::Delta);
        config.metrics_expiration = Duration::from_nanos(1);
        let harness = Harness::new(config);

        harness.consume(&service_trace("service-a"));
        let _ = harness.flush();

        // Nothing was received since the previous flush, so service A is emitted one last time and then expires.
        let (_, last_end) = all_start_and_end(&harness.flush(), "service-a");
        assert_eq!(harness.engine.active_resources(), 0);

        let rebuilt_at = harness.clock.now();
        harness.consume(&service_trace("service-a"));

        let batch = harness.flush();
        let (start, _) = all_start_and_end(&batch, "service-a");
        assert!(start >= rebuilt_at);
        assert!(start > last_end);
        assert_eq!(calls_values(&harness.engine, &batch), vec![1]);
    }

    #[test]
    fn overflow_is_counted() {
        let mut config = SpanMetricsConfiguration::with_defaults().with_dimensions(vec![]);
        config.aggregation_cardinality_limit = 2;
        config.histogram.disable = true;
        config.events.enabled = false;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let harness = Harness::recorded(config, &recorder);

        let batch = vec![resource_spans(
            "service-a",
            ["a", "b", "c", "d", "e"]
                .into_iter()
                .map(|name| sample_span(name, SpanKind::Server, StatusCode::Ok, 1))
                .collect(),
        )];
        harness.consume(&batch);
        harness.consume(&batch);

        let metrics = snapshotter.snapshot().into_vec();
        assert_eq!(get_counter_value(&metrics, "spanmetrics_overflow_total"), 6);
        assert_eq!(get_counter_value(&metrics, "spanmetrics_spans_received_total"), 10);
        assert_eq!(get_gauge_value(&metrics, "spanmetrics_active_resources"), 1.0);
    }

    #[test]
    fn evicted_and_expired_resources_are_counted() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.resource_metrics_cache_size = 1;
        config.metrics_expiration = Duration::from_nanos(1);

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let harness = Harness::recorded(config, &recorder);

        harness.consume(&service_trace("service-a"));
        harness.consume(&service_trace("service-b"));
        harness.consume(&service_trace("service-a"));

        let metrics = snapshotter.snapshot().into_vec();
        assert_eq!(get_counter_value(&metrics, "spanmetrics_resources_evicted_total"), 2);
        assert_eq!(get_counter_value(&metrics, "spanmetrics_resources_expired_total"), 0);
        assert_eq!(get_gauge_value(&metrics, "spanmetrics_active_resources"), 1.0);

        let _ = harness.flush();
        let _ = harness.flush();

        let metrics = snapshotter.snapshot().into_vec();
        assert_eq!(get_counter_value(&metrics, "spanmetrics_resources_expired_total"), 1);
        assert_eq!(get_counter_value(&metrics, "spanmetrics_spans_received_total"), 3);
        assert_eq!(get_gauge_value(&metrics, "spanmetrics_active_resources"), 0.0);
    }

    #[test]
    fn expired_resources_are_removed() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.metrics_expiration = Duration::from_nanos(1);
        let harness = Harness::new(config);

        let traces0 = vec![
            resource_spans(
                "service-a",
                vec![sample_span("/ping", SpanKind::Server, StatusCode::Ok, 1)],
            ),
            resource_spans(
                "service-b",
                vec![sample_span("/ping", SpanKind::Server, StatusCode::Error, 1)],
            ),
        ];
        let traces1 = service_trace("service-x");

        let mut counts = Vec::new();
        for traces in [&traces0, &traces1, &traces1] {
            harness.engine.consume_traces(traces);
            counts.push(harness.flush().data_point_count());
        }
        assert_eq!(counts, vec![4, 6, 2]);
        assert_eq!(harness.engine.active_resources(), 1);
    }

    #[test]
    fn repeated_sweeps_without_ingestion_are_stable() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.metrics_expiration = Duration::from_secs(60);
        let harness = Harness::new(config);

        harness.consume(&sample_trace());
        let first = harness.engine.build_metrics();
        let second = harness.engine.build_metrics();

        assert_eq!(first.resource_metrics().len(), 2);
        assert_eq!(second.resource_metrics().len(), 2);
        assert_eq!(harness.engine.active_resources(), 2);
    }

    #[test]
    fn events_metric_toggle() {
        for (enabled, expected_metrics) in [(false, 2), (true, 3)] {
            let mut config = SpanMetricsConfiguration::with_defaults();
            config.events = EventsConfiguration {
                enabled,
                dimensions: vec![Dimension::new("exception.type")],
            };
            let harness = Harness::new(config);

            harness.consume(&sample_trace());
            let batch = harness.flush();
            for rm in batch.resource_metrics() {
                assert_eq!(rm.metrics().len(), expected_metrics);
            }

            if enabled {
                let rm = resource(&batch, "service-b");
                let events = rm.metric(harness.engine.metric_names().events()).unwrap();
                let dp = &events.sum_data_points().unwrap()[0];
                assert_eq!(
                    dp.attributes.get("exception.type").and_then(AttributeValue::as_str),
                    Some("NullPointerException")
                );
            }
        }
    }

    #[test]
    fn separate_dimensions_per_metric() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.namespace = String::new();
        config.dimensions = vec![Dimension::new("string.attr")];
        config.calls_dimensions = vec![Dimension::new("int.attr").with_default("0")];
        config.histogram.dimensions = vec![Dimension::new("double.attr").with_default("0.0")];
        let harness = Harness::new(config);

        harness.consume(&sample_trace());
        let batch = harness.flush();

        for rm in batch.resource_metrics() {
            let calls = rm.metric("calls").expect("calls metric should be present");
            for dp in calls.sum_data_points().unwrap() {
                assert!(dp.attributes.get("string.attr").is_some());
                assert!(dp.attributes.get("int.attr").is_some());
                assert!(dp.attributes.get("double.attr").is_none());
            }

            let duration = rm.metric("duration").expect("duration metric should be present");
            for dp in duration.histogram_data_points().unwrap() {
                assert!(dp.attributes.get("string.attr").is_some());
                assert!(dp.attributes.get("int.attr").is_none());
                assert!(dp.attributes.get("double.attr").is_some());
            }
        }
    }

    #[test]
    fn histogram_disabled() {
        let config = SpanMetricsConfiguration::with_defaults().with_histogram(HistogramConfiguration {
            disable: true,
            ..Default::default()
        });
        let harness = Harness::new(config);

        harness.consume(&sample_trace());
        let batch = harness.flush();
        for rm in batch.resource_metrics() {
            assert_eq!(rm.metrics().len(), 1);
            assert!(rm.metric(harness.engine.metric_names().duration()).is_none());
        }
    }

    #[test]
    fn exponential_histogram() {
        let config = SpanMetricsConfiguration::with_defaults().with_histogram(HistogramConfiguration {
            exponential: Some(ExponentialHistogramConfiguration { max_size: 10 }),
            ..Default::default()
        });
        let harness = Harness::new(config);

        for _ in 0..3 {
            harness.consume(&service_trace("service-a"));
        }
        let batch = harness.flush();
        let rm = resource(&batch, "service-a");
        let duration = rm.metric(harness.engine.metric_names().duration()).unwrap();
        let dp = &duration.exponential_histogram_data_points().expect("exponential histogram")[0];

        assert_eq!(dp.count, 3);
        assert_eq!(dp.sum, 3.0 * SAMPLE_LATENCY_MS);
        assert_eq!(dp.zero_count, 0);
        assert_eq!(dp.positive.bucket_counts.iter().sum::<u64>(), 3);
        assert!(dp.negative.bucket_counts.is_empty());
    }

    #[test]
    fn negative_durations_are_recorded() {
        let harness = Harness::new(SpanMetricsConfiguration::with_defaults());
        let span = Span::new("/backwards")
            .with_kind(SpanKind::Server)
            .with_timestamps(START_TIME + SAMPLE_LATENCY_NANOS, START_TIME);
        harness.consume(&[resource_spans("service-a", vec![span])]);

        let batch = harness.flush();
        let rm = resource(&batch, "service-a");
        let duration = rm.metric(harness.engine.metric_names().duration()).unwrap();
        let dp = &duration.histogram_data_points().unwrap()[0];
        assert_eq!(dp.count, 1);
        assert_eq!(dp.sum, -SAMPLE_LATENCY_MS);
        assert_eq!(dp.bucket_counts[0], 1);
    }

    #[test]
    fn instrumentation_scope_attributes() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.include_instrumentation_scope = vec!["express".to_string()];
        let harness = Harness::new(config);

        harness.consume(&service_trace("service-a"));
        let batch = harness.flush();
        let rm = resource(&batch, "service-a");
        let dp = &calls(&harness.engine, rm).sum_data_points().unwrap()[0];
        assert_eq!(
            dp.attributes
                .get(crate::key::INSTRUMENTATION_SCOPE_NAME_KEY)
                .and_then(AttributeValue::as_str),
            Some("express")
        );
        assert_eq!(
            dp.attributes
                .get(crate::key::INSTRUMENTATION_SCOPE_VERSION_KEY)
                .and_then(AttributeValue::as_str),
            Some("1.0.0")
        );
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let mut config = SpanMetricsConfiguration::with_defaults();
        config.resource_metrics_cache_size = 0;
        let result = SpanMetrics::from_configuration(&config, Arc::new(ManualClock::new(0)));
        assert!(matches!(result, Err(ConfigError::ZeroCacheSize { .. })));
    }
}
