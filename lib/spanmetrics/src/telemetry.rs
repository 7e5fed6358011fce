use metrics::{counter, gauge, Counter, Gauge};

/// Internal telemetry of the span metrics engine.
#[derive(Clone)]
pub struct Telemetry {
    active_resources: Gauge,
    spans_received: Counter,
    overflow: Counter,
    resources_evicted: Counter,
    resources_expired: Counter,
    export_failures: Counter,
}

impl Telemetry {
    /// Creates a new `Telemetry`, registering every metric with the global recorder.
    pub fn new() -> Self {
        Self {
            active_resources: gauge!("spanmetrics_active_resources"),
            spans_received: counter!("spanmetrics_spans_received_total"),
            overflow: counter!("spanmetrics_overflow_total"),
            resources_evicted: counter!("spanmetrics_resources_evicted_total"),
            resources_expired: counter!("spanmetrics_resources_expired_total"),
            export_failures: counter!("spanmetrics_export_failures_total"),
        }
    }

    #[cfg(test)]
    pub fn noop() -> Self {
        Self {
            active_resources: Gauge::noop(),
            spans_received: Counter::noop(),
            overflow: Counter::noop(),
            resources_evicted: Counter::noop(),
            resources_expired: Counter::noop(),
            export_failures: Counter::noop(),
        }
    }

    pub fn set_active_resources(&self, count: usize) {
        self.active_resources.set(count as f64);
    }

    pub fn increment_spans_received(&self, count: u64) {
        self.spans_received.increment(count);
    }

    pub fn increment_overflow(&self) {
        self.overflow.increment(1);
    }

    pub fn increment_resources_evicted(&self) {
        self.resources_evicted.increment(1);
    }

    pub fn increment_resources_expired(&self, count: u64) {
        self.resources_expired.increment(count);
    }

    pub fn increment_export_failures(&self) {
        self.export_failures.increment(1);
    }
}
