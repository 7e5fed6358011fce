//! Metrics.

use std::{
    sync::{atomic::Ordering, Arc, OnceLock},
    time::Duration,
};

use anyhow::anyhow;
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use tracing::info;

use crate::GenericError;

static RECORDER_STATE: OnceLock<Arc<State>> = OnceLock::new();

/// A reading of an internal metric.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricReading {
    /// Increase of a counter since the previous reading.
    Counter(u64),

    /// Current value of a gauge.
    Gauge(f64),
}

struct State {
    registry: Registry<Key, AtomicStorage>,
}

impl State {
    fn readings(&self) -> Vec<(String, MetricReading)> {
        let mut readings = Vec::new();

        for (key, counter) in self.registry.get_counter_handles() {
            let delta = counter.swap(0, Ordering::Relaxed);
            readings.push((key.name().to_string(), MetricReading::Counter(delta)));
        }

        for (key, gauge) in self.registry.get_gauge_handles() {
            let value = f64::from_bits(gauge.load(Ordering::Relaxed));
            readings.push((key.name().to_string(), MetricReading::Gauge(value)));
        }

        // Histograms are not reported, so just keep them from growing.
        for (_, histogram) in self.registry.get_histogram_handles() {
            histogram.clear();
        }

        readings.sort_by(|a, b| a.0.cmp(&b.0));
        readings
    }

    fn log_readings(&self) {
        for (name, reading) in self.readings() {
            match reading {
                MetricReading::Counter(0) => {}
                MetricReading::Counter(delta) => info!(metric = %name, delta, "Internal counter."),
                MetricReading::Gauge(value) => info!(metric = %name, value, "Internal gauge."),
            }
        }
    }
}

struct MetricsRecorder {
    state: Arc<State>,
}

impl MetricsRecorder {
    fn new() -> Self {
        Self {
            state: Arc::new(State {
                registry: Registry::new(AtomicStorage {}),
            }),
        }
    }
}

impl Recorder for MetricsRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        self.state.registry.get_or_create_counter(key, |c| c.clone().into())
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        self.state.registry.get_or_create_gauge(key, |g| g.clone().into())
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        self.state.registry.get_or_create_histogram(key, |h| h.clone().into())
    }
}

/// Initializes the metrics subsystem for `metrics`.
///
/// Internal metrics are held in memory and logged every `log_interval`: counters as their increase since the previous
/// interval, and gauges as their current value. Counters that did not change are skipped.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// If the metrics subsystem was already initialized, an error will be returned.
pub fn initialize_metrics(log_interval: Duration) -> Result<(), GenericError> {
    let recorder = MetricsRecorder::new();
    let state = Arc::clone(&recorder.state);
    metrics::set_global_recorder(recorder).map_err(|_| anyhow!("metrics recorder already installed"))?;
    if RECORDER_STATE.set(Arc::clone(&state)).is_err() {
        return Err(anyhow!("metrics recorder state already set"));
    }

    tokio::spawn(log_metrics(state, log_interval));

    Ok(())
}

/// Logs the current value of every internal metric.
///
/// Does nothing if the metrics subsystem has not been initialized.
pub fn log_internal_metrics() {
    if let Some(state) = RECORDER_STATE.get() {
        state.log_readings();
    }
}

async fn log_metrics(state: Arc<State>, log_interval: Duration) {
    let mut log_interval = tokio::time::interval(log_interval);
    log_interval.tick().await;

    loop {
        log_interval.tick().await;
        state.log_readings();
    }
}
