//! Periodic flushing.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use snafu::{ensure, ResultExt as _, Snafu};
use tokio::{
    select,
    sync::Mutex as AsyncMutex,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    clock::{Clock, Ticker},
    engine::SpanMetrics,
    sink::MetricsSink,
};

/// A scheduler error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SchedulerError {
    /// The scheduler was started more than once.
    #[snafu(display("Flush scheduler has already been started."))]
    AlreadyStarted,

    /// The background flush task panicked or was aborted.
    #[snafu(display("Flush task did not complete cleanly."))]
    FlushTaskFailed {
        /// Error source.
        source: JoinError,
    },
}

/// Lifecycle state of a [`FlushScheduler`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedulerState {
    /// Not ticking yet, or waiting for the next tick.
    Idle,

    /// Building metrics for the current tick.
    Ticking,

    /// Handing metrics to the sink.
    Exporting,

    /// Shut down. Terminal.
    Stopped,
}

#[derive(Clone)]
struct SharedState(Arc<Mutex<SchedulerState>>);

impl SharedState {
    fn get(&self) -> SchedulerState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, state: SchedulerState) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

/// Periodically flushes a [`SpanMetrics`] engine into a [`MetricsSink`].
pub struct FlushScheduler {
    engine: Arc<SpanMetrics>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: SharedState,
    cancel_token: CancellationToken,
    handle: AsyncMutex<Option<JoinHandle<()>>>,
    started: Mutex<bool>,
}

impl FlushScheduler {
    /// Creates a new `FlushScheduler` that flushes every `interval`, as measured by `clock`.
    pub fn new(
        engine: Arc<SpanMetrics>, sink: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>, interval: Duration,
    ) -> Self {
        Self {
            engine,
            sink,
            clock,
            interval,
            state: SharedState(Arc::new(Mutex::new(SchedulerState::Idle))),
            cancel_token: CancellationToken::new(),
            handle: AsyncMutex::new(None),
            started: Mutex::new(false),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        self.state.get()
    }

    /// Starts flushing in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// If the scheduler was already started, an error is returned.
    pub fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut started = self.started.lock().unwrap_or_else(|e| e.into_inner());
            ensure!(!*started, AlreadyStarted);
            *started = true;
        }

        // Only a concurrent `shutdown` can be holding the slot. It has nothing to wait for yet, so the loop is never
        // spawned and the scheduler goes straight to `Stopped`.
        let Ok(mut slot) = self.handle.try_lock() else {
            debug!("Flush scheduler shut down before it was started.");
            self.state.set(SchedulerState::Stopped);
            return Ok(());
        };

        info!("Starting spanmetrics connector");

        let ticker = self.clock.ticker(self.interval);
        let task = run_flush_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.sink),
            ticker,
            self.cancel_token.child_token(),
            self.state.clone(),
        );
        *slot = Some(tokio::spawn(task));

        Ok(())
    }

    /// Stops flushing, waiting for the background task to finish.
    ///
    /// This can be called concurrently from many callers: only the first one stops the background task, while the
    /// others wait for it to finish. Calling this without having started the scheduler does nothing.
    ///
    /// # Errors
    ///
    /// If the background task panicked, an error is returned to the caller that stopped it.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.take() {
            info!("Shutting down spanmetrics connector");
            self.cancel_token.cancel();
            let result = handle.await.context(FlushTaskFailed);
            self.state.set(SchedulerState::Stopped);
            result?;
        }

        Ok(())
    }
}

async fn run_flush_loop(
    engine: Arc<SpanMetrics>, sink: Arc<dyn MetricsSink>, mut ticker: Ticker, cancel_token: CancellationToken,
    state: SharedState,
) {
    loop {
        select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                state.set(SchedulerState::Ticking);
                flush(&engine, sink.as_ref(), &state).await;
                state.set(SchedulerState::Idle);
            }
        }
    }

    info!("Stopping ticker.");
    state.set(SchedulerState::Stopped);
}

async fn flush(engine: &SpanMetrics, sink: &dyn MetricsSink, state: &SharedState) {
    let batch = engine.build_metrics();
    if batch.is_empty() {
        debug!("No span metrics to flush.");
        return;
    }

    debug!(
        resources = batch.resource_metrics().len(),
        data_points = batch.data_point_count(),
        "Flushing span metrics."
    );

    state.set(SchedulerState::Exporting);
    if let Err(e) = sink.consume_metrics(batch).await {
        engine.telemetry().increment_export_failures();
        error!(error = %e, "Failed ConsumeMetrics");
    }
}
