//! Metric sinks.

use async_trait::async_trait;

use crate::{data_model::metric::MetricsBatch, GenericError};

/// A downstream consumer of flushed metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Consumes a batch of metrics.
    ///
    /// # Errors
    ///
    /// If the batch could not be consumed, an error is returned. The batch is dropped, and is not retried.
    async fn consume_metrics(&self, batch: MetricsBatch) -> Result<(), GenericError>;
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Mutex,
    };

    use anyhow::anyhow;

    use super::*;

    /// Sink that keeps every batch it receives, optionally failing instead.
    #[derive(Default)]
    pub struct CapturingSink {
        batches: Mutex<Vec<MetricsBatch>>,
        fail: AtomicBool,
    }

    impl CapturingSink {
        pub fn failing() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail: AtomicBool::new(true),
            }
        }

        pub fn batches(&self) -> Vec<MetricsBatch> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetricsSink for CapturingSink {
        async fn consume_metrics(&self, batch: MetricsBatch) -> Result<(), GenericError> {
            if self.fail.load(Relaxed) {
                return Err(anyhow!("sink unavailable"));
            }
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }
}
