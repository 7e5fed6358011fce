use async_trait::async_trait;
use spanmetrics::{data_model::metric::MetricsBatch, sink::MetricsSink, GenericError};
use tracing::{debug, info};

/// Logs a summary of every batch it receives.
pub struct LoggingSink;

#[async_trait]
impl MetricsSink for LoggingSink {
    async fn consume_metrics(&self, batch: MetricsBatch) -> Result<(), GenericError> {
        info!(
            resources = batch.resource_metrics().len(),
            data_points = batch.data_point_count(),
            "Received span metrics."
        );

        for resource_metrics in batch.resource_metrics() {
            let service = resource_metrics
                .resource_attributes()
                .get(spanmetrics::key::SERVICE_NAME_KEY)
                .map(|value| value.to_string())
                .unwrap_or_default();

            for metric in resource_metrics.metrics() {
                debug!(
                    service = %service,
                    metric = metric.name(),
                    unit = metric.unit(),
                    temporality = ?metric.data().temporality(),
                    data_points = metric.data().data_point_count(),
                    "Metric."
                );
            }
        }

        Ok(())
    }
}
