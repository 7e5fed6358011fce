//! Sandbox for running the span metrics engine against synthetic traffic.
//!
//! Spans are generated at a fixed rate for a handful of fake services and fed into the engine, and every flushed batch
//! is summarized in the logs, along with the engine's internal metrics.

#![deny(warnings)]
#![deny(missing_docs)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use spanmetrics::{
    clock::{Clock, SystemClock},
    config::SpanMetricsConfiguration,
    engine::SpanMetrics,
    scheduler::FlushScheduler,
    GenericError,
};
use spanmetrics_app::prelude::*;
use spanmetrics_config::ConfigurationLoader;
use tokio::{
    select,
    time::{interval, sleep, MissedTickBehavior},
};
use tracing::{error, info};

mod generator;
use self::generator::SpanGenerator;

mod sink;
use self::sink::LoggingSink;

const ENV_PREFIX: &str = "SPANMETRICS";
const BATCHES_PER_SECOND: u64 = 10;

#[derive(Clone, Parser)]
#[command(about)]
struct Cli {
    /// Path to a YAML configuration file.
    ///
    /// Settings can also be provided, or overridden, with environment variables prefixed with `SPANMETRICS_`. Nested
    /// settings are separated by a double underscore, such as `SPANMETRICS_HISTOGRAM__UNIT=s`.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of spans to generate per second.
    #[arg(long, default_value_t = 1000)]
    spans_per_second: u64,

    /// Number of distinct services to generate spans for.
    #[arg(long, default_value_t = 3)]
    services: usize,

    /// Seed for the span generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// How long to run for, in seconds. Runs until interrupted when not set.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// How often to log internal metrics, in seconds.
    #[arg(long, default_value_t = 10)]
    telemetry_interval_secs: u64,
}

impl Cli {
    fn configuration_loader(&self) -> Result<ConfigurationLoader, GenericError> {
        let loader = match &self.config {
            Some(path) => ConfigurationLoader::default()
                .from_yaml(path)
                .with_context(|| format!("Failed to load configuration file '{}'.", path.display()))?,
            None => ConfigurationLoader::default(),
        };

        Ok(loader.from_environment(ENV_PREFIX)?)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging_config = match cli
        .configuration_loader()
        .and_then(|loader| LoggingConfiguration::from_loader(loader).map_err(Into::into))
    {
        Ok(config) => config,
        Err(e) => fatal_and_exit(format!("failed to load logging configuration: {:#}", e)),
    };
    if let Err(e) = initialize_logging(&logging_config) {
        fatal_and_exit(format!("failed to initialize logging: {:#}", e));
    }

    if let Err(e) = initialize_metrics(Duration::from_secs(cli.telemetry_interval_secs.max(1))) {
        fatal_and_exit(format!("failed to initialize metrics: {:#}", e));
    }

    match run(cli).await {
        Ok(()) => info!("spanmetrics-sandbox stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    let config: SpanMetricsConfiguration = cli
        .configuration_loader()?
        .into_typed()
        .context("Failed to load span metrics configuration.")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(
        SpanMetrics::from_configuration(&config, Arc::clone(&clock)).context("Invalid span metrics configuration.")?,
    );
    let scheduler = FlushScheduler::new(
        Arc::clone(&engine),
        Arc::new(LoggingSink),
        Arc::clone(&clock),
        config.flush_interval(),
    );

    info!(
        spans_per_second = cli.spans_per_second,
        services = cli.services,
        temporality = ?config.temporality(),
        flush_interval = ?config.flush_interval(),
        "spanmetrics-sandbox starting..."
    );
    scheduler.start()?;

    let deadline = async {
        match cli.duration_secs {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(deadline, interrupted);

    let mut generator = SpanGenerator::new(cli.seed, cli.services);
    let spans_per_batch = (cli.spans_per_second / BATCHES_PER_SECOND).max(1) as usize;
    let mut batches = interval(Duration::from_millis(1000 / BATCHES_PER_SECOND));
    batches.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = batches.tick() => {
                let batch = generator.generate(clock.now(), spans_per_batch);
                engine.consume_traces(&batch);
            }
            _ = &mut deadline => {
                info!("Run duration elapsed.");
                break;
            }
            result = &mut interrupted => {
                result.context("Failed to listen for interrupt signal.")?;
                info!("Received interrupt signal.");
                break;
            }
        }
    }

    scheduler.shutdown().await?;
    info!(active_resources = engine.active_resources(), "Flush scheduler stopped.");
    log_internal_metrics();

    Ok(())
}
