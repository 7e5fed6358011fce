use anyhow::{anyhow, Context as _};
use serde::Deserialize;
use serde_with::serde_as;
use spanmetrics_config::{deser::PermissiveBool, ConfigurationError, ConfigurationLoader};
use tracing_subscriber::EnvFilter;

use crate::GenericError;

fn default_log_level() -> LogLevel {
    LogLevel("info".to_string())
}

/// Logging configuration.
#[serde_as]
#[derive(Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Filtering directives, in the same syntax as `RUST_LOG`.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub(crate) log_level: LogLevel,

    /// Whether to emit logs as JSON, one object per line.
    ///
    /// Defaults to `false`.
    #[serde_as(as = "PermissiveBool")]
    #[serde(default)]
    pub(crate) log_format_json: bool,
}

impl LoggingConfiguration {
    /// Loads the logging configuration from the given loader.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_loader(loader: ConfigurationLoader) -> Result<Self, ConfigurationError> {
        loader.into_typed()
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "String")]
pub(crate) struct LogLevel(String);

impl LogLevel {
    pub fn as_env_filter(&self) -> Result<EnvFilter, GenericError> {
        EnvFilter::builder()
            .parse(&self.0)
            .with_context(|| format!("Failed to parse log level '{}'.", self.0))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(anyhow!("Log level cannot be empty."));
        }

        let level = Self(value);
        level.as_env_filter()?;
        Ok(level)
    }
}
