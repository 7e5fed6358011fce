//! Logging.

use std::io::IsTerminal as _;

use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _};

use crate::GenericError;

mod config;
pub use self::config::LoggingConfiguration;

mod layer;
use self::layer::build_formatting_layer;

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Events are filtered by the configured log level, and written to standard output either as JSON or in a
/// human-readable format. ANSI colors are only used for the human-readable format, and only when standard output is a
/// terminal.
///
/// # Errors
///
/// If the log level is invalid, or if the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<(), GenericError> {
    let filter = config.log_level.as_env_filter()?;
    let use_ansi = std::io::stdout().is_terminal();

    tracing_subscriber::registry()
        .with(build_formatting_layer(config, use_ansi, std::io::stdout).with_filter(filter))
        .try_init()?;

    Ok(())
}
