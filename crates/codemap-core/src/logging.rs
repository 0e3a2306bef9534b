use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::{CodemapError, CodemapResult};

/// Install the global tracing subscriber. `RUST_LOG`, when set, takes
/// precedence over the configured level. Output goes to stderr.
pub fn init_logging(config: &LoggingConfig) -> CodemapResult<()> {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CodemapError::Config(format!("invalid log level {:?}: {e}", config.level)))?;

    let fmt_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| CodemapError::Config(format!("failed to initialize tracing subscriber: {e}")))?;

    Ok(())
}
