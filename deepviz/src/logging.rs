use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

pub fn level(verbose: bool, trace: bool) -> &'static str {
    if trace {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

fn default_directives(level: &str) -> String {
    format!("warn,deepviz={level},genai={level}")
}

/// Logs human-readable lines to stderr and JSON lines to `log_file`.
///
/// `RUST_LOG` takes precedence over the `verbose`/`trace` flags.
pub fn init(verbose: bool, trace: bool, log_file: &Path) -> Result<()> {
    let file = std::fs::File::create(log_file)
        .map_err(|e| Error::Logging(format!("failed to create {}: {e}", log_file.display())))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level(verbose, trace))));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(
            fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing::debug!(log_file = %log_file.display(), "Logging initialized");
    Ok(())
}
