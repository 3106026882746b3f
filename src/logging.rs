//! Tracing setup: console output plus a log file in the output directory.

use anyhow::Context;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_FILE: &str = "scraping.log";

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "cinescrape=debug"
    } else {
        "cinescrape=info"
    }
}

/// Console logging on stderr plus a plain-text copy in `{log_dir}/scraping.log`.
///
/// `RUST_LOG` takes precedence over the default level. Keep the returned guard
/// alive until exit so buffered file output is flushed.
pub fn init_logging(log_dir: &Path, verbose: bool) -> anyhow::Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Cannot create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_writer);
    let console_layer = fmt::layer().compact().with_writer(std::io::stderr);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Logging was already initialised")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_crate_level() {
        assert_eq!(default_directive(false), "cinescrape=info");
        assert_eq!(default_directive(true), "cinescrape=debug");
        assert!(EnvFilter::try_new(default_directive(true)).is_ok());
    }
}
