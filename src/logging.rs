//! Tracing setup: human-readable output on stdout plus an append-only error
//! log on disk that keeps every failure after the console has scrolled away.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global subscriber. `RUST_LOG` overrides `level`. When
/// `error_log` is set, error events are also appended to that file.
pub fn init_logging(level: &str, error_log: Option<&Path>) -> Result<()> {
    let error_layer = error_log
        .map(|path| open_error_log(path).map(error_file_layer))
        .transpose()?;

    tracing_subscriber::registry()
        .with(build_env_filter(level))
        .with(fmt::layer().with_target(false))
        .with(error_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn open_error_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening error log {}", path.display()))
}

/// Error-level events only, without ANSI colours.
pub fn error_file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(LevelFilter::ERROR)
}
