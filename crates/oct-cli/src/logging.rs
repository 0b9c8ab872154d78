//! Logging setup for `octraffic` runs.
//!
//! Every pipeline stage runs inside an `info_span!` named `stage`, so both
//! outputs show which stage emitted an event.
//!
//! # Log Levels
//!
//! - `error`: fatal failures
//! - `warn`: data-quality summaries (unknown codes, invalid datetimes, exclusions)
//! - `info`: stage progress, row counts and durations
//! - `debug`: per-column and per-file detail

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

/// Crates whose events pass the default filter at the configured level.
const CRATES: [&str; 8] = [
    "octraffic",
    "oct_cli",
    "oct_codebook",
    "oct_core",
    "oct_ingest",
    "oct_model",
    "oct_spatial",
    "oct_transform",
];

type OutputLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// How a run reports its events.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level_filter: LevelFilter,
    /// Let `RUST_LOG` replace the level filter when it is set.
    pub use_env_filter: bool,
    /// Colors on stderr. Log files never get escape codes.
    pub with_ansi: bool,
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub log_file: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One human-readable line per event.
    #[default]
    Pretty,
    /// One JSON object per event, with the current stage span.
    Json,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level_filter: LevelFilter::WARN,
            use_env_filter: true,
            with_ansi: true,
            format: LogFormat::default(),
            log_file: None,
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init_logging(config: &LogConfig) -> io::Result<()> {
    let layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            output_layer(config.format, Mutex::new(file), false, true)
        }
        None => output_layer(config.format, io::stderr, config.with_ansi, false),
    };
    tracing_subscriber::registry()
        .with(build_env_filter(config))
        .with(layer)
        .init();
    Ok(())
}

/// Pretty lines are timestamped only in a log file; on a terminal the
/// progress bars already show elapsed time.
fn output_layer<W>(format: LogFormat, writer: W, ansi: bool, timestamps: bool) -> OutputLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(false)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty if timestamps => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .without_time()
            .boxed(),
    }
}

/// Default directives: external crates at `warn`, ours at the configured level.
fn default_directives(level_filter: LevelFilter) -> String {
    let level = level_filter.to_string().to_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(CRATES.iter().map(|name| format!("{name}={level}")));
    directives.join(",")
}

fn build_env_filter(config: &LogConfig) -> EnvFilter {
    let fallback = || EnvFilter::new(default_directives(config.level_filter));
    if config.use_env_filter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
    } else {
        fallback()
    }
}
