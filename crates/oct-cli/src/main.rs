//! OCTraffic CLI.

use clap::{ColorChoice, Parser};
use oct_cli::logging::{LogConfig, LogFormat, init_logging};
use std::io::{self, IsTerminal};
use tracing::level_filters::LevelFilter;

mod cli;
mod commands;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg};
use crate::commands::{run_all, run_codebook, run_merge, run_process, run_provenance};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    let progress = cli.log_file.is_none() && io::stderr().is_terminal();
    let config = cli.config.clone();
    let result = match &cli.command {
        Command::Merge => run_merge(config, progress),
        Command::Process(args) => run_process(config, args, progress),
        Command::Run => run_all(config, progress),
        Command::Provenance(args) => run_provenance(config, args),
        Command::Codebook(args) => run_codebook(config, args),
    };
    let exit_code = match result {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("error: {error:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

/// Logging for this invocation. `-v`/`-q` or `--log-level` take precedence
/// over `RUST_LOG`.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let explicit = cli.verbosity.is_present() || cli.log_level.is_some();
    let level_filter = match cli.log_level {
        Some(LogLevelArg::Error) => LevelFilter::ERROR,
        Some(LogLevelArg::Warn) => LevelFilter::WARN,
        Some(LogLevelArg::Info) => LevelFilter::INFO,
        Some(LogLevelArg::Debug) => LevelFilter::DEBUG,
        None => cli.verbosity.tracing_level_filter(),
    };
    let format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Json => LogFormat::Json,
    };
    let with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stderr().is_terminal(),
    };
    LogConfig {
        level_filter,
        use_env_filter: !explicit,
        with_ansi,
        format,
        log_file: cli.log_file.clone(),
    }
}
