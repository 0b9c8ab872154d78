//! CLI argument definitions for `octraffic`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "octraffic",
    version,
    about = "OCTraffic - build analysis-ready collision tables from yearly SWITRS extracts",
    long_about = "Merge yearly crash, party and victim extracts into unified tables,\n\
                  derive temporal, severity and categorical features, and export\n\
                  collision tables and GeoJSON features with per-year provenance."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Pipeline configuration file (default: $OCTRAFFIC_CONFIG or ./octraffic.toml).
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Merge the yearly extracts into unified raw tables.
    Merge,

    /// Run every stage after the raw merge.
    Process(ProcessArgs),

    /// Merge the yearly extracts, then process them.
    Run,

    /// Show the per-year provenance snapshot.
    Provenance(ProvenanceArgs),

    /// Summarize the codebook and report inconsistencies.
    Codebook(CodebookArgs),
}

#[derive(Parser)]
pub struct ProcessArgs {
    /// Re-read the yearly extracts instead of the unified tables written by `merge`.
    ///
    /// The extracts are merged in memory only: nothing is written under
    /// `{output}/raw` and no raw-merge provenance is recorded.
    #[arg(long = "from-raw")]
    pub from_raw: bool,
}

#[derive(Parser)]
pub struct ProvenanceArgs {
    /// Limit the table to one source year.
    #[arg(long = "year", value_name = "YEAR")]
    pub year: Option<i32>,
}

#[derive(Parser)]
pub struct CodebookArgs {
    /// Print the report as JSON.
    #[arg(long = "json")]
    pub json: bool,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_accepts_from_raw_and_global_flags() {
        let cli = Cli::try_parse_from([
            "octraffic",
            "process",
            "--from-raw",
            "--config",
            "conf/octraffic.toml",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("conf/octraffic.toml")));
        assert!(matches!(cli.log_format, LogFormatArg::Json));
        assert!(matches!(cli.command, Command::Process(ProcessArgs { from_raw: true })));
    }

    #[test]
    fn provenance_year_is_optional() {
        let cli = Cli::try_parse_from(["octraffic", "provenance", "--year", "2021"]).unwrap();
        assert!(matches!(cli.command, Command::Provenance(ProvenanceArgs { year: Some(2021) })));
        let cli = Cli::try_parse_from(["octraffic", "provenance"]).unwrap();
        assert!(matches!(cli.command, Command::Provenance(ProvenanceArgs { year: None })));
    }
}
