use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info_span;

use oct_codebook::{CodebookReport, config_path, load_codebook, load_config};
use oct_core::ProvenanceStore;

use oct_cli::pipeline::{Pipeline, RawSource};
use oct_cli::summary::{
    print_codebook_report, print_provenance, print_raw_summary, print_run_summary,
};

use crate::cli::{CodebookArgs, ProcessArgs, ProvenanceArgs};

pub fn run_merge(config: Option<PathBuf>, progress: bool) -> Result<()> {
    let path = config_path(config);
    let mut pipeline = Pipeline::open(&path)?.with_progress(progress);
    let tables = pipeline.merge()?;
    print_raw_summary(&tables, pipeline.config());
    Ok(())
}

pub fn run_process(config: Option<PathBuf>, args: &ProcessArgs, progress: bool) -> Result<()> {
    let path = config_path(config);
    let span = info_span!("process", config = %path.display(), from_raw = args.from_raw);
    let _guard = span.enter();
    let mut pipeline = Pipeline::open(&path)?.with_progress(progress);
    let source = if args.from_raw {
        RawSource::Extracts
    } else {
        RawSource::Persisted
    };
    let outcome = pipeline.process(source)?;
    print_run_summary(&outcome);
    Ok(())
}

pub fn run_all(config: Option<PathBuf>, progress: bool) -> Result<()> {
    let path = config_path(config);
    let span = info_span!("run", config = %path.display());
    let _guard = span.enter();
    let mut pipeline = Pipeline::open(&path)?.with_progress(progress);
    let outcome = pipeline.run_all()?;
    print_run_summary(&outcome);
    Ok(())
}

pub fn run_provenance(config: Option<PathBuf>, args: &ProvenanceArgs) -> Result<()> {
    let path = config_path(config);
    let config = load_config(&path)
        .with_context(|| format!("load configuration {}", path.display()))?;
    let store_path = &config.paths.provenance;
    let store = ProvenanceStore::load(store_path)
        .with_context(|| format!("load provenance store {}", store_path.display()))?;
    print_provenance(&store.snapshot(), args.year);
    Ok(())
}

pub fn run_codebook(config: Option<PathBuf>, args: &CodebookArgs) -> Result<()> {
    let path = config_path(config);
    let config = load_config(&path)
        .with_context(|| format!("load configuration {}", path.display()))?;
    let codebook_path = &config.paths.codebook;
    let loaded = load_codebook(codebook_path)
        .with_context(|| format!("load codebook {}", codebook_path.display()))?;
    let report = CodebookReport::from_codebook(&loaded.codebook, &loaded.fingerprint);
    if args.json {
        let json = serde_json::to_string_pretty(&report).context("serialize codebook report")?;
        println!("{json}");
    } else {
        print_codebook_report(&report);
    }
    Ok(())
}
