//! Staged pipeline orchestration.
//!
//! The stages run in this order:
//! 1. **Raw merge**: stack the yearly extracts and persist the unified tables
//! 2. **Normalize**: renames, key rules and surrogate ids
//! 3. **Temporal**: date, time and rush-hour features
//! 4. **Severity**: casualty aggregates and collision severity
//! 5. **Recode**: categorical labels, flags and bands
//! 6. **Merge**: collisions, the detail expansion and back-propagation
//! 7. **Export**: spatial filter, CSV tables and GeoJSON features
//!
//! Every stage runs inside an `info_span!` and ends with a provenance
//! checkpoint: pending events are appended to the store and the store is
//! saved. A stage that fails leaves the store as the previous stage wrote it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use polars::prelude::DataFrame;
use tracing::{debug, info, info_span, warn};

use oct_codebook::{LoadedCodebook, load_codebook, load_config};
use oct_core::{MergeInputs, MergedTables, ProvenanceStore, ProvenanceTracker, RunContext, merge_entities};
use oct_ingest::{ProgressCallback, RawTables, merge_raw, read_csv_table, read_unified_table};
use oct_model::{Entity, EntityCounts, PipelineConfig, Stage};
use oct_spatial::{
    BoundaryIndex, FilterOutcome, feature_path, filter_crashes, raw_table_path,
    restrict_to_retained, table_path, write_csv, write_features,
};
use oct_transform::{
    EntityFrame, RawInput, TransformContext, derive_severity, derive_temporal, normalize,
    recode_all,
};

use crate::progress::IndicatifProgress;

/// Unknown severity codes are reported under this key with the recode counts.
const SEVERITY_KEY: &str = "crashes.coll_severity";

/// Table names written under `{output}/tables`.
pub const OUTPUT_TABLES: [&str; 5] = [
    "crashes",
    "parties",
    "victims",
    "collisions",
    "collisions_detail",
];

// ============================================================================
// Outcome types
// ============================================================================

/// Rows read and written for one output table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: &'static str,
    /// Raw rows, for the three source entities.
    pub rows_in: Option<usize>,
    pub rows_out: usize,
}

/// What a `process` or `run` invocation produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub years: (i32, i32),
    pub output_dir: PathBuf,
    pub tables: Vec<TableSummary>,
    pub excluded: u64,
    pub unknown_codes: u64,
    pub invalid_datetime: u64,
    pub boundary_filled: u64,
    pub unmatched_cities: u64,
    pub written: Vec<PathBuf>,
}

/// Where the normalize stage takes its raw tables from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSource {
    /// The unified tables persisted by an earlier `merge`.
    Persisted,
    /// Re-read the yearly extracts without persisting or recording them.
    Extracts,
}

struct DerivedTables {
    crashes: EntityFrame,
    parties: EntityFrame,
    victims: EntityFrame,
    unknown_codes: u64,
    invalid_datetime: u64,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    codebook: LoadedCodebook,
    run: RunContext,
    tracker: ProvenanceTracker,
    store: ProvenanceStore,
    show_progress: bool,
}

impl Pipeline {
    /// Loads the configuration, the codebook and the provenance store.
    pub fn open(config_path: &Path) -> Result<Self> {
        let config = load_config(config_path)
            .with_context(|| format!("load configuration {}", config_path.display()))?;
        let codebook = load_codebook(&config.paths.codebook)
            .with_context(|| format!("load codebook {}", config.paths.codebook.display()))?;
        let store = ProvenanceStore::load(&config.paths.provenance).with_context(|| {
            format!(
                "load provenance store {}",
                config.paths.provenance.display()
            )
        })?;
        let run = RunContext::start(config.year_range(), Some(codebook.fingerprint.clone()));
        info!(
            run_id = %run.run_id,
            codebook_version = %codebook.codebook.version(),
            events = store.events.len(),
            "pipeline opened"
        );
        Ok(Self {
            config,
            codebook,
            run,
            tracker: ProvenanceTracker::new(),
            store,
            show_progress: false,
        })
    }

    /// Replaces the run identity, so tags and timestamps can be pinned.
    #[must_use]
    pub fn with_run(mut self, run: RunContext) -> Self {
        self.run = run;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_context(&self) -> &RunContext {
        &self.run
    }

    pub fn store(&self) -> &ProvenanceStore {
        &self.store
    }

    /// Raw merge only: unified tables persisted under `{output}/raw`.
    pub fn merge(&mut self) -> Result<RawTables> {
        self.stage(Stage::RawMerge, |pipeline| pipeline.raw_merge(true))
    }

    /// Every stage after the raw merge.
    pub fn process(&mut self, source: RawSource) -> Result<RunOutcome> {
        let raw = match source {
            RawSource::Persisted => self.load_persisted()?,
            RawSource::Extracts => {
                let tables = self.raw_merge(false)?;
                RawInput {
                    crashes: tables.crashes,
                    parties: tables.parties,
                    victims: tables.victims,
                }
            }
        };
        self.process_raw(raw)
    }

    /// Raw merge followed by every other stage.
    pub fn run_all(&mut self) -> Result<RunOutcome> {
        let tables = self.merge()?;
        self.process_raw(RawInput {
            crashes: tables.crashes,
            parties: tables.parties,
            victims: tables.victims,
        })
    }

    /// Runs `body` inside the stage span, then checkpoints provenance.
    fn stage<T, F>(&mut self, stage: Stage, body: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let span = info_span!(
            "stage",
            stage = %stage,
            first_year = self.run.first_year,
            last_year = self.run.last_year
        );
        let start = Instant::now();
        let value = span
            .in_scope(|| body(&mut *self))
            .with_context(|| format!("{stage} stage failed"))?;
        self.checkpoint()
            .with_context(|| format!("{stage} stage checkpoint"))?;
        info!(
            stage = %stage,
            duration_ms = start.elapsed().as_millis(),
            "stage complete"
        );
        Ok(value)
    }

    fn checkpoint(&mut self) -> Result<()> {
        let added = self.store.merge(&self.tracker);
        let path = &self.config.paths.provenance;
        self.store
            .save(path)
            .with_context(|| format!("save provenance store {}", path.display()))?;
        debug!(added, total = self.store.events.len(), "provenance checkpoint");
        Ok(())
    }

    fn years(&self) -> Vec<i32> {
        self.config.project.years.clone()
    }

    // ------------------------------------------------------------------------
    // Stage 1: raw merge
    // ------------------------------------------------------------------------

    fn raw_merge(&mut self, persist: bool) -> Result<RawTables> {
        let raw_dir = &self.config.paths.raw_dir;
        let years = self.years();
        let progress = IndicatifProgress::files_bar("Reading yearly extracts", self.show_progress);
        let tables = merge_raw(raw_dir, &self.config.ingest, &years, &progress)
            .with_context(|| format!("merge yearly extracts in {}", raw_dir.display()))?;
        progress.finish(format!("read {} years", tables.years.len()));

        if !persist {
            return Ok(tables);
        }
        let output_dir = &self.config.paths.output_dir;
        for entity in Entity::RAW {
            let Some(df) = tables.table(entity) else {
                continue;
            };
            let path = raw_table_path(output_dir, entity.as_str());
            write_csv(df, &path)
                .with_context(|| format!("write unified table {}", path.display()))?;
        }
        for summary in &tables.years {
            let mut event = self
                .run
                .event(Stage::RawMerge, summary.year)
                .with_counts(summary.counts);
            event.date_start = Some(summary.date_start_str());
            event.date_end = Some(summary.date_end_str());
            event.status = Some(self.config.project.status_for(summary.year));
            if summary.range_inferred {
                event = event.with_note("no parseable collision dates; covered range is the calendar year");
            }
            self.tracker.record(event);
        }
        Ok(tables)
    }

    fn load_persisted(&self) -> Result<RawInput> {
        let output_dir = &self.config.paths.output_dir;
        let na = &self.config.ingest.na_values;
        let read = |entity: Entity| -> Result<DataFrame> {
            let path = raw_table_path(output_dir, entity.as_str());
            read_unified_table(&path, na).with_context(|| {
                format!(
                    "read unified table {} (run `octraffic merge` first)",
                    path.display()
                )
            })
        };
        let raw = RawInput {
            crashes: read(Entity::Crashes)?,
            parties: read(Entity::Parties)?,
            victims: read(Entity::Victims)?,
        };
        self.check_persisted_years(&raw)?;
        Ok(raw)
    }

    /// The unified tables must hold exactly the configured years.
    fn check_persisted_years(&self, raw: &RawInput) -> Result<()> {
        let mut persisted = BTreeSet::new();
        for (entity, df) in [
            (Entity::Crashes, &raw.crashes),
            (Entity::Parties, &raw.parties),
            (Entity::Victims, &raw.victims),
        ] {
            let frame = EntityFrame::new(entity, df.clone());
            persisted.extend(frame.year_counts()?.into_keys());
        }
        let configured: BTreeSet<i32> = self.config.project.years.iter().copied().collect();
        if persisted != configured {
            anyhow::bail!(
                "unified tables hold years {:?} but the configuration lists {:?}; re-run `octraffic merge`",
                persisted,
                configured
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Stages 2-5: derivation
    // ------------------------------------------------------------------------

    fn process_raw(&mut self, raw: RawInput) -> Result<RunOutcome> {
        let rows_in = [raw.crashes.height(), raw.parties.height(), raw.victims.height()];
        let DerivedTables {
            crashes,
            parties,
            victims,
            unknown_codes,
            invalid_datetime,
        } = self.derive(raw)?;
        let merged = self.stage(Stage::Merge, |pipeline| {
            pipeline.merge_stage(crashes, parties, victims)
        })?;
        let report = merged.report.clone();
        let (tables, excluded, written) =
            self.stage(Stage::Export, |pipeline| pipeline.export(merged, rows_in))?;
        Ok(RunOutcome {
            run_id: self.run.run_id.clone(),
            years: (self.run.first_year, self.run.last_year),
            output_dir: self.config.paths.output_dir.clone(),
            tables,
            excluded,
            unknown_codes,
            invalid_datetime,
            boundary_filled: report.boundary_filled,
            unmatched_cities: report.unmatched_cities,
            written,
        })
    }

    fn derive(&mut self, raw: RawInput) -> Result<DerivedTables> {
        let years = self.years();

        let normalized = self.stage(Stage::Normalize, |pipeline| {
            let ctx = TransformContext::new(&pipeline.codebook.codebook, &pipeline.config);
            let normalized = normalize(raw, &ctx).context("normalize raw tables")?;
            pipeline.tracker.record_years(&years, |year| {
                let counts = normalized.counts.get(&year).copied().unwrap_or_default();
                pipeline.run.event(Stage::Normalize, year).with_counts(counts)
            });
            Ok(normalized)
        })?;
        let mut crashes = normalized.crashes;
        let mut parties = normalized.parties;
        let mut victims = normalized.victims;

        let temporal = self.stage(Stage::Temporal, |pipeline| {
            let report = derive_temporal(&mut crashes, &pipeline.config.temporal)
                .context("derive temporal features")?;
            pipeline.tracker.record_years(&years, |year| {
                let mut event = pipeline.run.event(Stage::Temporal, year);
                event.invalid_datetime = Some(report.invalid_by_year.get(&year).copied().unwrap_or(0));
                event
            });
            Ok(report)
        })?;

        let severity = self.stage(Stage::Severity, |pipeline| {
            let ctx = TransformContext::new(&pipeline.codebook.codebook, &pipeline.config);
            let report = derive_severity(&mut crashes, &mut parties, &mut victims, &ctx)
                .context("derive collision severity")?;
            pipeline.tracker.record_years(&years, |year| {
                let mut event = pipeline.run.event(Stage::Severity, year);
                if let Some(unknown) = report.unknown_by_year.get(&year).filter(|n| **n > 0) {
                    event.unknown_codes.insert(SEVERITY_KEY.to_string(), *unknown);
                }
                event
            });
            Ok(report)
        })?;

        let recode = self.stage(Stage::Recode, |pipeline| {
            let ctx = TransformContext::new(&pipeline.codebook.codebook, &pipeline.config);
            let mut report = recode_all(&mut crashes, &mut parties, &mut victims, &ctx)
                .context("recode categorical columns")?;
            for (year, unknown) in &severity.unknown_by_year {
                report.add(*year, SEVERITY_KEY, *unknown);
            }
            pipeline.tracker.record_years(&years, |year| {
                let mut event = pipeline.run.event(Stage::Recode, year);
                event.unknown_codes = report.for_year(year);
                event
            });
            Ok(report)
        })?;

        let invalid_datetime = temporal.total_invalid();
        if invalid_datetime > 0 {
            warn!(invalid_datetime, "crashes without a valid collision date and time");
        }
        Ok(DerivedTables {
            crashes,
            parties,
            victims,
            unknown_codes: recode.total(),
            invalid_datetime,
        })
    }

    // ------------------------------------------------------------------------
    // Stage 6: merge
    // ------------------------------------------------------------------------

    fn merge_stage(
        &mut self,
        crashes: EntityFrame,
        parties: EntityFrame,
        victims: EntityFrame,
    ) -> Result<MergedTables> {
        let paths = &self.config.paths;
        let cities = self.reference_table(paths.cities.as_deref(), "cities")?;
        let roads = self.reference_table(paths.roads.as_deref(), "roads")?;
        let boundaries = match paths.boundaries.as_deref() {
            Some(path) => Some(
                BoundaryIndex::load(path, &self.config.merge.city_column)
                    .with_context(|| format!("load boundaries {}", path.display()))?,
            ),
            None => None,
        };

        let ctx = TransformContext::new(&self.codebook.codebook, &self.config);
        let merged = merge_entities(
            MergeInputs {
                crashes,
                parties,
                victims,
                cities: cities.as_ref(),
                roads: roads.as_ref(),
                boundaries: boundaries.as_ref(),
            },
            &ctx,
            &self.run,
        )
        .context("merge crashes, parties and victims")?;

        let collisions = merged.collisions.year_counts()?;
        let parties = merged.parties.year_counts()?;
        let victims = merged.victims.year_counts()?;
        let years = self.years();
        self.tracker.record_years(&years, |year| {
            let count = |counts: &BTreeMap<i32, u64>| counts.get(&year).copied().unwrap_or(0);
            self.run.event(Stage::Merge, year).with_counts(EntityCounts::new(
                count(&collisions),
                count(&parties),
                count(&victims),
            ))
        });
        Ok(merged)
    }

    fn reference_table(&self, path: Option<&Path>, name: &str) -> Result<Option<DataFrame>> {
        let Some(path) = path else {
            return Ok(None);
        };
        let table = read_csv_table(path, &self.config.ingest.na_values)
            .with_context(|| format!("read {name} table {}", path.display()))?;
        let df = table
            .to_frame()
            .with_context(|| format!("build {name} table {}", path.display()))?;
        debug!(table = name, rows = df.height(), "loaded reference table");
        Ok(Some(df))
    }

    // ------------------------------------------------------------------------
    // Stage 7: export
    // ------------------------------------------------------------------------

    fn export(
        &mut self,
        merged: MergedTables,
        rows_in: [usize; 3],
    ) -> Result<(Vec<TableSummary>, u64, Vec<PathBuf>)> {
        let spatial = &self.config.spatial;
        let outcome = filter_crashes(&merged.crashes, spatial).context("filter crash locations")?;
        if outcome.excluded_total() > 0 {
            warn!(
                excluded = outcome.excluded_total(),
                "crashes excluded by the spatial filter"
            );
        }
        let parties = restrict(&merged.parties, &outcome)?;
        let victims = restrict(&merged.victims, &outcome)?;
        let collisions = restrict(&merged.collisions, &outcome)?;
        let detail = restrict(&merged.detail, &outcome)?;

        let output_dir = self.config.paths.output_dir.clone();
        let mut written = Vec::new();
        let outputs: [(&'static str, &DataFrame); 5] = [
            (OUTPUT_TABLES[0], &outcome.retained.data),
            (OUTPUT_TABLES[1], &parties.data),
            (OUTPUT_TABLES[2], &victims.data),
            (OUTPUT_TABLES[3], &collisions.data),
            (OUTPUT_TABLES[4], &detail.data),
        ];
        for (name, df) in outputs {
            let path = table_path(&output_dir, name);
            write_csv(df, &path).with_context(|| format!("write table {}", path.display()))?;
            written.push(path);
        }

        let mut features = vec![(Entity::Crashes, &outcome.retained.data)];
        if spatial.export_children {
            features.push((Entity::Parties, &parties.data));
            features.push((Entity::Victims, &victims.data));
        }
        for (entity, df) in features {
            let path = feature_path(&output_dir, entity.as_str());
            write_features(df, &path, spatial.target_srid)
                .with_context(|| format!("write features {}", path.display()))?;
            written.push(path);
        }

        let party_years = parties.year_counts()?;
        let victim_years = victims.year_counts()?;
        let years = self.years();
        self.tracker.record_years(&years, |year| {
            let count = |counts: &BTreeMap<i32, u64>| counts.get(&year).copied().unwrap_or(0);
            let mut event = self.run.event(Stage::Export, year).with_counts(EntityCounts::new(
                count(&outcome.retained_by_year),
                count(&party_years),
                count(&victim_years),
            ));
            event.excluded = Some(outcome.excluded_for(year));
            event
        });

        let tables = vec![
            TableSummary {
                name: OUTPUT_TABLES[0],
                rows_in: Some(rows_in[0]),
                rows_out: outcome.retained.record_count(),
            },
            TableSummary {
                name: OUTPUT_TABLES[1],
                rows_in: Some(rows_in[1]),
                rows_out: parties.record_count(),
            },
            TableSummary {
                name: OUTPUT_TABLES[2],
                rows_in: Some(rows_in[2]),
                rows_out: victims.record_count(),
            },
            TableSummary {
                name: OUTPUT_TABLES[3],
                rows_in: None,
                rows_out: collisions.record_count(),
            },
            TableSummary {
                name: OUTPUT_TABLES[4],
                rows_in: None,
                rows_out: detail.record_count(),
            },
        ];
        Ok((tables, outcome.excluded_total(), written))
    }
}

fn restrict(frame: &EntityFrame, outcome: &FilterOutcome) -> Result<EntityFrame> {
    restrict_to_retained(frame, outcome)
        .with_context(|| format!("restrict {} to retained crashes", frame.entity))
}
