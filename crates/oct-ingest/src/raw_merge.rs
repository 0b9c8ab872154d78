//! Raw merge: concatenates the yearly extracts of each entity into one
//! unified table and summarizes every year.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDate;
use oct_common::parse_i64;
use oct_model::{Entity, EntityCounts, IngestConfig};
use polars::prelude::{Column, DataFrame, IntoColumn, NamedFrom, Series};
use tracing::{debug, info, warn};

use crate::csv_table::{CsvTable, read_csv_table};
use crate::discovery::{YearFile, discover_year_files};
use crate::error::{IngestError, Result};
use crate::progress::ProgressCallback;

/// Column appended to every unified table with the source year of the row.
pub const YEAR_COLUMN: &str = "year";

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Row counts and covered dates of one source year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearSummary {
    pub year: i32,
    pub counts: EntityCounts,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    /// True when no crash date parsed and the range fell back to the calendar year.
    pub range_inferred: bool,
}

impl YearSummary {
    pub fn date_start_str(&self) -> String {
        self.date_start.format("%Y-%m-%d").to_string()
    }

    pub fn date_end_str(&self) -> String {
        self.date_end.format("%Y-%m-%d").to_string()
    }
}

/// The unified raw tables, every column a nullable string except [`YEAR_COLUMN`].
#[derive(Debug, Clone)]
pub struct RawTables {
    pub crashes: DataFrame,
    pub parties: DataFrame,
    pub victims: DataFrame,
    pub years: Vec<YearSummary>,
}

impl RawTables {
    pub fn table(&self, entity: Entity) -> Option<&DataFrame> {
        match entity {
            Entity::Crashes => Some(&self.crashes),
            Entity::Parties => Some(&self.parties),
            Entity::Victims => Some(&self.victims),
            Entity::Collisions => None,
        }
    }

    pub fn year(&self, year: i32) -> Option<&YearSummary> {
        self.years.iter().find(|s| s.year == year)
    }
}

/// Parses a collision date in one of the accepted layouts. A time suffix
/// after a space or `T` is ignored.
pub fn parse_collision_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Min and max parseable date, or the calendar year when none parse.
pub fn covered_range<'a>(
    values: impl Iterator<Item = Option<&'a str>>,
    year: i32,
) -> (NaiveDate, NaiveDate, bool) {
    let mut range: Option<(NaiveDate, NaiveDate)> = None;
    for date in values.flatten().filter_map(parse_collision_date) {
        range = Some(match range {
            Some((lo, hi)) => (lo.min(date), hi.max(date)),
            None => (date, date),
        });
    }
    match range {
        Some((start, end)) => (start, end, false),
        None => {
            let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default();
            let end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or_default();
            (start, end, true)
        }
    }
}

/// Reads every yearly extract under `raw_dir` and concatenates them per
/// entity, year ascending, keeping source row order within a year.
pub fn merge_raw(
    raw_dir: &Path,
    ingest: &IngestConfig,
    years: &[i32],
    progress: &dyn ProgressCallback,
) -> Result<RawTables> {
    let files = discover_year_files(raw_dir, ingest, years)?;
    progress.set_total(files.len() as u64);

    let mut by_entity: BTreeMap<Entity, Vec<(i32, CsvTable)>> = BTreeMap::new();
    for file in &files {
        progress.set_message(format!("{} {}", file.entity, file.year));
        let table = read_year_file(file, &ingest.na_values)?;
        by_entity.entry(file.entity).or_default().push((file.year, table));
        progress.inc(1);
    }

    let mut summaries: BTreeMap<i32, YearSummary> = BTreeMap::new();
    let mut frames: BTreeMap<Entity, DataFrame> = BTreeMap::new();
    for entity in Entity::RAW {
        let parts = by_entity.remove(&entity).unwrap_or_default();
        for (year, table) in &parts {
            let summary = summaries.entry(*year).or_insert_with(|| {
                let (start, end, inferred) = covered_range(std::iter::empty(), *year);
                YearSummary {
                    year: *year,
                    counts: EntityCounts::default(),
                    date_start: start,
                    date_end: end,
                    range_inferred: inferred,
                }
            });
            let rows = table.len() as u64;
            match entity {
                Entity::Crashes => {
                    summary.counts.crashes = rows;
                    let (start, end, inferred) = match table.column_index(&ingest.date_column) {
                        Some(idx) => covered_range(table.column_values(idx), *year),
                        None => covered_range(std::iter::empty(), *year),
                    };
                    summary.date_start = start;
                    summary.date_end = end;
                    summary.range_inferred = inferred;
                    if inferred {
                        warn!(
                            year,
                            column = %ingest.date_column,
                            "no collision date parsed; using the calendar year as the covered range"
                        );
                    }
                }
                Entity::Parties => summary.counts.parties = rows,
                Entity::Victims => summary.counts.victims = rows,
                Entity::Collisions => {}
            }
        }
        let frame = concat_years(entity, &parts)?;
        info!(entity = %entity, rows = frame.height(), columns = frame.width(), "unified raw table");
        frames.insert(entity, frame);
    }
    progress.finish(format!("merged {} extracts", files.len()));

    let mut take = |entity: Entity| frames.remove(&entity).unwrap_or_default();
    Ok(RawTables {
        crashes: take(Entity::Crashes),
        parties: take(Entity::Parties),
        victims: take(Entity::Victims),
        years: summaries.into_values().collect(),
    })
}

fn read_year_file(file: &YearFile, na_values: &[String]) -> Result<CsvTable> {
    let table = read_csv_table(&file.path, na_values)?;
    debug!(
        entity = %file.entity,
        year = file.year,
        path = %file.path.display(),
        rows = table.len(),
        columns = table.headers.len(),
        "read extract"
    );
    Ok(table)
}

/// Stacks the yearly tables of one entity under the first year's header
/// order. Every year must carry the same set of columns.
///
/// [`YEAR_COLUMN`] always holds the year of the file a row came from; a
/// source column of that name is replaced.
fn concat_years(entity: Entity, parts: &[(i32, CsvTable)]) -> Result<DataFrame> {
    let Some((first_year, first)) = parts.first() else {
        return Ok(DataFrame::default());
    };
    let expected: BTreeSet<&str> = first.headers.iter().map(String::as_str).collect();
    if expected.contains(YEAR_COLUMN) {
        warn!(entity = %entity, column = YEAR_COLUMN, "source year column replaced by the file year");
    }
    let headers: Vec<&String> = first.headers.iter().filter(|h| *h != YEAR_COLUMN).collect();

    let total: usize = parts.iter().map(|(_, t)| t.len()).sum();
    let mut values: Vec<Vec<Option<&str>>> = vec![Vec::with_capacity(total); headers.len()];
    let mut year_values: Vec<i64> = Vec::with_capacity(total);

    for (year, table) in parts {
        let actual: BTreeSet<&str> = table.headers.iter().map(String::as_str).collect();
        if actual != expected {
            return Err(IngestError::HeaderMismatch {
                entity,
                year: *year,
                first_year: *first_year,
                missing: expected.difference(&actual).map(|s| (*s).to_string()).collect(),
                unexpected: actual.difference(&expected).map(|s| (*s).to_string()).collect(),
            });
        }
        for (out, header) in values.iter_mut().zip(&headers) {
            let idx = table.column_index(header).unwrap_or_default();
            out.extend(table.column_values(idx));
        }
        year_values.extend(std::iter::repeat_n(i64::from(*year), table.len()));
    }

    let mut columns: Vec<Column> = Vec::with_capacity(headers.len() + 1);
    for (header, column) in headers.iter().zip(values) {
        columns.push(Series::new(header.as_str().into(), column).into_column());
    }
    columns.push(Series::new(YEAR_COLUMN.into(), year_values).into_column());
    Ok(DataFrame::new(columns)?)
}

/// Reads a unified raw table persisted by an earlier merge.
///
/// Every column comes back as a nullable string except [`YEAR_COLUMN`],
/// which is restored to Int64.
pub fn read_unified_table(path: &Path, na_values: &[String]) -> Result<DataFrame> {
    if !path.is_file() {
        return Err(IngestError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "unified table not found"),
        });
    }
    let table = read_csv_table(path, na_values)?;
    let Some(year_idx) = table.column_index(YEAR_COLUMN) else {
        return Err(IngestError::MissingColumn {
            path: path.to_path_buf(),
            column: YEAR_COLUMN.to_string(),
        });
    };
    let years: Vec<Option<i64>> = table
        .column_values(year_idx)
        .map(|v| v.and_then(parse_i64))
        .collect();
    let mut df = table.to_frame()?;
    df.with_column(Series::new(YEAR_COLUMN.into(), years))?;
    debug!(path = %path.display(), rows = df.height(), "read unified raw table");
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_dates_accept_both_layouts() {
        assert_eq!(
            parse_collision_date("2020-03-08"),
            NaiveDate::from_ymd_opt(2020, 3, 8)
        );
        assert_eq!(
            parse_collision_date("03/08/2020"),
            NaiveDate::from_ymd_opt(2020, 3, 8)
        );
        assert_eq!(
            parse_collision_date("2020-03-08 00:00:00"),
            NaiveDate::from_ymd_opt(2020, 3, 8)
        );
        assert_eq!(parse_collision_date("March 8"), None);
    }

    #[test]
    fn range_falls_back_to_calendar_year() {
        let values = [Some("garbage"), None];
        let (start, end, inferred) = covered_range(values.into_iter(), 2019);
        assert!(inferred);
        assert_eq!(start, NaiveDate::from_ymd_opt(2019, 1, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2019, 12, 31).unwrap());
    }

    #[test]
    fn range_uses_min_and_max() {
        let values = [Some("2019-12-31"), Some("2019-01-02"), Some("bad")];
        let (start, end, inferred) = covered_range(values.into_iter(), 2019);
        assert!(!inferred);
        assert_eq!(start, NaiveDate::from_ymd_opt(2019, 1, 2).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2019, 12, 31).unwrap());
    }
}
