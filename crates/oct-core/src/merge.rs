//! Entity merger: crash-level collisions, the crash/party/victim detail
//! expansion, back-propagation of crash attributes and processing tags.
//!
//! Joins are built by indexed lookup: each output row records which row of
//! each input it came from, and columns are gathered from those positions.
//! This keeps multiplicity explicit and never reorders source rows within
//! a crash.

use std::collections::{BTreeMap, HashMap, HashSet};

use oct_common::{
    f64_column, gather_frame, has_column, i64_column, opt_string_column, reorder_columns,
    set_i64_column, set_string_column,
};
use oct_model::{Codebook, Entity, PipelineConfig};
use oct_spatial::BoundaryIndex;
use oct_transform::{EntityFrame, TransformContext, attach_aggregates, title_case};
use polars::prelude::{Column, DataFrame};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::roads::aggregate_roads;
use crate::run::RunContext;

pub const COMBINED_VARIABLE: &str = "combined_ind";
pub const COMBINED_NUM: &str = "combined_ind_num";
pub const CRASH_FIRST: &str = "crash_first";
pub const PARTY_FIRST: &str = "party_first";
pub const VICTIM_FIRST: &str = "victim_first";

/// Tables handed to the merger. Reference tables are optional; a missing
/// one simply contributes no columns.
#[derive(Debug)]
pub struct MergeInputs<'a> {
    pub crashes: EntityFrame,
    pub parties: EntityFrame,
    pub victims: EntityFrame,
    pub cities: Option<&'a DataFrame>,
    pub roads: Option<&'a DataFrame>,
    pub boundaries: Option<&'a BoundaryIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Crashes whose missing city was taken from a containing boundary.
    pub boundary_filled: u64,
    /// Crashes whose city has no row in the cities table.
    pub unmatched_cities: u64,
    pub detail_rows: usize,
}

#[derive(Debug, Clone)]
pub struct MergedTables {
    pub crashes: EntityFrame,
    pub parties: EntityFrame,
    pub victims: EntityFrame,
    /// One row per crash with city and road attributes.
    pub collisions: EntityFrame,
    /// One row per crash/party/victim combination.
    pub detail: EntityFrame,
    pub report: MergeReport,
}

// ============================================================================
// Integrity
// ============================================================================

fn required(frame: &EntityFrame, column: &str) -> Result<()> {
    if has_column(&frame.data, column) {
        Ok(())
    } else {
        Err(CoreError::missing_column(frame.entity.as_str(), column))
    }
}

fn integrity(entity: Entity, detail: String) -> CoreError {
    CoreError::Integrity { entity, detail }
}

/// Row position of every id in `values`. Duplicates and nulls are faults.
fn index_ids(entity: Entity, column: &str, values: &[Option<i64>]) -> Result<HashMap<i64, usize>> {
    let mut index = HashMap::with_capacity(values.len());
    for (row, value) in values.iter().enumerate() {
        let Some(id) = value else {
            return Err(integrity(entity, format!("row {row} has no {column}")));
        };
        if index.insert(*id, row).is_some() {
            return Err(integrity(entity, format!("{column} {id} is not unique")));
        }
    }
    Ok(index)
}

/// Checks that every party and victim resolves to exactly one crash, and
/// every victim to a party of the same crash.
pub fn check_integrity(crashes: &EntityFrame, parties: &EntityFrame, victims: &EntityFrame) -> Result<()> {
    required(crashes, "cid")?;
    for column in ["cid", "pid"] {
        required(parties, column)?;
    }
    for column in ["cid", "pid", "vid"] {
        required(victims, column)?;
    }
    let crash_ids = index_ids(Entity::Crashes, "cid", &i64_column(&crashes.data, "cid")?)?;
    let party_ids = i64_column(&parties.data, "pid")?;
    index_ids(Entity::Parties, "pid", &party_ids)?;
    index_ids(Entity::Victims, "vid", &i64_column(&victims.data, "vid")?)?;

    let mut party_crash: HashMap<i64, i64> = HashMap::with_capacity(party_ids.len());
    for (row, (cid, pid)) in i64_column(&parties.data, "cid")?
        .into_iter()
        .zip(party_ids)
        .enumerate()
    {
        let cid = cid.filter(|c| crash_ids.contains_key(c)).ok_or_else(|| {
            integrity(Entity::Parties, format!("row {row} does not resolve to a crash"))
        })?;
        if let Some(pid) = pid {
            party_crash.insert(pid, cid);
        }
    }

    let victim_cids = i64_column(&victims.data, "cid")?;
    let victim_pids = i64_column(&victims.data, "pid")?;
    for row in 0..victims.record_count() {
        let cid = victim_cids[row].filter(|c| crash_ids.contains_key(c)).ok_or_else(|| {
            integrity(Entity::Victims, format!("row {row} does not resolve to a crash"))
        })?;
        let owner = victim_pids[row].and_then(|p| party_crash.get(&p).copied());
        if owner != Some(cid) {
            return Err(integrity(
                Entity::Victims,
                format!("row {row} does not resolve to a party of crash {cid}"),
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Boundaries and reference joins
// ============================================================================

/// Fills null cities from the smallest boundary containing the crash point.
pub fn fill_cities_from_boundaries(
    crashes: &mut EntityFrame,
    index: &BoundaryIndex,
    config: &PipelineConfig,
) -> Result<u64> {
    let city_column = config.merge.city_column.as_str();
    let spatial = &config.spatial;
    if !has_column(&crashes.data, &spatial.x_column) || !has_column(&crashes.data, &spatial.y_column) {
        debug!("no coordinate columns, boundary fill skipped");
        return Ok(0);
    }
    let mut cities = if has_column(&crashes.data, city_column) {
        opt_string_column(&crashes.data, city_column)?
    } else {
        vec![None; crashes.record_count()]
    };
    let xs = f64_column(&crashes.data, &spatial.x_column)?;
    let ys = f64_column(&crashes.data, &spatial.y_column)?;

    let mut filled = 0u64;
    for row in 0..cities.len() {
        if cities[row].is_some() {
            continue;
        }
        let (Some(x), Some(y)) = (xs[row], ys[row]) else {
            continue;
        };
        if let Some(name) = index.lookup(x, y) {
            cities[row] = Some(title_case(name));
            filled += 1;
        }
    }
    set_string_column(&mut crashes.data, city_column, cities)?;
    if filled > 0 {
        info!(filled, "cities filled from boundaries");
    }
    Ok(filled)
}

/// Left-joins `reference` onto `left` by city, many-to-one.
///
/// Reference city names are title-cased before matching. Columns that
/// `left` already has are not copied. Returns how many left rows had a
/// city without a reference row.
fn join_by_city(left: &mut DataFrame, reference: &DataFrame, city_column: &str, table: &str) -> Result<u64> {
    if !has_column(reference, city_column) {
        return Err(CoreError::missing_column(table, city_column));
    }
    let mut index: HashMap<String, usize> = HashMap::with_capacity(reference.height());
    for (row, city) in opt_string_column(reference, city_column)?.into_iter().enumerate() {
        let Some(city) = city else { continue };
        let city = title_case(&city);
        if index.insert(city.clone(), row).is_some() {
            return Err(CoreError::DuplicateCity { city });
        }
    }

    let left_cities = if has_column(left, city_column) {
        opt_string_column(left, city_column)?
    } else {
        vec![None; left.height()]
    };
    let mut unmatched = 0u64;
    let rows: Vec<Option<usize>> = left_cities
        .iter()
        .map(|city| {
            let found = city.as_ref().and_then(|c| index.get(c).copied());
            if city.is_some() && found.is_none() {
                unmatched += 1;
            }
            found
        })
        .collect();

    let existing: Vec<String> = left.get_column_names().iter().map(|n| n.to_string()).collect();
    let mut skip: Vec<&str> = existing.iter().map(String::as_str).collect();
    skip.push(city_column);
    let columns = gather_frame(reference, &rows, &skip)?;
    debug!(table, columns = columns.len(), unmatched, "joined by city");
    hstack(left, columns)?;
    Ok(unmatched)
}

fn hstack(df: &mut DataFrame, columns: Vec<Column>) -> Result<()> {
    for column in columns {
        df.with_column(column)?;
    }
    Ok(())
}

// ============================================================================
// Back-propagation and detail expansion
// ============================================================================

/// Copies the configured crash columns onto `child` rows by `cid`,
/// replacing any column of the same name.
fn propagate(child: &mut EntityFrame, crashes: &DataFrame, crash_rows: &HashMap<i64, usize>, columns: &[String]) -> Result<()> {
    let rows: Vec<Option<usize>> = i64_column(&child.data, "cid")?
        .into_iter()
        .map(|cid| cid.and_then(|c| crash_rows.get(&c).copied()))
        .collect();
    let picked: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| *c != "cid" && has_column(crashes, c))
        .collect();
    let skip: Vec<&str> = crashes
        .get_column_names()
        .iter()
        .map(|n| n.as_str())
        .filter(|n| !picked.contains(n))
        .collect();
    let gathered = gather_frame(crashes, &rows, &skip)?;
    debug!(entity = %child.entity, columns = gathered.len(), "propagated crash columns");
    hstack(&mut child.data, gathered)
}

/// Row positions of the crash/party/victim expansion in `(cid, pid, vid)`
/// order. A crash without parties, or a party without victims, still
/// yields one row with the missing side empty.
fn expansion_rows(
    crashes: &DataFrame,
    parties: &DataFrame,
    victims: &DataFrame,
) -> Result<Vec<(usize, Option<usize>, Option<usize>)>> {
    let crash_ids = i64_column(crashes, "cid")?;
    let party_cids = i64_column(parties, "cid")?;
    let party_ids = i64_column(parties, "pid")?;
    let victim_pids = i64_column(victims, "pid")?;
    let victim_ids = i64_column(victims, "vid")?;

    let mut parties_of: BTreeMap<i64, Vec<(i64, usize)>> = BTreeMap::new();
    for row in 0..parties.height() {
        if let (Some(cid), Some(pid)) = (party_cids[row], party_ids[row]) {
            parties_of.entry(cid).or_default().push((pid, row));
        }
    }
    let mut victims_of: BTreeMap<i64, Vec<(i64, usize)>> = BTreeMap::new();
    for row in 0..victims.height() {
        if let (Some(pid), Some(vid)) = (victim_pids[row], victim_ids[row]) {
            victims_of.entry(pid).or_default().push((vid, row));
        }
    }
    for list in parties_of.values_mut().chain(victims_of.values_mut()) {
        list.sort_unstable();
    }

    let mut crash_order: Vec<(i64, usize)> = crash_ids
        .iter()
        .enumerate()
        .filter_map(|(row, cid)| cid.map(|c| (c, row)))
        .collect();
    crash_order.sort_unstable();

    let mut rows = Vec::with_capacity(victims.height().max(crashes.height()));
    for (cid, crash_row) in crash_order {
        let Some(party_list) = parties_of.get(&cid) else {
            rows.push((crash_row, None, None));
            continue;
        };
        for &(pid, party_row) in party_list {
            match victims_of.get(&pid) {
                Some(victim_list) => {
                    for &(_, victim_row) in victim_list {
                        rows.push((crash_row, Some(party_row), Some(victim_row)));
                    }
                }
                None => rows.push((crash_row, Some(party_row), None)),
            }
        }
    }
    Ok(rows)
}

/// 1 on the first row of each distinct id, 0 on repeats and empty sides.
fn first_flags(ids: impl Iterator<Item = Option<i64>>) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.map(|id| id.map_or(0, |v| i64::from(seen.insert(v))))
        .collect()
}

fn build_detail(
    collisions: &DataFrame,
    parties: &DataFrame,
    victims: &DataFrame,
    ctx: &TransformContext<'_>,
) -> Result<DataFrame> {
    let table = ctx.require_table(COMBINED_VARIABLE)?;
    let rows = expansion_rows(collisions, parties, victims)?;
    let crash_rows: Vec<Option<usize>> = rows.iter().map(|r| Some(r.0)).collect();
    let party_rows: Vec<Option<usize>> = rows.iter().map(|r| r.1).collect();
    let victim_rows: Vec<Option<usize>> = rows.iter().map(|r| r.2).collect();

    let mut columns = gather_frame(collisions, &crash_rows, &[])?;
    let mut present: Vec<String> = collisions
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    for (source, picks) in [(parties, &party_rows), (victims, &victim_rows)] {
        let skip: Vec<&str> = present.iter().map(String::as_str).collect();
        let gathered = gather_frame(source, picks, &skip)?;
        present.extend(gathered.iter().map(|c| c.name().to_string()));
        columns.extend(gathered);
    }
    let mut detail = DataFrame::new(columns)?;

    let cids = i64_column(&detail, "cid")?;
    let pids = i64_column(&detail, "pid")?;
    let vids = i64_column(&detail, "vid")?;
    let crash_first = first_flags(cids.into_iter());
    let party_first = first_flags(pids.into_iter());
    let victim_first = first_flags(vids.into_iter());

    let mut codes = Vec::with_capacity(rows.len());
    let mut labels = Vec::with_capacity(rows.len());
    for row in 0..rows.len() {
        let raw = crash_first[row] * 100 + party_first[row] * 10 + victim_first[row];
        let code = table.code_for(&raw.to_string());
        codes.push(code);
        labels.push(code.and_then(|c| table.label_for(c)).map(str::to_string));
    }
    set_i64_column(&mut detail, CRASH_FIRST, crash_first.into_iter().map(Some).collect())?;
    set_i64_column(&mut detail, PARTY_FIRST, party_first.into_iter().map(Some).collect())?;
    set_i64_column(&mut detail, VICTIM_FIRST, victim_first.into_iter().map(Some).collect())?;
    set_string_column(&mut detail, COMBINED_VARIABLE, labels)?;
    set_i64_column(&mut detail, COMBINED_NUM, codes)?;
    Ok(detail)
}

// ============================================================================
// Tags and ordering
// ============================================================================

fn attach_tags(df: &mut DataFrame, entities: &[Entity], run: &RunContext) -> Result<()> {
    let height = df.height();
    for entity in entities {
        let tag = run.tag(*entity);
        set_string_column(df, entity.tag_column(), vec![Some(tag); height])?;
    }
    Ok(())
}

fn finish(mut frame: EntityFrame, order: Entity, tags: &[Entity], codebook: &Codebook, run: &RunContext) -> Result<EntityFrame> {
    attach_tags(&mut frame.data, tags, run)?;
    frame.data = reorder_columns(&frame.data, &codebook.column_order(order))?;
    Ok(frame)
}

// ============================================================================
// Merge
// ============================================================================

/// Runs the merge over fully derived crash, party and victim tables.
pub fn merge_entities(input: MergeInputs<'_>, ctx: &TransformContext<'_>, run: &RunContext) -> Result<MergedTables> {
    let MergeInputs {
        mut crashes,
        mut parties,
        mut victims,
        cities,
        roads,
        boundaries,
    } = input;
    let config = ctx.config;
    let city_column = config.merge.city_column.as_str();
    let mut report = MergeReport::default();

    check_integrity(&crashes, &parties, &victims)?;
    if let Some(index) = boundaries {
        report.boundary_filled = fill_cities_from_boundaries(&mut crashes, index, config)?;
    }
    attach_aggregates(&mut crashes.data, &parties.data, &victims.data)?;

    let mut collisions = crashes.data.clone();
    if let Some(cities) = cities {
        report.unmatched_cities = join_by_city(&mut collisions, cities, city_column, "cities")?;
        if report.unmatched_cities > 0 {
            warn!(
                unmatched = report.unmatched_cities,
                "crash cities missing from the cities table"
            );
        }
    }
    if let Some(roads) = roads {
        let aggregate = aggregate_roads(roads, city_column)?;
        join_by_city(&mut collisions, &aggregate, city_column, "roads")?;
    }

    let crash_rows: HashMap<i64, usize> = i64_column(&crashes.data, "cid")?
        .into_iter()
        .enumerate()
        .filter_map(|(row, cid)| cid.map(|c| (c, row)))
        .collect();
    propagate(&mut parties, &crashes.data, &crash_rows, &config.merge.propagate)?;
    propagate(&mut victims, &crashes.data, &crash_rows, &config.merge.propagate)?;

    let detail = build_detail(&collisions, &parties.data, &victims.data, ctx)?;
    report.detail_rows = detail.height();

    let codebook = ctx.codebook;
    let crash_tags = [Entity::Crashes];
    let party_tags = [Entity::Crashes, Entity::Parties];
    let all_tags = [Entity::Crashes, Entity::Parties, Entity::Victims];
    let merged = MergedTables {
        crashes: finish(crashes, Entity::Crashes, &crash_tags, codebook, run)?,
        parties: finish(parties, Entity::Parties, &party_tags, codebook, run)?,
        victims: finish(victims, Entity::Victims, &all_tags, codebook, run)?,
        collisions: finish(
            EntityFrame::new(Entity::Collisions, collisions),
            Entity::Collisions,
            &crash_tags,
            codebook,
            run,
        )?,
        detail: finish(
            EntityFrame::new(Entity::Collisions, detail),
            Entity::Collisions,
            &all_tags,
            codebook,
            run,
        )?,
        report,
    };
    info!(
        collisions = merged.collisions.record_count(),
        detail = merged.report.detail_rows,
        boundary_filled = merged.report.boundary_filled,
        "entities merged"
    );
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_flags_mark_new_ids_only() {
        let flags = first_flags([Some(1), Some(1), None, Some(2), None].into_iter());
        assert_eq!(flags, vec![1, 0, 0, 1, 0]);
    }
}
