//! Schema normalization: codebook renames, drops, whitespace trimming and
//! surrogate identifiers.
//!
//! `cid`, `pid` and `vid` are assigned here and nowhere else. Parties and
//! victims are attached to their crash by indexed `case_id` lookup; a child
//! row that does not resolve aborts the run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use oct_common::{
    i64_column, opt_string_column, parse_i64, set_i64_column, set_string_column,
};
use oct_model::{Codebook, Entity, EntityCounts, KeysConfig};
use polars::prelude::{DataFrame, DataType};
use tracing::{debug, info};

use crate::context::TransformContext;
use crate::error::{Result, TransformError};
use crate::frame::{EntityFrame, YEAR_COLUMN};

pub const CASE_ID: &str = "case_id";
pub const PARTY_NUMBER: &str = "party_number";

/// Unified raw tables as produced by the raw merge.
#[derive(Debug, Clone)]
pub struct RawInput {
    pub crashes: DataFrame,
    pub parties: DataFrame,
    pub victims: DataFrame,
}

#[derive(Debug, Clone)]
pub struct NormalizedTables {
    pub crashes: EntityFrame,
    pub parties: EntityFrame,
    pub victims: EntityFrame,
    /// Rows per entity per source year after normalization.
    pub counts: BTreeMap<i32, EntityCounts>,
}

/// Normalizes all three raw tables.
///
/// Every table is validated against the codebook before any is changed.
pub fn normalize(input: RawInput, ctx: &TransformContext<'_>) -> Result<NormalizedTables> {
    let RawInput {
        crashes,
        parties,
        victims,
    } = input;
    for (entity, df) in [
        (Entity::Crashes, &crashes),
        (Entity::Parties, &parties),
        (Entity::Victims, &victims),
    ] {
        validate_columns(entity, df, ctx.codebook)?;
    }

    let city_column = ctx.config.merge.city_column.as_str();
    let mut crashes = normalize_entity(Entity::Crashes, crashes, ctx.codebook, &ctx.config.keys, city_column)?;
    let mut parties = normalize_entity(Entity::Parties, parties, ctx.codebook, &ctx.config.keys, city_column)?;
    let mut victims = normalize_entity(Entity::Victims, victims, ctx.codebook, &ctx.config.keys, city_column)?;

    assign_ids(&mut crashes, &mut parties, &mut victims)?;

    let mut counts: BTreeMap<i32, EntityCounts> = BTreeMap::new();
    for frame in [&crashes, &parties, &victims] {
        for (year, n) in frame.year_counts()? {
            let entry = counts.entry(year).or_default();
            match frame.entity {
                Entity::Crashes => entry.crashes = n,
                Entity::Parties => entry.parties = n,
                Entity::Victims => entry.victims = n,
                Entity::Collisions => {}
            }
        }
    }
    info!(
        crashes = crashes.record_count(),
        parties = parties.record_count(),
        victims = victims.record_count(),
        "normalized tables"
    );
    Ok(NormalizedTables {
        crashes,
        parties,
        victims,
        counts,
    })
}

/// Every raw column must be selected, dropped or passed through, and every
/// selected raw column must exist.
pub fn validate_columns(entity: Entity, df: &DataFrame, codebook: &Codebook) -> Result<()> {
    let selected = codebook.selected(entity);
    let mut allowed: BTreeSet<&str> = selected.iter().map(|(raw, _)| *raw).collect();
    allowed.extend(codebook.drop_list(entity).iter().map(String::as_str));
    allowed.extend(codebook.passthrough(entity).iter().map(String::as_str));
    allowed.insert(YEAR_COLUMN);

    for name in df.get_column_names() {
        if !allowed.contains(name.as_str()) {
            return Err(TransformError::UnknownRawColumn {
                entity,
                column: name.to_string(),
            });
        }
    }
    for (raw, _) in &selected {
        if df.column(raw).is_err() {
            return Err(TransformError::MissingRawColumn {
                entity,
                column: (*raw).to_string(),
            });
        }
    }
    Ok(())
}

fn normalize_entity(
    entity: Entity,
    mut df: DataFrame,
    codebook: &Codebook,
    keys: &KeysConfig,
    city_column: &str,
) -> Result<EntityFrame> {
    let selected = codebook.selected(entity);
    let case_raw = selected
        .iter()
        .find(|(_, new)| *new == CASE_ID)
        .map(|(raw, _)| *raw)
        .ok_or_else(|| TransformError::MissingVariable {
            variable: CASE_ID.to_string(),
        })?;
    apply_key_rules(&mut df, case_raw, keys)?;

    for (raw, new) in &selected {
        if raw != new {
            df.rename(raw, (*new).into())?;
        }
    }
    for name in codebook.drop_list(entity) {
        if df.column(name).is_ok() {
            let _ = df.drop_in_place(name)?;
        }
    }
    trim_strings(&mut df)?;
    if df.column(city_column).is_ok() {
        let cities: Vec<Option<String>> = opt_string_column(&df, city_column)?
            .into_iter()
            .map(|c| c.map(|v| title_case(&v)))
            .collect();
        set_string_column(&mut df, city_column, cities)?;
    }
    debug!(entity = %entity, rows = df.height(), columns = df.width(), "renamed and trimmed");
    Ok(EntityFrame::new(entity, df))
}

/// Prefixes `case_id` for years that reuse another year's identifiers.
fn apply_key_rules(df: &mut DataFrame, case_column: &str, keys: &KeysConfig) -> Result<()> {
    if keys.rules.is_empty() || df.column(YEAR_COLUMN).is_err() {
        return Ok(());
    }
    let years = i64_column(df, YEAR_COLUMN)?;
    let ids = opt_string_column(df, case_column)?;
    let mut rewritten = 0usize;
    let updated: Vec<Option<String>> = ids
        .into_iter()
        .zip(years)
        .map(|(id, year)| {
            let prefix = year
                .and_then(|y| i32::try_from(y).ok())
                .and_then(|y| keys.prefix_for(y));
            match (id, prefix) {
                (Some(id), Some(prefix)) => {
                    rewritten += 1;
                    Some(format!("{prefix}{id}"))
                }
                (id, _) => id,
            }
        })
        .collect();
    set_string_column(df, case_column, updated)?;
    debug!(column = case_column, rewritten, "applied case_id key rules");
    Ok(())
}

/// Trims every string column; blank cells become null.
fn trim_strings(df: &mut DataFrame) -> Result<()> {
    let names: Vec<String> = df
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::String)
        .map(|c| c.name().to_string())
        .collect();
    for name in names {
        let values = opt_string_column(df, &name)?;
        set_string_column(df, &name, values)?;
    }
    Ok(())
}

/// Capitalizes the first letter of every word and lowercases the rest.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_alpha = false;
    for ch in value.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn party_key(value: &str) -> String {
    parse_i64(value).map_or_else(|| value.to_string(), |n| n.to_string())
}

/// Canonical party number of `row`. A null number cannot identify a party.
fn required_party_key(
    entity: Entity,
    numbers: &[Option<String>],
    cases: &[Option<String>],
    row: usize,
) -> Result<String> {
    match numbers[row].as_deref() {
        Some(value) => Ok(party_key(value)),
        None => Err(TransformError::MissingPartyNumber {
            entity,
            case_id: cases[row].clone().unwrap_or_default(),
            row,
        }),
    }
}

fn required_strings(frame: &EntityFrame, column: &str) -> Result<Vec<Option<String>>> {
    if frame.data.column(column).is_err() {
        return Err(TransformError::MissingColumn {
            entity: frame.entity,
            column: column.to_string(),
        });
    }
    Ok(opt_string_column(&frame.data, column)?)
}

fn dense_ids(n: usize) -> Vec<Option<i64>> {
    (0..n).map(|i| Some(i as i64)).collect()
}

fn occurrence_counts(ids: &[Option<i64>]) -> Vec<Option<i64>> {
    let mut counts: HashMap<i64, i64> = HashMap::new();
    for id in ids.iter().flatten() {
        *counts.entry(*id).or_insert(0) += 1;
    }
    ids.iter()
        .map(|id| id.and_then(|v| counts.get(&v).copied()))
        .collect()
}

/// Assigns `cid`, `pid` and `vid` and the per-table presence counts.
fn assign_ids(
    crashes: &mut EntityFrame,
    parties: &mut EntityFrame,
    victims: &mut EntityFrame,
) -> Result<()> {
    let crash_ids = required_strings(crashes, CASE_ID)?;
    let crash_years = crashes.years()?;
    let mut cid_by_case: HashMap<String, usize> = HashMap::with_capacity(crash_ids.len());
    for (row, id) in crash_ids.iter().enumerate() {
        let Some(id) = id else {
            return Err(TransformError::MissingCaseId {
                entity: Entity::Crashes,
                row,
            });
        };
        if let Some(first) = cid_by_case.insert(id.clone(), row) {
            let mut years: Vec<i64> = [first, row]
                .iter()
                .filter_map(|r| crash_years[*r])
                .map(i64::from)
                .collect();
            years.sort_unstable();
            years.dedup();
            return Err(TransformError::DuplicateCaseId {
                case_id: id.clone(),
                years,
            });
        }
    }
    let cids = dense_ids(crash_ids.len());

    let resolve = |entity: Entity, ids: &[Option<String>]| -> Result<Vec<Option<i64>>> {
        ids.iter()
            .enumerate()
            .map(|(row, id)| {
                let id = id
                    .as_deref()
                    .ok_or(TransformError::MissingCaseId { entity, row })?;
                cid_by_case
                    .get(id)
                    .map(|cid| Some(*cid as i64))
                    .ok_or_else(|| TransformError::UnresolvedCaseId {
                        entity,
                        case_id: id.to_string(),
                        row,
                    })
            })
            .collect()
    };

    let party_case = required_strings(parties, CASE_ID)?;
    let party_numbers = required_strings(parties, PARTY_NUMBER)?;
    let party_cids = resolve(Entity::Parties, &party_case)?;
    let pids = dense_ids(party_case.len());
    let mut pid_by_key: HashMap<(i64, String), i64> = HashMap::with_capacity(pids.len());
    for (row, cid) in party_cids.iter().enumerate() {
        let key = required_party_key(Entity::Parties, &party_numbers, &party_case, row)?;
        if let Some(cid) = cid
            && pid_by_key.insert((*cid, key.clone()), row as i64).is_some()
        {
            return Err(TransformError::DuplicateParty {
                case_id: party_case[row].clone().unwrap_or_default(),
                party_number: key,
            });
        }
    }

    let victim_case = required_strings(victims, CASE_ID)?;
    let victim_numbers = required_strings(victims, PARTY_NUMBER)?;
    let victim_cids = resolve(Entity::Victims, &victim_case)?;
    let mut victim_pids = Vec::with_capacity(victim_cids.len());
    for (row, cid) in victim_cids.iter().enumerate() {
        let key = required_party_key(Entity::Victims, &victim_numbers, &victim_case, row)?;
        let pid = cid.and_then(|c| pid_by_key.get(&(c, key.clone())).copied());
        let Some(pid) = pid else {
            return Err(TransformError::UnresolvedParty {
                case_id: victim_case[row].clone().unwrap_or_default(),
                party_number: key,
                row,
            });
        };
        victim_pids.push(Some(pid));
    }
    let vids = dense_ids(victim_cids.len());

    set_i64_column(&mut crashes.data, "crashes_cid_count", occurrence_counts(&cids))?;
    set_i64_column(&mut crashes.data, "cid", cids)?;

    set_i64_column(&mut parties.data, "parties_cid_count", occurrence_counts(&party_cids))?;
    set_i64_column(&mut parties.data, "parties_pid_count", occurrence_counts(&pids))?;
    set_i64_column(&mut parties.data, "cid", party_cids)?;
    set_i64_column(&mut parties.data, "pid", pids)?;

    set_i64_column(&mut victims.data, "victims_cid_count", occurrence_counts(&victim_cids))?;
    set_i64_column(&mut victims.data, "victims_pid_count", occurrence_counts(&victim_pids))?;
    set_i64_column(&mut victims.data, "victims_vid_count", occurrence_counts(&vids))?;
    set_i64_column(&mut victims.data, "cid", victim_cids)?;
    set_i64_column(&mut victims.data, "pid", victim_pids)?;
    set_i64_column(&mut victims.data, "vid", vids)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_handles_separators() {
        assert_eq!(title_case("SAN JUAN CAPISTRANO"), "San Juan Capistrano");
        assert_eq!(title_case("la habra-heights"), "La Habra-Heights");
    }

    #[test]
    fn party_key_canonicalizes_numbers() {
        assert_eq!(party_key("01"), "1");
        assert_eq!(party_key("2.0"), "2");
        assert_eq!(party_key("A"), "A");
    }

    #[test]
    fn occurrence_counts_share_ids() {
        let ids = vec![Some(0), Some(0), Some(1), None];
        assert_eq!(occurrence_counts(&ids), vec![Some(2), Some(2), Some(1), None]);
    }
}
