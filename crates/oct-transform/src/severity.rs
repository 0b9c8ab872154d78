//! Collision severity recodes and per-crash casualty aggregates.
//!
//! Victims and parties first receive 0/1 indicator columns derived from
//! their raw injury, role and vehicle-type codes. Crash aggregates are then
//! sums of those indicators grouped by `cid`, so they can be recomputed at
//! any later point from the child tables alone.

use std::collections::{BTreeMap, HashMap, HashSet};

use oct_common::{i64_column, opt_string_column, set_i64_column, set_string_column};
use oct_model::{Entity, SeverityConfig};
use polars::prelude::DataFrame;
use tracing::{debug, info, warn};

use crate::context::TransformContext;
use crate::error::{Result, TransformError};
use crate::frame::EntityFrame;

pub const SEVERITY_VARIABLE: &str = "coll_severity";

pub const VICTIM_KILLED: &str = "victim_killed_ind";
pub const VICTIM_SEVERE: &str = "victim_severe_ind";
pub const VICTIM_VISIBLE: &str = "victim_visible_ind";
pub const VICTIM_PAIN: &str = "victim_pain_ind";
pub const VICTIM_PED: &str = "victim_ped_ind";
pub const VICTIM_BIC: &str = "victim_bic_ind";
pub const VICTIM_MC: &str = "victim_mc_ind";
pub const PARTY_MC: &str = "party_mc_ind";

/// Aggregate columns written onto the crash table, in output order.
pub const AGGREGATE_COLUMNS: [&str; 19] = [
    "party_count",
    "victim_count",
    "number_killed",
    "number_inj",
    "count_severe_inj",
    "count_visible_inj",
    "count_complaint_pain",
    "count_fatal_severe",
    "count_minor_pain",
    "count_ped_killed",
    "count_ped_inj",
    "count_bic_killed",
    "count_bic_inj",
    "count_mc_killed",
    "count_mc_inj",
    "count_car_killed",
    "count_car_inj",
    "count_veh_fatal",
    "count_veh_inj",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeverityReport {
    /// Crashes whose severity code is not in the codebook, per source year.
    pub unknown_by_year: BTreeMap<i32, u64>,
}

/// Severity rank from killed and severely injured counts.
///
/// Each count is bucketed as none, one or more than one; the rank is
/// `3 * killed_bucket + severe_bucket`, giving 0 through 8.
pub fn severity_rank(killed: i64, severe: i64) -> i64 {
    killed.clamp(0, 2) * 3 + severe.clamp(0, 2)
}

fn require(frame: &EntityFrame, column: &str) -> Result<()> {
    if frame.data.column(column).is_err() {
        return Err(TransformError::MissingColumn {
            entity: frame.entity,
            column: column.to_string(),
        });
    }
    Ok(())
}

fn flags(values: &[Option<String>], codes: &[String]) -> Vec<Option<i64>> {
    values
        .iter()
        .map(|v| {
            let hit = v.as_deref().is_some_and(|v| codes.iter().any(|c| c == v));
            Some(i64::from(hit))
        })
        .collect()
}

/// Adds the injury, role and motorcycle indicator columns to parties and victims.
pub fn classify_children(
    parties: &mut EntityFrame,
    victims: &mut EntityFrame,
    config: &SeverityConfig,
) -> Result<()> {
    require(parties, &config.vehicle_type_column)?;
    require(victims, &config.injury_column)?;
    require(victims, &config.role_column)?;
    require(victims, "pid")?;

    let vehicle = opt_string_column(&parties.data, &config.vehicle_type_column)?;
    let party_mc = flags(&vehicle, &config.motorcycle_types);
    let party_ids = i64_column(&parties.data, "pid")?;
    let mc_by_pid: HashMap<i64, bool> = party_ids
        .iter()
        .zip(&party_mc)
        .filter_map(|(pid, mc)| pid.map(|p| (p, *mc == Some(1))))
        .collect();

    let injury = opt_string_column(&victims.data, &config.injury_column)?;
    let role = opt_string_column(&victims.data, &config.role_column)?;
    let ped = flags(&role, &config.pedestrian_roles);
    let bic = flags(&role, &config.bicyclist_roles);
    let victim_mc: Vec<Option<i64>> = i64_column(&victims.data, "pid")?
        .iter()
        .zip(ped.iter().zip(&bic))
        .map(|(pid, (p, b))| {
            let on_motorcycle = pid.and_then(|p| mc_by_pid.get(&p).copied()).unwrap_or(false);
            let unprotected = *p == Some(1) || *b == Some(1);
            Some(i64::from(on_motorcycle && !unprotected))
        })
        .collect();

    set_i64_column(&mut parties.data, PARTY_MC, party_mc)?;
    let codes = &config.injury;
    set_i64_column(&mut victims.data, VICTIM_KILLED, flags(&injury, &codes.killed))?;
    set_i64_column(&mut victims.data, VICTIM_SEVERE, flags(&injury, &codes.severe))?;
    set_i64_column(&mut victims.data, VICTIM_VISIBLE, flags(&injury, &codes.visible))?;
    set_i64_column(&mut victims.data, VICTIM_PAIN, flags(&injury, &codes.complaint_pain))?;
    set_i64_column(&mut victims.data, VICTIM_PED, ped)?;
    set_i64_column(&mut victims.data, VICTIM_BIC, bic)?;
    set_i64_column(&mut victims.data, VICTIM_MC, victim_mc)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    parties: i64,
    victims: i64,
    killed: i64,
    severe: i64,
    visible: i64,
    pain: i64,
    ped_killed: i64,
    ped_inj: i64,
    bic_killed: i64,
    bic_inj: i64,
    mc_killed: i64,
    mc_inj: i64,
    veh_fatal: i64,
    veh_inj: i64,
}

impl Tally {
    fn injured(&self) -> i64 {
        self.severe + self.visible + self.pain
    }

    fn values(&self) -> [i64; 19] {
        let injured = self.injured();
        [
            self.parties,
            self.victims,
            self.killed,
            injured,
            self.severe,
            self.visible,
            self.pain,
            self.killed + self.severe,
            self.visible + self.pain,
            self.ped_killed,
            self.ped_inj,
            self.bic_killed,
            self.bic_inj,
            self.mc_killed,
            self.mc_inj,
            self.killed - self.ped_killed - self.bic_killed - self.mc_killed,
            injured - self.ped_inj - self.bic_inj - self.mc_inj,
            self.veh_fatal,
            self.veh_inj,
        ]
    }
}

fn indicator(df: &DataFrame, name: &str) -> Result<Vec<bool>> {
    Ok(i64_column(df, name)?
        .into_iter()
        .map(|v| v == Some(1))
        .collect())
}

/// Recomputes every aggregate column on `crashes` from the child tables.
///
/// Existing columns of the same name are replaced. A child row whose `cid`
/// has no crash is an integrity fault.
pub fn attach_aggregates(crashes: &mut DataFrame, parties: &DataFrame, victims: &DataFrame) -> Result<()> {
    let cids = i64_column(crashes, "cid")?;
    let row_of: HashMap<i64, usize> = cids
        .iter()
        .enumerate()
        .filter_map(|(row, cid)| cid.map(|c| (c, row)))
        .collect();
    let mut tallies = vec![Tally::default(); crashes.height()];

    let locate = |entity: Entity, row: usize, cid: Option<i64>| -> Result<usize> {
        cid.and_then(|c| row_of.get(&c).copied())
            .ok_or_else(|| TransformError::UnresolvedCaseId {
                entity,
                case_id: cid.map(|c| c.to_string()).unwrap_or_default(),
                row,
            })
    };

    for (row, cid) in i64_column(parties, "cid")?.into_iter().enumerate() {
        tallies[locate(Entity::Parties, row, cid)?].parties += 1;
    }

    let victim_cids = i64_column(victims, "cid")?;
    let victim_pids = i64_column(victims, "pid")?;
    let killed = indicator(victims, VICTIM_KILLED)?;
    let severe = indicator(victims, VICTIM_SEVERE)?;
    let visible = indicator(victims, VICTIM_VISIBLE)?;
    let pain = indicator(victims, VICTIM_PAIN)?;
    let ped = indicator(victims, VICTIM_PED)?;
    let bic = indicator(victims, VICTIM_BIC)?;
    let mc = indicator(victims, VICTIM_MC)?;
    let mut fatal_vehicles: HashSet<(usize, i64)> = HashSet::new();
    let mut injury_vehicles: HashSet<(usize, i64)> = HashSet::new();

    for (row, cid) in victim_cids.into_iter().enumerate() {
        let crash = locate(Entity::Victims, row, cid)?;
        let tally = &mut tallies[crash];
        let injured = severe[row] || visible[row] || pain[row];
        tally.victims += 1;
        tally.killed += i64::from(killed[row]);
        tally.severe += i64::from(severe[row]);
        tally.visible += i64::from(visible[row]);
        tally.pain += i64::from(pain[row]);
        tally.ped_killed += i64::from(ped[row] && killed[row]);
        tally.ped_inj += i64::from(ped[row] && injured);
        tally.bic_killed += i64::from(bic[row] && killed[row]);
        tally.bic_inj += i64::from(bic[row] && injured);
        tally.mc_killed += i64::from(mc[row] && killed[row]);
        tally.mc_inj += i64::from(mc[row] && injured);
        if let Some(pid) = victim_pids[row] {
            if killed[row] && fatal_vehicles.insert((crash, pid)) {
                tally.veh_fatal += 1;
            }
            if injured && injury_vehicles.insert((crash, pid)) {
                tally.veh_inj += 1;
            }
        }
    }

    let mut columns: Vec<Vec<Option<i64>>> = vec![Vec::with_capacity(tallies.len()); AGGREGATE_COLUMNS.len()];
    for tally in &tallies {
        for (column, value) in columns.iter_mut().zip(tally.values()) {
            column.push(Some(value));
        }
    }
    for (name, values) in AGGREGATE_COLUMNS.iter().zip(columns) {
        set_i64_column(crashes, name, values)?;
    }
    Ok(())
}

/// Classifies child rows, recomputes the crash aggregates and derives the
/// collision severity columns.
pub fn derive_severity(
    crashes: &mut EntityFrame,
    parties: &mut EntityFrame,
    victims: &mut EntityFrame,
    ctx: &TransformContext<'_>,
) -> Result<SeverityReport> {
    let config = &ctx.config.severity;
    let table = ctx.require_table(SEVERITY_VARIABLE)?;
    require(crashes, SEVERITY_VARIABLE)?;

    classify_children(parties, victims, config)?;
    attach_aggregates(&mut crashes.data, &parties.data, &victims.data)?;

    let raw = opt_string_column(&crashes.data, SEVERITY_VARIABLE)?;
    let killed = i64_column(&crashes.data, "number_killed")?;
    let severe = i64_column(&crashes.data, "count_severe_inj")?;
    let years = crashes.years()?;
    let max_code = table.max_code().unwrap_or_default();
    let unknown_label = &ctx.config.recode.unknown_label;

    let n = raw.len();
    let mut label = Vec::with_capacity(n);
    let mut num = Vec::with_capacity(n);
    let mut hs = Vec::with_capacity(n);
    let mut bin = Vec::with_capacity(n);
    let mut rank = Vec::with_capacity(n);
    let mut ind_severe = Vec::with_capacity(n);
    let mut ind_fatal = Vec::with_capacity(n);
    let mut ind_multi = Vec::with_capacity(n);
    let mut report = SeverityReport::default();

    for row in 0..n {
        let code = raw[row].as_deref().and_then(|r| table.code_for(r));
        match (&raw[row], code) {
            (Some(_), None) => {
                if let Some(year) = years[row] {
                    *report.unknown_by_year.entry(year).or_insert(0) += 1;
                }
                label.push(Some(unknown_label.clone()));
            }
            (_, Some(c)) => label.push(table.label_for(c).map(str::to_string)),
            (None, None) => label.push(None),
        }
        num.push(code);
        hs.push(code.map(|c| max_code + 1 - c));
        let is_severe = code == Some(config.severe_level);
        let is_fatal = code == Some(config.fatal_level);
        bin.push(code.map(|_| i64::from(is_severe || is_fatal)));
        let r = severity_rank(killed[row].unwrap_or(0), severe[row].unwrap_or(0));
        rank.push(Some(r));
        ind_severe.push(Some(i64::from(is_severe)));
        ind_fatal.push(Some(i64::from(is_fatal)));
        ind_multi.push(Some(i64::from(config.multi_ranks.contains(&r))));
    }

    let df = &mut crashes.data;
    set_string_column(df, SEVERITY_VARIABLE, label)?;
    set_i64_column(df, "coll_severity_num", num)?;
    set_i64_column(df, "coll_severity_hs", hs)?;
    set_i64_column(df, "coll_severity_bin", bin)?;
    set_i64_column(df, "coll_severity_rank", rank)?;
    set_i64_column(df, "ind_severe", ind_severe)?;
    set_i64_column(df, "ind_fatal", ind_fatal)?;
    set_i64_column(df, "ind_multi", ind_multi)?;

    let unknown: u64 = report.unknown_by_year.values().sum();
    if unknown > 0 {
        warn!(unknown, "collision severity codes missing from the codebook");
    }
    debug!(max_code, "severity half-scale uses codebook maximum");
    info!(crashes = n, "derived severity and casualty counts");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_buckets_killed_and_severe() {
        assert_eq!(severity_rank(0, 0), 0);
        assert_eq!(severity_rank(0, 1), 1);
        assert_eq!(severity_rank(0, 5), 2);
        assert_eq!(severity_rank(1, 0), 3);
        assert_eq!(severity_rank(1, 1), 4);
        assert_eq!(severity_rank(1, 3), 5);
        assert_eq!(severity_rank(2, 0), 6);
        assert_eq!(severity_rank(4, 1), 7);
        assert_eq!(severity_rank(3, 3), 8);
    }

    #[test]
    fn car_counts_exclude_vulnerable_users() {
        let tally = Tally {
            victims: 4,
            killed: 2,
            ped_killed: 1,
            severe: 1,
            pain: 1,
            bic_inj: 1,
            ..Tally::default()
        };
        let values = tally.values();
        assert_eq!(values[3], 2); // number_inj
        assert_eq!(values[7], 3); // count_fatal_severe
        assert_eq!(values[15], 1); // count_car_killed
        assert_eq!(values[16], 1); // count_car_inj
    }
}
