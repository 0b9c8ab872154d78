//! Table-driven categorical recoding.
//!
//! Every categorical column is handled by one [`RecodeRule`]: the source
//! column, the column written, and what to do with each value. Rule tables
//! for the three entities are fixed lists of codebook variable names; the
//! code tables themselves come from the codebook.
//!
//! Derived columns that read raw codes (flags, combined weather, binary
//! injury) come before the lookup that replaces those codes with labels.

use std::collections::BTreeMap;

use oct_common::{f64_column, i64_column, opt_string_column, parse_i64, set_i64_column, set_string_column};
use oct_model::{BandSpec, CodeTable, Entity, RecodeConfig};
use tracing::{debug, info, warn};

use crate::context::TransformContext;
use crate::error::Result;
use crate::frame::EntityFrame;

/// Which configured band set a [`RecodeKind::Bands`] rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandSet {
    PartyAge,
    VictimAge,
    VehicleYear,
}

impl BandSet {
    fn spec(self, config: &RecodeConfig) -> &BandSpec {
        match self {
            BandSet::PartyAge => &config.party_age_group,
            BandSet::VictimAge => &config.victim_age_group,
            BandSet::VehicleYear => &config.vehicle_year_group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecodeKind {
    /// Raw code to label through the variable's code table. Codes missing
    /// from the table become the unknown label and are counted.
    Lookup { variable: &'static str },
    /// Raw code to the table's integer category. Missing or unmatched is 0.
    Binary { variable: &'static str },
    /// 1 when the code's label is one of `labels`, else 0.
    LabelFlag {
        variable: &'static str,
        labels: &'static [&'static str],
    },
    /// `first * 10 + second` of two code tables sharing one variable.
    Combine {
        variable: &'static str,
        second: &'static str,
    },
    Bands(BandSet),
    /// Integers at or above the configured age sentinel become null.
    Sentinel,
    /// Applies the configured vehicle-year typo corrections.
    YearFix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecodeRule {
    pub column: &'static str,
    pub target: &'static str,
    pub kind: RecodeKind,
}

const fn lookup(column: &'static str) -> RecodeRule {
    RecodeRule {
        column,
        target: column,
        kind: RecodeKind::Lookup { variable: column },
    }
}

const fn binary(column: &'static str) -> RecodeRule {
    RecodeRule {
        column,
        target: column,
        kind: RecodeKind::Binary { variable: column },
    }
}

const fn label_flag(
    column: &'static str,
    target: &'static str,
    labels: &'static [&'static str],
) -> RecodeRule {
    RecodeRule {
        column,
        target,
        kind: RecodeKind::LabelFlag {
            variable: column,
            labels,
        },
    }
}

const fn in_place(column: &'static str, kind: RecodeKind) -> RecodeRule {
    RecodeRule {
        column,
        target: column,
        kind,
    }
}

const fn derived(column: &'static str, target: &'static str, kind: RecodeKind) -> RecodeRule {
    RecodeRule {
        column,
        target,
        kind,
    }
}

pub fn crash_rules() -> Vec<RecodeRule> {
    vec![
        derived(
            "weather_1",
            "weather_comb",
            RecodeKind::Combine {
                variable: "weather_1",
                second: "weather_2",
            },
        ),
        label_flag("hit_and_run", "hit_and_run_bin", &["Misdemeanor", "Felony"]),
        lookup("primary_coll_factor"),
        lookup("pcf_viol_category"),
        lookup("type_of_coll"),
        binary("ped_accident"),
        binary("bic_accident"),
        binary("mc_accident"),
        binary("truck_accident"),
        lookup("hit_and_run"),
        binary("alcohol_involved"),
        lookup("intersection"),
        lookup("weather_1"),
        lookup("weather_2"),
        lookup("road_surface"),
        lookup("road_cond_1"),
        lookup("road_cond_2"),
        lookup("lighting"),
        lookup("control_device"),
        lookup("state_hwy_ind"),
        lookup("tow_away"),
        lookup("mviw"),
        lookup("ped_action"),
        binary("not_private_property"),
        lookup("stwd_veh_type_at_fault"),
    ]
}

pub fn party_rules() -> Vec<RecodeRule> {
    vec![
        label_flag(
            "party_sobriety",
            "dui_alcohol_ind",
            &["Had Been Drinking, Under Influence"],
        ),
        label_flag("party_drug_physical", "dui_drug_ind", &["Under Drug Influence"]),
        in_place("party_age", RecodeKind::Sentinel),
        derived("party_age", "party_age_group", RecodeKind::Bands(BandSet::PartyAge)),
        in_place("vehicle_year", RecodeKind::YearFix),
        derived(
            "vehicle_year",
            "vehicle_year_group",
            RecodeKind::Bands(BandSet::VehicleYear),
        ),
        lookup("party_type"),
        lookup("at_fault"),
        lookup("party_sex"),
        lookup("party_race"),
        lookup("party_sobriety"),
        lookup("party_drug_physical"),
        lookup("inattention"),
        lookup("dir_of_travel"),
        lookup("move_pre_acc"),
        lookup("party_safety_eq_1"),
        lookup("party_safety_eq_2"),
        lookup("finan_respons"),
        lookup("stwd_vehicle_type"),
        lookup("chp_veh_type_towing"),
    ]
}

pub fn victim_rules() -> Vec<RecodeRule> {
    vec![
        in_place("victim_age", RecodeKind::Sentinel),
        derived("victim_age", "victim_age_group", RecodeKind::Bands(BandSet::VictimAge)),
        derived(
            "victim_degree_of_injury",
            "victim_degree_of_injury_bin",
            RecodeKind::Binary {
                variable: "victim_degree_of_injury_bin",
            },
        ),
        lookup("victim_role"),
        lookup("victim_sex"),
        lookup("victim_degree_of_injury"),
        lookup("victim_seating_position"),
        lookup("victim_safety_eq_1"),
        lookup("victim_safety_eq_2"),
        lookup("victim_ejected"),
    ]
}

pub fn rules_for(entity: Entity) -> Vec<RecodeRule> {
    match entity {
        Entity::Crashes => crash_rules(),
        Entity::Parties => party_rules(),
        Entity::Victims => victim_rules(),
        Entity::Collisions => Vec::new(),
    }
}

/// Unknown-code counts: source year, then `entity.column`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecodeReport {
    pub unknown: BTreeMap<i32, BTreeMap<String, u64>>,
}

impl RecodeReport {
    pub fn total(&self) -> u64 {
        self.unknown.values().flat_map(BTreeMap::values).sum()
    }

    pub fn for_year(&self, year: i32) -> BTreeMap<String, u64> {
        self.unknown.get(&year).cloned().unwrap_or_default()
    }

    /// Adds counts recorded elsewhere, such as unknown severity codes.
    pub fn add(&mut self, year: i32, key: &str, count: u64) {
        if count == 0 {
            return;
        }
        *self
            .unknown
            .entry(year)
            .or_default()
            .entry(key.to_string())
            .or_insert(0) += count;
    }

    pub fn merge(&mut self, other: RecodeReport) {
        for (year, counts) in other.unknown {
            for (key, count) in counts {
                self.add(year, &key, count);
            }
        }
    }
}

/// Category code of a raw value. Tables without a recode map are keyed by
/// the integer code itself.
fn category(table: &CodeTable<'_>, raw: &str) -> Option<i64> {
    if !table.is_identity() {
        return table.code_for(raw);
    }
    let code = parse_i64(raw)?;
    table.label_for(code).map(|_| code)
}

/// Applies every rule of `rules` whose source column is present.
pub fn apply_rules(
    frame: &mut EntityFrame,
    rules: &[RecodeRule],
    ctx: &TransformContext<'_>,
) -> Result<RecodeReport> {
    let years = frame.years()?;
    let mut report = RecodeReport::default();
    for rule in rules {
        if frame.data.column(rule.column).is_err() {
            debug!(entity = %frame.entity, column = rule.column, "column absent; rule skipped");
            continue;
        }
        let unknown = apply_rule(frame, rule, ctx)?;
        let mut per_column = 0u64;
        for (row, is_unknown) in unknown.iter().enumerate() {
            if *is_unknown && let Some(year) = years[row] {
                report.add(year, &format!("{}.{}", frame.entity, rule.column), 1);
                per_column += 1;
            }
        }
        if per_column > 0 {
            debug!(entity = %frame.entity, column = rule.column, unknown = per_column, "unknown codes");
        }
    }
    Ok(report)
}

/// Applies one rule and returns which rows held an unknown code.
fn apply_rule(frame: &mut EntityFrame, rule: &RecodeRule, ctx: &TransformContext<'_>) -> Result<Vec<bool>> {
    let df = &mut frame.data;
    let height = df.height();
    let mut unknown = vec![false; height];
    match &rule.kind {
        RecodeKind::Lookup { variable } => {
            let table = ctx.require_table(variable)?;
            let raw = opt_string_column(df, rule.column)?;
            let labels: Vec<Option<String>> = raw
                .iter()
                .enumerate()
                .map(|(row, value)| {
                    let value = value.as_deref()?;
                    match category(&table, value).and_then(|c| table.label_for(c)) {
                        Some(label) => Some(label.to_string()),
                        None => {
                            unknown[row] = true;
                            Some(ctx.config.recode.unknown_label.clone())
                        }
                    }
                })
                .collect();
            set_string_column(df, rule.target, labels)?;
        }
        RecodeKind::Binary { variable } => {
            let table = ctx.require_table(variable)?;
            let values: Vec<Option<i64>> = opt_string_column(df, rule.column)?
                .iter()
                .map(|v| Some(v.as_deref().and_then(|r| category(&table, r)).unwrap_or(0)))
                .collect();
            set_i64_column(df, rule.target, values)?;
        }
        RecodeKind::LabelFlag { variable, labels } => {
            let table = ctx.require_table(variable)?;
            let values: Vec<Option<i64>> = opt_string_column(df, rule.column)?
                .iter()
                .map(|v| {
                    let label = v
                        .as_deref()
                        .and_then(|r| category(&table, r))
                        .and_then(|c| table.label_for(c));
                    Some(i64::from(label.is_some_and(|l| labels.contains(&l))))
                })
                .collect();
            set_i64_column(df, rule.target, values)?;
        }
        RecodeKind::Combine { variable, second } => {
            let table = ctx.require_table(variable)?;
            let second_table = ctx.require_table(second)?;
            let first = opt_string_column(df, rule.column)?;
            let other = if df.column(second).is_ok() {
                opt_string_column(df, second)?
            } else {
                vec![None; height]
            };
            let values: Vec<Option<i64>> = first
                .iter()
                .zip(&other)
                .map(|(a, b)| {
                    let a = a.as_deref().and_then(|r| category(&table, r))?;
                    let b = b
                        .as_deref()
                        .and_then(|r| category(&second_table, r))
                        .unwrap_or(0);
                    Some(a * 10 + b)
                })
                .collect();
            set_i64_column(df, rule.target, values)?;
        }
        RecodeKind::Bands(set) => {
            let spec = set.spec(&ctx.config.recode);
            let values: Vec<Option<String>> = f64_column(df, rule.column)?
                .into_iter()
                .map(|v| v.and_then(|v| spec.assign(v)).map(str::to_string))
                .collect();
            set_string_column(df, rule.target, values)?;
        }
        RecodeKind::Sentinel => {
            let sentinel = ctx.config.recode.age_sentinel;
            let values: Vec<Option<i64>> = i64_column(df, rule.column)?
                .into_iter()
                .map(|v| v.filter(|age| *age < sentinel))
                .collect();
            set_i64_column(df, rule.target, values)?;
        }
        RecodeKind::YearFix => {
            let fixes = &ctx.config.recode.vehicle_year_fixes;
            let values: Vec<Option<i64>> = i64_column(df, rule.column)?
                .into_iter()
                .map(|v| {
                    v.map(|year| {
                        fixes
                            .iter()
                            .find(|fix| fix.from == year)
                            .map_or(year, |fix| fix.to)
                    })
                })
                .collect();
            set_i64_column(df, rule.target, values)?;
        }
    }
    Ok(unknown)
}

/// Runs the fixed rule table of each entity.
pub fn recode_all(
    crashes: &mut EntityFrame,
    parties: &mut EntityFrame,
    victims: &mut EntityFrame,
    ctx: &TransformContext<'_>,
) -> Result<RecodeReport> {
    let mut report = RecodeReport::default();
    for frame in [crashes, parties, victims] {
        let rules = rules_for(frame.entity);
        let entity_report = apply_rules(frame, &rules, ctx)?;
        report.merge(entity_report);
    }
    if report.total() > 0 {
        warn!(unknown = report.total(), "categorical codes missing from the codebook");
    }
    info!("recoded categorical columns");
    Ok(report)
}
