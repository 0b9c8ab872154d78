//! Pipeline configuration.
//!
//! Every section deserializes with defaults equal to the Orange County
//! settings, so an empty TOML document is a complete configuration. Policy
//! choices (rush-hour windows, bands, bounding region) live here rather than
//! in stage logic.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{ModelError, Result};
use crate::provenance::DataStatus;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub project: ProjectConfig,
    pub paths: PathsConfig,
    pub ingest: IngestConfig,
    pub keys: KeysConfig,
    pub temporal: TemporalConfig,
    pub severity: SeverityConfig,
    pub recode: RecodeConfig,
    pub spatial: SpatialConfig,
    pub merge: MergeConfig,
}

impl PipelineConfig {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.project.years.is_empty() {
            return Err(invalid("project.years must list at least one year"));
        }
        if self.project.years.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("project.years must be strictly ascending"));
        }
        for rule in &self.keys.rules {
            if !self.project.years.contains(&rule.year) {
                return Err(invalid(format!(
                    "keys.rules references year {} which is not in project.years",
                    rule.year
                )));
            }
            if rule.prefix.trim().is_empty() {
                return Err(invalid(format!(
                    "keys.rules prefix for year {} is empty",
                    rule.year
                )));
            }
        }
        self.temporal.validate()?;
        for (name, band) in [
            ("recode.party_age_group", &self.recode.party_age_group),
            ("recode.victim_age_group", &self.recode.victim_age_group),
            ("recode.vehicle_year_group", &self.recode.vehicle_year_group),
        ] {
            band.validate(name)?;
        }
        self.spatial.bbox.validate()?;
        Ok(())
    }

    /// Returns a copy with every relative path resolved against `base`.
    #[must_use]
    pub fn resolved(mut self, base: &Path) -> Self {
        self.paths = self.paths.resolve(base);
        self
    }

    /// First and last configured year.
    pub fn year_range(&self) -> (i32, i32) {
        let first = self.project.years.first().copied().unwrap_or_default();
        let last = self.project.years.last().copied().unwrap_or(first);
        (first, last)
    }
}

fn invalid(message: impl Into<String>) -> ModelError {
    ModelError::InvalidConfig(message.into())
}

// ============================================================================
// Project and paths
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub version: String,
    pub years: Vec<i32>,
    /// Years up to and including this one are final; later years are provisional.
    pub final_through_year: Option<i32>,
}

impl ProjectConfig {
    /// Release status of a source year under `final_through_year`.
    pub fn status_for(&self, year: i32) -> DataStatus {
        match self.final_through_year {
            Some(last_final) if year <= last_final => DataStatus::Final,
            Some(_) => DataStatus::Provisional,
            None => DataStatus::Unknown,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "OCTraffic".to_string(),
            version: "2025.3".to_string(),
            years: (2012..=2024).collect(),
            final_through_year: Some(2023),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    pub codebook: PathBuf,
    pub provenance: PathBuf,
    pub cities: Option<PathBuf>,
    pub roads: Option<PathBuf>,
    pub boundaries: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            output_dir: PathBuf::from("data/processed"),
            codebook: PathBuf::from("codebook/cb.json"),
            provenance: PathBuf::from("metadata/tims_metadata.json"),
            cities: None,
            roads: None,
            boundaries: None,
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn resolve(self, base: &Path) -> Self {
        let join = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };
        Self {
            raw_dir: join(self.raw_dir),
            output_dir: join(self.output_dir),
            codebook: join(self.codebook),
            provenance: join(self.provenance),
            cities: self.cities.map(join),
            roads: self.roads.map(join),
            boundaries: self.boundaries.map(join),
        }
    }
}

// ============================================================================
// Ingest and key rules
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Cell values read as missing.
    pub na_values: Vec<String>,
    pub crashes_stem: String,
    pub parties_stem: String,
    pub victims_stem: String,
    /// Raw crash column holding the collision date.
    pub date_column: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            na_values: vec![String::new(), "NA".to_string(), "N/A".to_string()],
            crashes_stem: "Crashes".to_string(),
            parties_stem: "Parties".to_string(),
            victims_stem: "Victims".to_string(),
            date_column: "COLLISION_DATE".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn stem(&self, entity: Entity) -> &str {
        match entity {
            Entity::Crashes | Entity::Collisions => &self.crashes_stem,
            Entity::Parties => &self.parties_stem,
            Entity::Victims => &self.victims_stem,
        }
    }

    pub fn file_name(&self, entity: Entity, year: i32) -> String {
        format!("{}_{year}.csv", self.stem(entity))
    }
}

/// Rewrites one year's `case_id` values as `prefix + case_id` in every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRule {
    pub year: i32,
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub rules: Vec<KeyRule>,
}

impl KeysConfig {
    pub fn prefix_for(&self, year: i32) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.year == year)
            .map(|rule| rule.prefix.as_str())
    }
}

// ============================================================================
// Temporal
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DstRule {
    /// United States rule (Energy Policy Act of 2005 from 2007 onwards).
    #[default]
    Us,
    None,
}

/// Inclusive clock-hour window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        (self.start..=self.end).contains(&hour)
    }
}

/// Half-open `[start_hour, end_hour)` time-of-day interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start_hour: u32,
    pub end_hour: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RushHourPolicy {
    /// ISO weekday numbers (Monday = 1) on which rush hours apply.
    pub weekdays: Vec<u32>,
    pub morning: HourWindow,
    pub evening: HourWindow,
    pub none_label: String,
    pub morning_label: String,
    pub evening_label: String,
    pub unknown_label: String,
}

impl Default for RushHourPolicy {
    fn default() -> Self {
        Self {
            weekdays: vec![1, 2, 3, 4, 5],
            morning: HourWindow { start: 7, end: 10 },
            evening: HourWindow { start: 16, end: 19 },
            none_label: "Non Rush Hours".to_string(),
            morning_label: "Morning (6-9am)".to_string(),
            evening_label: "Evening (4-7pm)".to_string(),
            unknown_label: "Unknown Time".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub date_column: String,
    pub time_column: String,
    pub process_date_column: String,
    pub utc_offset_hours: i32,
    pub dst_rule: DstRule,
    pub standard_zone: String,
    pub daylight_zone: String,
    pub intervals: Vec<TimeInterval>,
    pub rush_hours: RushHourPolicy,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        let interval = |start_hour, end_hour, label: &str| TimeInterval {
            start_hour,
            end_hour,
            label: label.to_string(),
        };
        Self {
            date_column: "coll_date".to_string(),
            time_column: "coll_time".to_string(),
            process_date_column: "process_date".to_string(),
            utc_offset_hours: -8,
            dst_rule: DstRule::Us,
            standard_zone: "PST".to_string(),
            daylight_zone: "PDT".to_string(),
            intervals: vec![
                interval(0, 6, "Night (00:00-06:00)"),
                interval(6, 12, "Morning (06:00-12:00)"),
                interval(12, 18, "Afternoon (12:00-18:00)"),
                interval(18, 24, "Evening (18:00-24:00)"),
            ],
            rush_hours: RushHourPolicy::default(),
        }
    }
}

impl TemporalConfig {
    fn validate(&self) -> Result<()> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(invalid("temporal.utc_offset_hours must be within -12..=14"));
        }
        for interval in &self.intervals {
            if interval.start_hour >= interval.end_hour || interval.end_hour > 24 {
                return Err(invalid(format!(
                    "temporal interval {:?} must satisfy start < end <= 24",
                    interval.label
                )));
            }
        }
        let policy = &self.rush_hours;
        for window in [policy.morning, policy.evening] {
            if window.start > window.end || window.end > 23 {
                return Err(invalid("rush-hour windows must satisfy start <= end <= 23"));
            }
        }
        if policy.weekdays.iter().any(|d| !(1..=7).contains(d)) {
            return Err(invalid("rush-hour weekdays must be ISO weekday numbers 1..=7"));
        }
        Ok(())
    }
}

// ============================================================================
// Severity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjuryCodes {
    pub killed: Vec<String>,
    pub severe: Vec<String>,
    pub visible: Vec<String>,
    pub complaint_pain: Vec<String>,
}

impl Default for InjuryCodes {
    fn default() -> Self {
        Self {
            killed: vec!["1".to_string()],
            severe: vec!["2".to_string()],
            visible: vec!["3".to_string()],
            complaint_pain: vec!["4".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    pub injury_column: String,
    pub injury: InjuryCodes,
    pub role_column: String,
    pub pedestrian_roles: Vec<String>,
    pub bicyclist_roles: Vec<String>,
    pub vehicle_type_column: String,
    pub motorcycle_types: Vec<String>,
    /// Ordinal category code of a severe-injury collision.
    pub severe_level: i64,
    /// Ordinal category code of a fatal collision.
    pub fatal_level: i64,
    /// Severity ranks counted as multiple severe or fatal casualties.
    pub multi_ranks: Vec<i64>,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            injury_column: "victim_degree_of_injury".to_string(),
            injury: InjuryCodes::default(),
            role_column: "victim_role".to_string(),
            pedestrian_roles: vec!["3".to_string()],
            bicyclist_roles: vec!["4".to_string()],
            vehicle_type_column: "stwd_vehicle_type".to_string(),
            motorcycle_types: vec!["C".to_string()],
            severe_level: 3,
            fatal_level: 4,
            multi_ranks: vec![2, 5, 6, 7, 8],
        }
    }
}

// ============================================================================
// Recode
// ============================================================================

/// Left-closed bands: `[edges[i], edges[i + 1])`, with the last band open-ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    pub edges: Vec<f64>,
    pub labels: Vec<String>,
}

impl BandSpec {
    pub fn new(edges: &[f64], labels: &[&str]) -> Self {
        Self {
            edges: edges.to_vec(),
            labels: labels.iter().map(|l| (*l).to_string()).collect(),
        }
    }

    /// Label of the band containing `value`; `None` below the first edge.
    pub fn assign(&self, value: f64) -> Option<&str> {
        if !value.is_finite() {
            return None;
        }
        let pos = self.edges.iter().rposition(|edge| value >= *edge)?;
        self.labels.get(pos).map(String::as_str)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.edges.is_empty() || self.edges.len() != self.labels.len() {
            return Err(invalid(format!(
                "{name} needs one label per edge ({} edges, {} labels)",
                self.edges.len(),
                self.labels.len()
            )));
        }
        if self.edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(format!("{name} edges must be strictly ascending")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearFix {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecodeConfig {
    /// Category assigned to codes missing from a lookup table.
    pub unknown_label: String,
    /// Ages at or above this value are "not stated" sentinels.
    pub age_sentinel: i64,
    pub party_age_group: BandSpec,
    pub victim_age_group: BandSpec,
    pub vehicle_year_group: BandSpec,
    pub vehicle_year_fixes: Vec<YearFix>,
}

impl Default for RecodeConfig {
    fn default() -> Self {
        let age = BandSpec::new(
            &[0.0, 18.0, 25.0, 35.0, 45.0, 55.0, 65.0, 75.0],
            &[
                "0-17", "18-24", "25-34", "35-44", "45-54", "55-64", "65-74", "75+",
            ],
        );
        let fix = |from, to| YearFix { from, to };
        Self {
            unknown_label: "Unknown".to_string(),
            age_sentinel: 998,
            party_age_group: age.clone(),
            victim_age_group: age,
            vehicle_year_group: BandSpec::new(
                &[0.0, 1990.0, 2000.0, 2010.0, 2020.0],
                &[
                    "Before 1990",
                    "1990-1999",
                    "2000-2009",
                    "2010-2019",
                    "2020 or later",
                ],
            ),
            vehicle_year_fixes: vec![
                fix(215, 2015),
                fix(1201, 2011),
                fix(2047, 2017),
                fix(2101, 2011),
                fix(2102, 2012),
                fix(2108, 2018),
                fix(2203, 2023),
                fix(2302, 2022),
                fix(2916, 2016),
            ],
        }
    }
}

// ============================================================================
// Spatial and merge
// ============================================================================

/// Inclusive bounding region in source coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            xmin: -118.119_784_72,
            xmax: -117.412_836_72,
            ymin: 33.387_125_29,
            ymax: 33.947_639_46,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    fn validate(&self) -> Result<()> {
        let finite = [self.xmin, self.xmax, self.ymin, self.ymax]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.xmin >= self.xmax || self.ymin >= self.ymax {
            return Err(invalid("spatial.bbox must have finite xmin < xmax and ymin < ymax"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub source_srid: u32,
    pub target_srid: u32,
    pub x_column: String,
    pub y_column: String,
    pub bbox: BoundingBox,
    /// Also write party and victim feature collections.
    pub export_children: bool,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            source_srid: 4326,
            target_srid: 3857,
            x_column: "point_x".to_string(),
            y_column: "point_y".to_string(),
            bbox: BoundingBox::default(),
            export_children: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Crash columns copied onto party and victim rows by `cid`.
    pub propagate: Vec<String>,
    /// Boundary-name column of the cities reference table.
    pub city_column: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let propagate = [
            "date_datetime",
            "date_year",
            "date_quarter",
            "date_month",
            "date_week",
            "date_day",
            "date_process",
            "dt_year",
            "dt_quarter",
            "dt_month",
            "dt_year_week",
            "dt_week_day",
            "dt_month_day",
            "dt_year_day",
            "dt_hour",
            "dt_minute",
            "dt_dst",
            "dt_zone",
            "coll_date",
            "coll_time",
            "coll_severity",
            "coll_severity_num",
            "coll_severity_rank",
            "coll_severity_hs",
            "city",
            "point_x",
            "point_y",
        ];
        Self {
            propagate: propagate.iter().map(|c| (*c).to_string()).collect(),
            city_column: "city".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn band_assignment_is_left_closed() {
        let band = RecodeConfig::default().party_age_group;
        assert_eq!(band.assign(17.0), Some("0-17"));
        assert_eq!(band.assign(18.0), Some("18-24"));
        assert_eq!(band.assign(90.0), Some("75+"));
        assert_eq!(band.assign(-1.0), None);
        assert_eq!(band.assign(f64::NAN), None);
    }

    #[test]
    fn status_follows_final_through_year() {
        let mut project = ProjectConfig::default();
        assert_eq!(project.status_for(2023), DataStatus::Final);
        assert_eq!(project.status_for(2024), DataStatus::Provisional);
        project.final_through_year = None;
        assert_eq!(project.status_for(2012), DataStatus::Unknown);
    }

    #[test]
    fn bbox_contains_is_inclusive() {
        let bbox = BoundingBox::default();
        assert!(bbox.contains(bbox.xmin, bbox.ymax));
        assert!(!bbox.contains(-119.0, 33.5));
    }

    #[test]
    fn key_rule_for_unknown_year_rejected() {
        let mut config = PipelineConfig::default();
        config.keys.rules.push(KeyRule {
            year: 1999,
            prefix: "X".to_string(),
        });
        assert!(matches!(config.validate(), Err(ModelError::InvalidConfig(_))));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let config = PipelineConfig::default().resolved(Path::new("/srv/oct"));
        assert_eq!(config.paths.raw_dir, PathBuf::from("/srv/oct/data/raw"));
        assert!(config.paths.cities.is_none());
    }
}
