//! Provenance records: per-stage events and the per-year snapshot folded
//! from them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage that emitted a provenance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RawMerge,
    Normalize,
    Temporal,
    Severity,
    Recode,
    Merge,
    Export,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::RawMerge => "raw_merge",
            Stage::Normalize => "normalize",
            Stage::Temporal => "temporal",
            Stage::Severity => "severity",
            Stage::Recode => "recode",
            Stage::Merge => "merge",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release status of a year of source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStatus {
    Final,
    Provisional,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub crashes: u64,
    pub parties: u64,
    pub victims: u64,
}

impl EntityCounts {
    pub fn new(crashes: u64, parties: u64, victims: u64) -> Self {
        Self {
            crashes,
            parties,
            victims,
        }
    }
}

/// Crashes removed by the spatial filter, by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionCounts {
    pub missing_coordinates: u64,
    pub outside_region: u64,
    pub reprojection_failed: u64,
    /// `case_id` of every excluded crash, in table order.
    #[serde(default)]
    pub case_ids: Vec<String>,
}

impl ExclusionCounts {
    pub fn total(&self) -> u64 {
        self.missing_coordinates + self.outside_region + self.reprojection_failed
    }
}

/// One append-only provenance log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEvent {
    pub stage: Stage,
    pub year: i32,
    /// Run identifier shared by every event of one pipeline execution.
    pub run_id: String,
    /// RFC 3339 timestamp.
    pub recorded_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebook_fingerprint: Option<String>,
    #[serde(default)]
    pub counts: EntityCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DataStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded: Option<ExclusionCounts>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown_codes: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_datetime: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ProvenanceEvent {
    pub fn new(
        stage: Stage,
        year: i32,
        run_id: impl Into<String>,
        recorded_at: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            year,
            run_id: run_id.into(),
            recorded_at: recorded_at.into(),
            codebook_fingerprint: None,
            counts: EntityCounts::default(),
            date_start: None,
            date_end: None,
            status: None,
            excluded: None,
            unknown_codes: BTreeMap::new(),
            invalid_datetime: None,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_counts(mut self, counts: EntityCounts) -> Self {
        self.counts = counts;
        self
    }

    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.codebook_fingerprint = fingerprint;
        self
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Calendar date part of `recorded_at`.
    pub fn recorded_date(&self) -> &str {
        self.recorded_at.get(..10).unwrap_or(&self.recorded_at)
    }
}

/// Current view of one year, folded from its events in log order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearRecord {
    pub year: i32,
    pub date_start: Option<String>,
    pub date_end: Option<String>,
    /// Date the raw extract was last merged.
    pub date_updated: Option<String>,
    /// Date the features were last exported.
    pub date_gp: Option<String>,
    pub status: DataStatus,
    pub reported: EntityCounts,
    pub normalized: EntityCounts,
    pub geocoded: EntityCounts,
    pub excluded: ExclusionCounts,
    pub unknown_codes: BTreeMap<String, u64>,
    pub invalid_datetime: u64,
    pub stages: Vec<Stage>,
    pub notes: Vec<String>,
    /// Run that produced the latest event for this year.
    pub last_run: Option<String>,
}

impl YearRecord {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            ..Self::default()
        }
    }

    /// Applies one event. Later events override earlier values.
    pub fn apply(&mut self, event: &ProvenanceEvent) {
        match event.stage {
            Stage::RawMerge => {
                self.reported = event.counts;
                self.date_updated = Some(event.recorded_date().to_string());
                if event.date_start.is_some() {
                    self.date_start.clone_from(&event.date_start);
                }
                if event.date_end.is_some() {
                    self.date_end.clone_from(&event.date_end);
                }
                if let Some(status) = event.status {
                    self.status = status;
                }
            }
            Stage::Normalize => self.normalized = event.counts,
            Stage::Temporal => {
                if let Some(invalid) = event.invalid_datetime {
                    self.invalid_datetime = invalid;
                }
            }
            Stage::Recode => self.unknown_codes.clone_from(&event.unknown_codes),
            Stage::Export => {
                self.geocoded = event.counts;
                self.date_gp = Some(event.recorded_date().to_string());
                if let Some(excluded) = &event.excluded {
                    self.excluded = excluded.clone();
                }
            }
            Stage::Severity | Stage::Merge => {}
        }
        if !self.stages.contains(&event.stage) {
            self.stages.push(event.stage);
        }
        for note in &event.notes {
            if !self.notes.contains(note) {
                self.notes.push(note.clone());
            }
        }
        self.last_run = Some(event.run_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_events_override_counts() {
        let mut record = YearRecord::new(2020);
        let first = ProvenanceEvent::new(Stage::RawMerge, 2020, "r1", "2026-01-01T00:00:00Z")
            .with_counts(EntityCounts::new(90, 140, 110));
        let second = ProvenanceEvent::new(Stage::RawMerge, 2020, "r2", "2026-02-01T00:00:00Z")
            .with_counts(EntityCounts::new(100, 150, 120));
        record.apply(&first);
        record.apply(&second);
        assert_eq!(record.reported, EntityCounts::new(100, 150, 120));
        assert_eq!(record.date_updated.as_deref(), Some("2026-02-01"));
        assert_eq!(record.stages, vec![Stage::RawMerge]);
        assert_eq!(record.last_run.as_deref(), Some("r2"));
    }

    #[test]
    fn export_event_sets_exclusions() {
        let mut record = YearRecord::new(2021);
        let mut event = ProvenanceEvent::new(Stage::Export, 2021, "r1", "2026-03-04T05:06:07Z");
        event.excluded = Some(ExclusionCounts {
            missing_coordinates: 2,
            outside_region: 1,
            reprojection_failed: 0,
            case_ids: vec!["A".into(), "B".into(), "C".into()],
        });
        record.apply(&event);
        assert_eq!(record.excluded.total(), 3);
        assert_eq!(record.date_gp.as_deref(), Some("2026-03-04"));
    }
}
