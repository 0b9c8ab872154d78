//! Identity of one pipeline execution.

use chrono::{DateTime, SecondsFormat, Utc};
use oct_model::{Entity, ProvenanceEvent, Stage};

const TAG_TIMESTAMP: &str = "%Y%m%dT%H%M%SZ";

/// Run identifier, start time and covered years shared by every stage.
///
/// Tag columns and provenance timestamps derive from `started_at`, so a
/// test can pin them by constructing the context with a fixed time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub fingerprint: Option<String>,
    pub first_year: i32,
    pub last_year: i32,
}

impl RunContext {
    pub fn new(started_at: DateTime<Utc>, years: (i32, i32), fingerprint: Option<String>) -> Self {
        Self {
            run_id: format!("run-{}", started_at.format(TAG_TIMESTAMP)),
            started_at,
            fingerprint,
            first_year: years.0,
            last_year: years.1,
        }
    }

    pub fn start(years: (i32, i32), fingerprint: Option<String>) -> Self {
        Self::new(Utc::now(), years, fingerprint)
    }

    pub fn timestamp(&self) -> String {
        self.started_at.format(TAG_TIMESTAMP).to_string()
    }

    pub fn recorded_at(&self) -> String {
        self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Empty event for `stage` and `year`, stamped with this run.
    pub fn event(&self, stage: Stage, year: i32) -> ProvenanceEvent {
        ProvenanceEvent::new(stage, year, self.run_id.clone(), self.recorded_at())
            .with_fingerprint(self.fingerprint.clone())
    }

    /// Processing tag for rows of `entity`: `{entity}:{first}-{last}:{timestamp}`.
    pub fn tag(&self, entity: Entity) -> String {
        format!(
            "{}:{}-{}:{}",
            entity.as_str(),
            self.first_year,
            self.last_year,
            self.timestamp()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tags_and_events_use_the_start_time() {
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 8, 30, 5).unwrap();
        let run = RunContext::new(started, (2019, 2021), Some("abc".to_string()));

        assert_eq!(run.run_id, "run-20260501T083005Z");
        assert_eq!(run.tag(Entity::Parties), "parties:2019-2021:20260501T083005Z");

        let event = run.event(Stage::Merge, 2020);
        assert_eq!(event.recorded_at, "2026-05-01T08:30:05Z");
        assert_eq!(event.recorded_date(), "2026-05-01");
        assert_eq!(event.codebook_fingerprint.as_deref(), Some("abc"));
    }
}
