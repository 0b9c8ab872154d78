//! In-process provenance tracking for one pipeline run.
//!
//! Stages record [`ProvenanceEvent`]s as they finish. The tracker is cheap to
//! clone and shares one event list, so any stage can record without owning
//! the tracker. Pending events are drained into the [`ProvenanceStore`]
//! before each save.
//!
//! [`ProvenanceStore`]: crate::store::ProvenanceStore

use std::sync::{Arc, RwLock};

use oct_model::{ProvenanceEvent, Stage};

/// Thread-safe provenance tracker for a processing run.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceTracker {
    events: Arc<RwLock<Vec<ProvenanceEvent>>>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event.
    pub fn record(&self, event: ProvenanceEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push(event);
        }
    }

    /// Record one event per year, built by `build`.
    pub fn record_years<F>(&self, years: &[i32], mut build: F)
    where
        F: FnMut(i32) -> ProvenanceEvent,
    {
        for &year in years {
            self.record(build(year));
        }
    }

    /// All pending events, in recording order.
    pub fn events(&self) -> Vec<ProvenanceEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_for_year(&self, year: i32) -> Vec<ProvenanceEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.year == year)
            .collect()
    }

    pub fn events_for_stage(&self, stage: Stage) -> Vec<ProvenanceEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.stage == stage)
            .collect()
    }

    /// Removes and returns every pending event.
    pub fn drain(&self) -> Vec<ProvenanceEvent> {
        self.events
            .write()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stage: Stage, year: i32) -> ProvenanceEvent {
        ProvenanceEvent::new(stage, year, "run-1", "2026-05-01T12:00:00Z")
    }

    #[test]
    fn clones_share_events() {
        let tracker = ProvenanceTracker::new();
        let other = tracker.clone();
        other.record(event(Stage::RawMerge, 2020));
        tracker.record(event(Stage::RawMerge, 2021));
        tracker.record(event(Stage::Normalize, 2020));

        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.events_for_year(2020).len(), 2);
        assert_eq!(other.events_for_stage(Stage::RawMerge).len(), 2);
    }

    #[test]
    fn drain_empties_the_tracker() {
        let tracker = ProvenanceTracker::new();
        tracker.record_years(&[2019, 2020], |year| event(Stage::Export, year));

        let drained = tracker.drain();
        assert_eq!(
            drained.iter().map(|e| e.year).collect::<Vec<_>>(),
            vec![2019, 2020]
        );
        assert!(tracker.is_empty());
        assert!(tracker.drain().is_empty());
    }
}
