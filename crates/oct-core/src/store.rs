//! Persistent provenance store.
//!
//! The store is an append-only event log written as pretty JSON. Each save
//! also writes the per-year snapshot folded from the log so the file can be
//! read by hand; on load the snapshot is recomputed and the stored copy is
//! ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use oct_model::{ProvenanceEvent, YearRecord};
use oct_spatial::{SpatialError, write_atomic};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::provenance::ProvenanceTracker;

/// Current on-disk layout version.
pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceStore {
    pub version: u32,
    pub events: Vec<ProvenanceEvent>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    events: &'a [ProvenanceEvent],
    snapshot: BTreeMap<i32, YearRecord>,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    events: Vec<ProvenanceEvent>,
}

impl Default for ProvenanceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvenanceStore {
    pub fn new() -> Self {
        Self {
            version: STORE_VERSION,
            events: Vec::new(),
        }
    }

    /// Loads the store at `path`. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no provenance store yet");
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path).map_err(|e| CoreError::io("read", path, e))?;
        let file: StoreFile =
            serde_json::from_str(&text).map_err(|source| CoreError::ProvenanceParse {
                path: path.to_path_buf(),
                source,
            })?;
        if file.version > STORE_VERSION {
            return Err(CoreError::UnsupportedStoreVersion {
                found: file.version,
                max_supported: STORE_VERSION,
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), events = file.events.len(), "loaded provenance store");
        Ok(Self {
            version: STORE_VERSION,
            events: file.events,
        })
    }

    /// Appends the tracker's pending events in recording order and returns
    /// how many were added.
    pub fn merge(&mut self, tracker: &ProvenanceTracker) -> usize {
        let pending = tracker.drain();
        let added = pending.len();
        self.events.extend(pending);
        added
    }

    /// Folds the log into one record per year.
    pub fn snapshot(&self) -> BTreeMap<i32, YearRecord> {
        let mut records: BTreeMap<i32, YearRecord> = BTreeMap::new();
        for event in &self.events {
            records
                .entry(event.year)
                .or_insert_with(|| YearRecord::new(event.year))
                .apply(event);
        }
        records
    }

    pub fn year(&self, year: i32) -> Option<YearRecord> {
        self.snapshot().remove(&year)
    }

    /// Writes the store atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = StoreFileRef {
            version: self.version,
            events: &self.events,
            snapshot: self.snapshot(),
        };
        write_atomic(path, |writer| {
            serde_json::to_writer_pretty(writer, &file).map_err(|source| SpatialError::Json {
                path: path.to_path_buf(),
                source,
            })
        })?;
        info!(path = %path.display(), events = self.events.len(), "saved provenance store");
        Ok(())
    }
}
