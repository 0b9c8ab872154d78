//! Provenance tracking and the entity merger.
//!
//! - **provenance**: in-process event tracker shared by the pipeline stages
//! - **store**: the persisted event log and its per-year snapshot
//! - **run**: run identity, processing tags and event stamping
//! - **roads**: per-city road aggregate
//! - **merge**: collisions, the detail expansion and back-propagation

pub mod error;
pub mod merge;
pub mod provenance;
pub mod roads;
pub mod run;
pub mod store;

pub use error::{CoreError, Result};
pub use merge::{
    COMBINED_NUM, COMBINED_VARIABLE, CRASH_FIRST, MergeInputs, MergeReport, MergedTables, PARTY_FIRST,
    VICTIM_FIRST, check_integrity, fill_cities_from_boundaries, merge_entities,
};
pub use provenance::ProvenanceTracker;
pub use roads::{ROAD_COLUMNS, aggregate_roads};
pub use run::RunContext;
pub use store::{ProvenanceStore, STORE_VERSION};
