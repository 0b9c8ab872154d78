//! Data model for the OCTraffic collision pipeline.
//!
//! Plain types only: entities, the codebook registry, pipeline configuration
//! and provenance records. Loading and persistence live in other crates.

pub mod codebook;
pub mod config;
pub mod entity;
pub mod error;
pub mod provenance;

pub use codebook::{CodeTable, Codebook, CodebookDocument, CodebookEntry, FeatureClasses, LabelType};
pub use config::{
    BandSpec, BoundingBox, DstRule, HourWindow, IngestConfig, InjuryCodes, KeyRule, KeysConfig,
    MergeConfig, PathsConfig, PipelineConfig, ProjectConfig, RecodeConfig, RushHourPolicy,
    SeverityConfig, SpatialConfig, TemporalConfig, TimeInterval, YearFix,
};
pub use entity::Entity;
pub use error::{ModelError, Result};
pub use provenance::{
    DataStatus, EntityCounts, ExclusionCounts, ProvenanceEvent, Stage, YearRecord,
};
