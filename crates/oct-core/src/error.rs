//! Error types for provenance persistence and the entity merger.

#![deny(unsafe_code)]

use std::path::PathBuf;

use oct_ingest::IngestError;
use oct_model::Entity;
use oct_spatial::SpatialError;
use oct_transform::TransformError;
use polars::error::PolarsError;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid provenance store {path}: {source}")]
    ProvenanceParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("provenance store {path} has version {found}; this build reads up to {max_supported}")]
    UnsupportedStoreVersion {
        found: u32,
        max_supported: u32,
        path: PathBuf,
    },

    #[error("{entity}: {detail}")]
    Integrity { entity: Entity, detail: String },

    #[error("city {city:?} appears more than once in the cities table")]
    DuplicateCity { city: String },

    #[error("{table}: required column {column:?} not found")]
    MissingColumn { table: String, column: String },

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl CoreError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn missing_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            table: table.into(),
            column: column.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
