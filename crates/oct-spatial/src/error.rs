//! Error types for spatial filtering and export.

#![deny(unsafe_code)]

use std::path::PathBuf;

use polars::error::PolarsError;

#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    #[error("no projection from EPSG:{source_srid} to EPSG:{target_srid}")]
    UnsupportedProjection { source_srid: u32, target_srid: u32 },

    #[error("required column {column:?} not found")]
    MissingColumn { column: String },

    #[error("failed to {operation} {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {temp_path} into place at {target_path}: {source}")]
    AtomicWriteFailed {
        temp_path: PathBuf,
        target_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize features for {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("invalid boundary file {path}: {message}")]
    InvalidBoundary { path: PathBuf, message: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl SpatialError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpatialError>;
