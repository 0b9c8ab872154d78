//! Error types for raw extract ingestion.

use std::path::PathBuf;

use oct_model::Entity;
use polars::error::PolarsError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("raw directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("missing {entity} extract for {year}: {path}")]
    MissingYearFile {
        entity: Entity,
        year: i32,
        path: PathBuf,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: duplicate column {column:?} in header")]
    DuplicateHeader { path: PathBuf, column: String },

    #[error(
        "{entity} extract for {year} does not match the header of {first_year}: missing {missing:?}, unexpected {unexpected:?}"
    )]
    HeaderMismatch {
        entity: Entity,
        year: i32,
        first_year: i32,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("{path}: required column {column:?} not found")]
    MissingColumn { path: PathBuf, column: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl IngestError {
    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
