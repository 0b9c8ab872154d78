#![deny(unsafe_code)]

use std::path::PathBuf;

use oct_model::ModelError;

#[derive(Debug, thiserror::Error)]
pub enum CodebookError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse codebook JSON {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse configuration TOML {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid codebook or configuration {path}: {source}")]
    Model {
        path: PathBuf,
        #[source]
        source: ModelError,
    },

    #[error("invalid codebook {path}: variable {variable}: {message}")]
    InvalidVariable {
        path: PathBuf,
        variable: String,
        message: String,
    },
}

impl CodebookError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn model(path: impl Into<PathBuf>, source: ModelError) -> Self {
        Self::Model {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CodebookError>;
