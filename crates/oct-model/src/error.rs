use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("duplicate codebook variable: {0}")]
    DuplicateVariable(String),
    #[error("raw column {raw} is claimed by both {first} and {second} in {entity}")]
    DuplicateRawColumn {
        entity: String,
        raw: String,
        first: String,
        second: String,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
