#![deny(unsafe_code)]

use oct_model::Entity;
use polars::error::PolarsError;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("{entity}: raw column {column:?} is not in the codebook, drop list or passthrough list")]
    UnknownRawColumn { entity: Entity, column: String },

    #[error("{entity}: codebook expects raw column {column:?}, which the extract does not have")]
    MissingRawColumn { entity: Entity, column: String },

    #[error("{entity}: required column {column:?} not found")]
    MissingColumn { entity: Entity, column: String },

    #[error("codebook variable {variable:?} is required but not defined")]
    MissingVariable { variable: String },

    #[error("{entity}: row {row} has no case_id")]
    MissingCaseId { entity: Entity, row: usize },

    #[error(
        "duplicate case_id {case_id:?} in years {years:?}; add a [[keys.rules]] entry with a prefix for one of these years"
    )]
    DuplicateCaseId { case_id: String, years: Vec<i64> },

    #[error("{entity}: row {row} of case {case_id:?} has no party_number")]
    MissingPartyNumber {
        entity: Entity,
        case_id: String,
        row: usize,
    },

    #[error("parties: duplicate party {party_number:?} in case {case_id:?}")]
    DuplicateParty {
        case_id: String,
        party_number: String,
    },

    #[error("{entity}: row {row} references case_id {case_id:?}, which has no crash")]
    UnresolvedCaseId {
        entity: Entity,
        case_id: String,
        row: usize,
    },

    #[error("victims: row {row} references party {party_number:?} of case {case_id:?}, which does not exist")]
    UnresolvedParty {
        case_id: String,
        party_number: String,
        row: usize,
    },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

pub type Result<T> = std::result::Result<T, TransformError>;
