//! Transformations over the unified crash, party and victim tables.
//!
//! - **normalize**: column renames, key rules and surrogate ids (`cid`, `pid`, `vid`)
//! - **temporal**: date, time, DST and rush-hour features
//! - **severity**: casualty aggregates and collision severity recodes
//! - **recode**: table-driven categorical recoding against the codebook

pub mod context;
pub mod error;
pub mod frame;
pub mod normalize;
pub mod recode;
pub mod severity;
pub mod temporal;

pub use context::TransformContext;
pub use error::{Result, TransformError};
pub use frame::{EntityFrame, YEAR_COLUMN};
pub use normalize::{CASE_ID, NormalizedTables, PARTY_NUMBER, RawInput, normalize, title_case, validate_columns};
pub use recode::{
    BandSet, RecodeKind, RecodeReport, RecodeRule, apply_rules, crash_rules, party_rules, recode_all,
    rules_for, victim_rules,
};
pub use severity::{
    AGGREGATE_COLUMNS, SEVERITY_VARIABLE, SeverityReport, attach_aggregates, classify_children,
    derive_severity, severity_rank,
};
pub use temporal::{
    TemporalReport, derive_temporal, format_coll_time, is_dst, parse_coll_date, rush_hour,
    time_interval, us_dst_bounds,
};
