//! Shared utilities for the OCTraffic pipeline crates.
//!
//! Every stage of the pipeline reads and rebuilds Polars columns row by row,
//! so the conversions from `AnyValue` and the typed column accessors live here.

pub mod columns;
pub mod polars;

pub use columns::{
    f64_column, filter_rows, gather_column, gather_frame, has_column, i64_column, opt_string_column,
    reorder_columns, set_bool_column, set_f64_column, set_i64_column, set_string_column,
};
pub use polars::{
    any_to_f64, any_to_i64, any_to_opt_string, any_to_string, format_numeric, parse_f64, parse_i64,
};
