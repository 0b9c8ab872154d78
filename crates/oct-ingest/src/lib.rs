//! Ingestion of the yearly crash, party and victim extracts.
//!
//! Files follow `{stem}_{year}.csv` in one raw directory. The raw merge
//! verifies that every file exists, reads each as nullable strings and
//! stacks the years of an entity into a single table.

pub mod csv_table;
pub mod discovery;
pub mod error;
pub mod progress;
pub mod raw_merge;

pub use csv_table::{CsvTable, read_csv_table};
pub use discovery::{YearFile, discover_year_files};
pub use error::{IngestError, Result};
pub use progress::{NullProgress, ProgressCallback};
pub use raw_merge::{
    RawTables, YEAR_COLUMN, YearSummary, covered_range, merge_raw, parse_collision_date,
    read_unified_table,
};
