//! Library side of the `octraffic` CLI: logging setup, the staged pipeline
//! and the summary tables.

pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod summary;
