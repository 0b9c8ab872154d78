//! Spatial filter and exporter for the OCTraffic tables.
//!
//! - **filter**: point construction, bounding-region filter and exclusion counts
//! - **projection**: WGS84 to Web Mercator reprojection
//! - **boundary**: R-tree index of boundary polygons for city attribution
//! - **export**: atomic CSV and GeoJSON writers

pub mod boundary;
pub mod error;
pub mod export;
pub mod filter;
pub mod projection;

pub use boundary::BoundaryIndex;
pub use error::{Result, SpatialError};
pub use export::{
    FEATURES_DIR, RAW_DIR, TABLES_DIR, feature_collection, feature_path, raw_table_path, table_path,
    write_atomic, write_csv, write_features,
};
pub use filter::{
    ExclusionReason, FilterOutcome, PROJ_X, PROJ_Y, filter_crashes, locate, restrict_to_retained,
};
pub use projection::{
    EARTH_RADIUS_M, MAX_MERCATOR_LATITUDE, Projection, WEB_MERCATOR, WGS84, to_web_mercator,
};
