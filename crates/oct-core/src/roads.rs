//! Per-city road aggregate built from the roads reference table.

use std::collections::BTreeMap;

use oct_common::{f64_column, has_column, opt_string_column};
use oct_transform::title_case;
use polars::prelude::{DataFrame, IntoColumn, NamedFrom, Series};
use tracing::debug;

use crate::error::{CoreError, Result};

pub const PLACE_COLUMN: &str = "place_name";
pub const CATEGORY_COLUMN: &str = "road_cat";
pub const LENGTH_COLUMN: &str = "road_length";

/// Aggregate columns joined onto collisions, in output order.
pub const ROAD_COLUMNS: [&str; 5] = [
    "roads_primary",
    "roads_secondary",
    "roads_local",
    "road_length_mean",
    "road_length_sum",
];

#[derive(Debug, Clone, Default, PartialEq)]
struct RoadTally {
    primary: i64,
    secondary: i64,
    local: i64,
    length_sum: f64,
    lengths: u64,
}

impl RoadTally {
    fn mean(&self) -> Option<f64> {
        (self.lengths > 0).then(|| self.length_sum / self.lengths as f64)
    }
}

/// Builds one row per city with road counts by category and length
/// statistics. Segments without a city are ignored; city names are
/// title-cased so they match the normalized crash table.
pub fn aggregate_roads(roads: &DataFrame, city_column: &str) -> Result<DataFrame> {
    for column in [PLACE_COLUMN, CATEGORY_COLUMN, LENGTH_COLUMN] {
        if !has_column(roads, column) {
            return Err(CoreError::missing_column("roads", column));
        }
    }
    let places = opt_string_column(roads, PLACE_COLUMN)?;
    let categories = opt_string_column(roads, CATEGORY_COLUMN)?;
    let lengths = f64_column(roads, LENGTH_COLUMN)?;

    let mut tallies: BTreeMap<String, RoadTally> = BTreeMap::new();
    let mut skipped = 0usize;
    for row in 0..places.len() {
        let Some(place) = places[row].as_deref() else {
            skipped += 1;
            continue;
        };
        let tally = tallies.entry(title_case(place)).or_default();
        match categories[row].as_deref() {
            Some("Primary") => tally.primary += 1,
            Some("Secondary") => tally.secondary += 1,
            Some("Local") => tally.local += 1,
            _ => {}
        }
        if let Some(length) = lengths[row].filter(|l| l.is_finite()) {
            tally.length_sum += length;
            tally.lengths += 1;
        }
    }
    debug!(cities = tallies.len(), skipped, "aggregated roads");

    let cities: Vec<String> = tallies.keys().cloned().collect();
    let values: Vec<&RoadTally> = tallies.values().collect();
    let df = DataFrame::new(vec![
        Series::new(city_column.into(), cities).into_column(),
        Series::new(
            ROAD_COLUMNS[0].into(),
            values.iter().map(|t| t.primary).collect::<Vec<_>>(),
        )
        .into_column(),
        Series::new(
            ROAD_COLUMNS[1].into(),
            values.iter().map(|t| t.secondary).collect::<Vec<_>>(),
        )
        .into_column(),
        Series::new(
            ROAD_COLUMNS[2].into(),
            values.iter().map(|t| t.local).collect::<Vec<_>>(),
        )
        .into_column(),
        Series::new(
            ROAD_COLUMNS[3].into(),
            values.iter().map(|t| t.mean()).collect::<Vec<_>>(),
        )
        .into_column(),
        Series::new(
            ROAD_COLUMNS[4].into(),
            values.iter().map(|t| t.length_sum).collect::<Vec<_>>(),
        )
        .into_column(),
    ])?;
    Ok(df)
}
