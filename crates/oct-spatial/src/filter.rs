//! Point construction, bounding-region filter and reprojection.
//!
//! Crashes are the only entity with their own coordinates. Every other table
//! is restricted to the retained crashes by `cid` and inherits the crash's
//! projected point.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use oct_common::{f64_column, filter_rows, i64_column, opt_string_column, set_f64_column};
use oct_model::{BoundingBox, ExclusionCounts, SpatialConfig};
use oct_transform::EntityFrame;
use tracing::{debug, info, warn};

use crate::error::{Result, SpatialError};
use crate::projection::Projection;

pub const PROJ_X: &str = "proj_x";
pub const PROJ_Y: &str = "proj_y";

/// Why a crash was left out of the exported feature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    MissingCoordinates,
    OutsideRegion,
    ReprojectionFailed,
}

impl ExclusionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExclusionReason::MissingCoordinates => "missing_coordinates",
            ExclusionReason::OutsideRegion => "outside_region",
            ExclusionReason::ReprojectionFailed => "reprojection_failed",
        }
    }

    fn count(self, counts: &mut ExclusionCounts) {
        match self {
            ExclusionReason::MissingCoordinates => counts.missing_coordinates += 1,
            ExclusionReason::OutsideRegion => counts.outside_region += 1,
            ExclusionReason::ReprojectionFailed => counts.reprojection_failed += 1,
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projected point of a crash, or the reason it has none.
pub fn locate(
    x: Option<f64>,
    y: Option<f64>,
    bbox: &BoundingBox,
    projection: &Projection,
) -> std::result::Result<(f64, f64), ExclusionReason> {
    let (Some(x), Some(y)) = (x, y) else {
        return Err(ExclusionReason::MissingCoordinates);
    };
    if !x.is_finite() || !y.is_finite() {
        return Err(ExclusionReason::MissingCoordinates);
    }
    if !bbox.contains(x, y) {
        return Err(ExclusionReason::OutsideRegion);
    }
    projection
        .project(x, y)
        .ok_or(ExclusionReason::ReprojectionFailed)
}

/// Retained crashes and the exclusions recorded while filtering.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub retained: EntityFrame,
    /// Projected point of every retained crash, by `cid`.
    pub points: HashMap<i64, (f64, f64)>,
    /// Exclusions per source year.
    pub excluded: BTreeMap<i32, ExclusionCounts>,
    /// Retained crashes per source year.
    pub retained_by_year: BTreeMap<i32, u64>,
    /// Crashes with no source year. They are filtered like any other row
    /// but left out of the per-year counts.
    pub without_year: u64,
}

impl FilterOutcome {
    pub fn excluded_total(&self) -> u64 {
        self.excluded.values().map(ExclusionCounts::total).sum()
    }

    pub fn excluded_for(&self, year: i32) -> ExclusionCounts {
        self.excluded.get(&year).cloned().unwrap_or_default()
    }
}

fn require(frame: &EntityFrame, column: &str) -> Result<()> {
    if frame.data.column(column).is_err() {
        return Err(SpatialError::MissingColumn {
            column: column.to_string(),
        });
    }
    Ok(())
}

/// Drops crashes without a usable point and adds `proj_x`/`proj_y`.
pub fn filter_crashes(crashes: &EntityFrame, config: &SpatialConfig) -> Result<FilterOutcome> {
    let projection = Projection::for_srids(config.source_srid, config.target_srid)?;
    for column in [config.x_column.as_str(), config.y_column.as_str(), "cid", "case_id"] {
        require(crashes, column)?;
    }
    let xs = f64_column(&crashes.data, &config.x_column)?;
    let ys = f64_column(&crashes.data, &config.y_column)?;
    let cids = i64_column(&crashes.data, "cid")?;
    let case_ids = opt_string_column(&crashes.data, "case_id")?;
    let years = crashes.years()?;

    let mut keep = Vec::with_capacity(xs.len());
    let mut proj_x = Vec::new();
    let mut proj_y = Vec::new();
    let mut points = HashMap::new();
    let mut excluded: BTreeMap<i32, ExclusionCounts> = BTreeMap::new();
    let mut retained_by_year: BTreeMap<i32, u64> = BTreeMap::new();
    let mut without_year = 0u64;

    for row in 0..xs.len() {
        let year = years[row];
        if year.is_none() {
            without_year += 1;
        }
        match locate(xs[row], ys[row], &config.bbox, &projection) {
            Ok((px, py)) => {
                keep.push(true);
                proj_x.push(Some(px));
                proj_y.push(Some(py));
                if let Some(cid) = cids[row] {
                    points.insert(cid, (px, py));
                }
                if let Some(year) = year {
                    *retained_by_year.entry(year).or_insert(0) += 1;
                }
            }
            Err(reason) => {
                keep.push(false);
                if let Some(year) = year {
                    let counts = excluded.entry(year).or_default();
                    reason.count(counts);
                    counts
                        .case_ids
                        .push(case_ids[row].clone().unwrap_or_default());
                }
                debug!(
                    case_id = case_ids[row].as_deref().unwrap_or(""),
                    year = ?year,
                    reason = %reason,
                    "crash excluded from export"
                );
            }
        }
    }

    let mut data = filter_rows(&crashes.data, &keep)?;
    set_f64_column(&mut data, PROJ_X, proj_x)?;
    set_f64_column(&mut data, PROJ_Y, proj_y)?;

    let outcome = FilterOutcome {
        retained: EntityFrame::new(crashes.entity, data),
        points,
        excluded,
        retained_by_year,
        without_year,
    };
    if without_year > 0 {
        warn!(
            rows = without_year,
            "crashes without a source year are left out of the per-year counts"
        );
    }
    let excluded_total = outcome.excluded_total();
    if excluded_total > 0 {
        warn!(
            excluded = excluded_total,
            "crashes without a usable point were excluded"
        );
    }
    info!(
        retained = outcome.retained.record_count(),
        target_srid = projection.target_srid(),
        "spatial filter applied"
    );
    Ok(outcome)
}

/// Keeps the rows of `frame` whose crash was retained and attaches the
/// crash's projected point.
pub fn restrict_to_retained(frame: &EntityFrame, outcome: &FilterOutcome) -> Result<EntityFrame> {
    require(frame, "cid")?;
    let cids = i64_column(&frame.data, "cid")?;
    let located: Vec<Option<(f64, f64)>> = cids
        .iter()
        .map(|cid| cid.and_then(|c| outcome.points.get(&c).copied()))
        .collect();
    let keep: Vec<bool> = located.iter().map(Option::is_some).collect();
    let mut data = filter_rows(&frame.data, &keep)?;
    let kept: Vec<(f64, f64)> = located.into_iter().flatten().collect();
    set_f64_column(&mut data, PROJ_X, kept.iter().map(|p| Some(p.0)).collect())?;
    set_f64_column(&mut data, PROJ_Y, kept.iter().map(|p| Some(p.1)).collect())?;
    debug!(
        entity = %frame.entity,
        before = frame.record_count(),
        after = data.height(),
        "restricted to retained crashes"
    );
    Ok(EntityFrame::new(frame.entity, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oct_model::Entity;
    use polars::prelude::{DataFrame, IntoColumn, NamedFrom, Series};

    #[test]
    fn locate_orders_reasons() {
        let bbox = BoundingBox::default();
        let projection = Projection::WgsToWebMercator;
        assert_eq!(
            locate(None, Some(33.5), &bbox, &projection),
            Err(ExclusionReason::MissingCoordinates)
        );
        assert_eq!(
            locate(Some(f64::NAN), Some(33.5), &bbox, &projection),
            Err(ExclusionReason::MissingCoordinates)
        );
        assert_eq!(
            locate(Some(-120.0), Some(33.5), &bbox, &projection),
            Err(ExclusionReason::OutsideRegion)
        );
        assert!(locate(Some(-117.8), Some(33.6), &bbox, &projection).is_ok());
    }

    #[test]
    fn rows_without_a_year_are_not_counted_under_a_year() {
        let data = DataFrame::new(vec![
            Series::new("cid".into(), vec![0i64, 1, 2]).into_column(),
            Series::new("case_id".into(), vec!["A", "B", "C"]).into_column(),
            Series::new("year".into(), vec![Some(2020i64), None, None]).into_column(),
            Series::new("point_x".into(), vec![Some("-117.8"), Some("-117.9"), None]).into_column(),
            Series::new("point_y".into(), vec![Some("33.6"), Some("33.7"), None]).into_column(),
        ])
        .unwrap();
        let crashes = EntityFrame::new(Entity::Crashes, data);

        let outcome = filter_crashes(&crashes, &SpatialConfig::default()).unwrap();
        assert_eq!(outcome.retained.record_count(), 2);
        assert_eq!(outcome.without_year, 2);
        assert_eq!(outcome.retained_by_year.len(), 1);
        assert_eq!(outcome.retained_by_year.get(&2020), Some(&1));
        assert!(!outcome.retained_by_year.contains_key(&0));
        assert!(outcome.excluded.is_empty());
    }

    #[test]
    fn reprojection_failure_inside_a_wide_region() {
        let bbox = BoundingBox {
            xmin: -180.0,
            xmax: 180.0,
            ymin: -90.0,
            ymax: 90.0,
        };
        assert_eq!(
            locate(Some(0.0), Some(89.0), &bbox, &Projection::WgsToWebMercator),
            Err(ExclusionReason::ReprojectionFailed)
        );
    }
}
