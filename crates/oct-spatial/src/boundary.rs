//! In-memory boundary index for city attribution.
//!
//! Boundary polygons are read from a GeoJSON FeatureCollection, indexed in
//! an R-tree by bounding box, and queried with an exact point-in-polygon
//! test. Boundaries may overlap; the smallest containing polygon wins.

use std::fs;
use std::path::Path;

use geo::{Area, BoundingRect, Contains, MultiPolygon, Point};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};
use tracing::{debug, info, warn};

use crate::error::{Result, SpatialError};

/// A boundary polygon stored in the R-tree with its name.
#[derive(Debug)]
struct BoundaryEntry {
    name: String,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for BoundaryEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Containing-boundary lookup in source coordinates.
#[derive(Debug)]
pub struct BoundaryIndex {
    tree: RTree<BoundaryEntry>,
}

impl BoundaryIndex {
    /// Builds an index from named polygons. Empty names are skipped.
    pub fn from_polygons(polygons: Vec<(String, MultiPolygon<f64>)>) -> Self {
        let entries: Vec<BoundaryEntry> = polygons
            .into_iter()
            .filter(|(name, _)| !name.trim().is_empty())
            .filter_map(|(name, polygon)| {
                let envelope = compute_envelope(&polygon)?;
                Some(BoundaryEntry {
                    name,
                    area: polygon.unsigned_area(),
                    envelope,
                    polygon,
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Loads a FeatureCollection whose features carry the boundary name in
    /// the `name_property` property.
    pub fn load(path: &Path, name_property: &str) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| SpatialError::io("read", path, e))?;
        let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| SpatialError::InvalidBoundary {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(SpatialError::InvalidBoundary {
                path: path.to_path_buf(),
                message: "expected a FeatureCollection".to_string(),
            });
        };

        let mut polygons = Vec::with_capacity(collection.features.len());
        for (idx, feature) in collection.features.into_iter().enumerate() {
            let name = feature
                .property(name_property)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let Some(name) = name else {
                warn!(feature = idx, property = name_property, "boundary feature has no name");
                continue;
            };
            let Some(geometry) = feature.geometry else {
                warn!(boundary = %name, "boundary feature has no geometry");
                continue;
            };
            let Some(polygon) = to_multipolygon(geometry) else {
                warn!(boundary = %name, "boundary geometry is not a polygon");
                continue;
            };
            polygons.push((name, polygon));
        }
        let index = Self::from_polygons(polygons);
        info!(path = %path.display(), boundaries = index.len(), "loaded boundary index");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Name of the smallest boundary containing the point.
    pub fn lookup(&self, x: f64, y: f64) -> Option<&str> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let point = Point::new(x, y);
        let query = AABB::from_point([x, y]);
        let mut best: Option<&BoundaryEntry> = None;
        for entry in self.tree.locate_in_envelope_intersecting(&query) {
            if entry.polygon.contains(&point) {
                match best {
                    None => best = Some(entry),
                    Some(current) if entry.area < current.area => best = Some(entry),
                    _ => {}
                }
            }
        }
        if best.is_none() {
            debug!(x, y, "no boundary contains point");
        }
        best.map(|e| e.name.as_str())
    }
}

fn to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geometry: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geometry {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}
