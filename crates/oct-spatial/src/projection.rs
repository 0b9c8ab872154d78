//! Coordinate reprojection between the supported spatial references.

use crate::error::{Result, SpatialError};

pub const WGS84: u32 = 4326;
pub const WEB_MERCATOR: u32 = 3857;

/// Semi-major axis of the WGS84 ellipsoid, used as the sphere radius.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Identity { srid: u32 },
    WgsToWebMercator,
}

impl Projection {
    pub fn for_srids(source_srid: u32, target_srid: u32) -> Result<Self> {
        match (source_srid, target_srid) {
            (s, t) if s == t => Ok(Projection::Identity { srid: s }),
            (WGS84, WEB_MERCATOR) => Ok(Projection::WgsToWebMercator),
            _ => Err(SpatialError::UnsupportedProjection {
                source_srid,
                target_srid,
            }),
        }
    }

    pub fn target_srid(&self) -> u32 {
        match self {
            Projection::Identity { srid } => *srid,
            Projection::WgsToWebMercator => WEB_MERCATOR,
        }
    }

    /// Projects one point. `None` when the point cannot be represented.
    pub fn project(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            Projection::Identity { .. } => (x.is_finite() && y.is_finite()).then_some((x, y)),
            Projection::WgsToWebMercator => to_web_mercator(x, y),
        }
    }
}

/// Spherical Web Mercator (EPSG:3857) from longitude/latitude in degrees.
pub fn to_web_mercator(lon: f64, lat: f64) -> Option<(f64, f64)> {
    if !lon.is_finite() || !lat.is_finite() || lat.abs() > MAX_MERCATOR_LATITUDE {
        return None;
    }
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x.is_finite() && y.is_finite()).then_some((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_and_known_point() {
        let (x0, y0) = to_web_mercator(0.0, 0.0).unwrap();
        assert!(x0.abs() < 1e-6 && y0.abs() < 1e-6);
        // Irvine, CA.
        let (x, y) = to_web_mercator(-117.8265, 33.6846).unwrap();
        assert!((x - -13_116_386.0).abs() < 1.0, "x = {x}");
        assert!((y - 3_986_529.7).abs() < 1.0, "y = {y}");
    }

    #[test]
    fn latitude_limit_is_rejected() {
        assert!(to_web_mercator(10.0, 85.0).is_some());
        assert!(to_web_mercator(10.0, 85.1).is_none());
        assert!(to_web_mercator(f64::NAN, 10.0).is_none());
    }

    #[test]
    fn unsupported_pairs_fail() {
        assert_eq!(
            Projection::for_srids(4326, 3857).unwrap(),
            Projection::WgsToWebMercator
        );
        assert_eq!(
            Projection::for_srids(3857, 3857).unwrap().target_srid(),
            3857
        );
        assert!(Projection::for_srids(4269, 3857).is_err());
    }
}
