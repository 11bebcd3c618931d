//! Reference-surface contracts and ray intersection.
//!
//! The engine never reads rasters; it consumes a digital elevation model
//! through the [`DemSurface`] trait and per-point weights through
//! [`WeightImage`]. Synthetic implementations back the tests.

use crate::math::{Datum, Vec3};

/// A sampled reference surface over a datum.
pub trait DemSurface {
    fn datum(&self) -> &Datum;

    /// Height above the ellipsoid at `(lon_deg, lat_deg)`, or `None`
    /// where the surface has no data.
    fn sample(&self, lon_deg: f64, lat_deg: f64) -> Option<f64>;
}

/// Per-location weights looked up by ground position.
pub trait WeightImage {
    /// Weight at the pixel closest to `xyz`, or `None` outside coverage.
    fn closest_value(&self, xyz: &Vec3) -> Option<f64>;
}

/// A constant-height surface; the simplest useful [`DemSurface`].
#[derive(Debug, Clone, Copy)]
pub struct ConstantDem {
    pub datum: Datum,
    pub height: f64,
}

impl DemSurface for ConstantDem {
    fn datum(&self) -> &Datum {
        &self.datum
    }

    fn sample(&self, _lon_deg: f64, _lat_deg: f64) -> Option<f64> {
        Some(self.height)
    }
}

/// A constant weight everywhere; useful for tests.
#[derive(Debug, Clone, Copy)]
pub struct ConstantWeight(pub f64);

impl WeightImage for ConstantWeight {
    fn closest_value(&self, _xyz: &Vec3) -> Option<f64> {
        Some(self.0)
    }
}

/// Move a point vertically onto the DEM surface: keep its longitude and
/// latitude, replace its height with the DEM height.
pub fn dem_xyz_at_point(dem: &dyn DemSurface, xyz: &Vec3) -> Option<Vec3> {
    let (lon, lat, _height) = dem.datum().ecef_to_geodetic(xyz);
    let dem_height = dem.sample(lon, lat)?;
    Some(dem.datum().geodetic_to_ecef(lon, lat, dem_height))
}

/// Height tolerance of the ray/DEM intersection, in meters.
pub const DEM_INTERSECTION_HEIGHT_TOL: f64 = 0.001;
/// Iteration cap of the ray/DEM intersection.
pub const DEM_INTERSECTION_MAX_ITER: usize = 50;

/// Intersect the ray `center + s * dir` with the DEM by Newton iteration
/// on the height misfit. Returns `None` when the ray misses the surface
/// or the iteration does not reach the 1 mm height tolerance.
pub fn ray_dem_intersection(center: &Vec3, dir: &Vec3, dem: &dyn DemSurface) -> Option<Vec3> {
    let datum = dem.datum();
    let dir = dir.normalize();

    // Start at the range where the ray reaches the datum's mean radius.
    let radius = 0.5 * (datum.semi_major + datum.semi_minor);
    let b = center.dot(&dir);
    let c = center.norm_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let mut s = -b - disc.sqrt();
    if s < 0.0 {
        return None;
    }

    let misfit = |s: f64| -> Option<f64> {
        let p = center + s * dir;
        let (lon, lat, height) = datum.ecef_to_geodetic(&p);
        Some(height - dem.sample(lon, lat)?)
    };

    let ds = 1.0;
    for _ in 0..DEM_INTERSECTION_MAX_ITER {
        let f0 = misfit(s)?;
        if f0.abs() < DEM_INTERSECTION_HEIGHT_TOL {
            return Some(center + s * dir);
        }
        let f1 = misfit(s + ds)?;
        let slope = (f1 - f0) / ds;
        if slope.abs() < 1e-12 {
            return None;
        }
        s -= f0 / slope;
        if s < 0.0 {
            return None;
        }
    }
    None
}
