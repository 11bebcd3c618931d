//! Ellipsoidal datum, coordinate conversions, and the local orbital triad.
//!
//! The roll/yaw constraint measures camera orientation against the
//! along-track / across-track / down triad of the orbit. That triad is
//! derived in projected coordinates (longitude, latitude, height above
//! the ellipsoid) and converted back to ECEF directions by finite
//! differences, mirroring how the cameras were laid out along the orbit
//! in the first place.

use nalgebra::{RealField, Rotation3};

use crate::math::{Mat3, Vec3};

/// Reference ellipsoid with semi-major and semi-minor axes in meters.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Datum {
    pub semi_major: f64,
    pub semi_minor: f64,
}

impl Datum {
    /// WGS84 ellipsoid.
    pub const WGS84: Datum = Datum {
        semi_major: 6_378_137.0,
        semi_minor: 6_356_752.314_245,
    };

    /// Spherical lunar datum.
    pub const MOON: Datum = Datum {
        semi_major: 1_737_400.0,
        semi_minor: 1_737_400.0,
    };

    /// Squared first eccentricity.
    fn e2(&self) -> f64 {
        let a2 = self.semi_major * self.semi_major;
        let b2 = self.semi_minor * self.semi_minor;
        (a2 - b2) / a2
    }

    /// Convert geodetic coordinates (degrees, degrees, meters) to ECEF.
    pub fn geodetic_to_ecef(&self, lon_deg: f64, lat_deg: f64, height: f64) -> Vec3 {
        let lon = lon_deg.to_radians();
        let lat = lat_deg.to_radians();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let n = self.semi_major / (1.0 - self.e2() * sin_lat * sin_lat).sqrt();
        Vec3::new(
            (n + height) * cos_lat * lon.cos(),
            (n + height) * cos_lat * lon.sin(),
            (n * (1.0 - self.e2()) + height) * sin_lat,
        )
    }

    /// Convert ECEF to geodetic `(lon_deg, lat_deg, height)`.
    ///
    /// Fixed-point iteration on the latitude; converges to well below a
    /// millimeter in a handful of rounds for orbital geometries.
    pub fn ecef_to_geodetic(&self, xyz: &Vec3) -> (f64, f64, f64) {
        let lon = xyz.y.atan2(xyz.x);
        let p = (xyz.x * xyz.x + xyz.y * xyz.y).sqrt();
        let e2 = self.e2();

        let mut lat = (xyz.z / (p * (1.0 - e2)).max(f64::MIN_POSITIVE)).atan();
        let mut height = 0.0;
        for _ in 0..10 {
            let sin_lat = lat.sin();
            let n = self.semi_major / (1.0 - e2 * sin_lat * sin_lat).sqrt();
            height = if lat.cos().abs() > 1e-12 {
                p / lat.cos() - n
            } else {
                xyz.z.abs() - self.semi_minor
            };
            lat = (xyz.z / (p * (1.0 - e2 * n / (n + height)))).atan();
        }
        (lon.to_degrees(), lat.to_degrees(), height)
    }

    /// ECEF to projected coordinates `(lon_deg, lat_deg, height)`.
    pub fn ecef_to_proj(&self, xyz: &Vec3) -> Vec3 {
        let (lon, lat, height) = self.ecef_to_geodetic(xyz);
        Vec3::new(lon, lat, height)
    }

    /// Projected coordinates `(lon_deg, lat_deg, height)` to ECEF.
    pub fn proj_to_ecef(&self, proj: &Vec3) -> Vec3 {
        self.geodetic_to_ecef(proj.x, proj.y, proj.z)
    }
}

/// Finite-difference step, in projected coordinates, used to turn
/// projected-space directions into ECEF directions.
pub const PROJ_DELTA: f64 = 1.0e-6;

/// Along and across-track directions of an orbital segment in projected
/// coordinates. The across direction is horizontal, perpendicular to the
/// along direction.
pub fn calc_proj_along_across(beg_proj: &Vec3, end_proj: &Vec3) -> (Vec3, Vec3) {
    let along = (end_proj - beg_proj).normalize();
    let across = along.cross(&Vec3::z()).normalize();
    (along, across)
}

/// Convert projected-space along/across directions at `cur_proj` into
/// ECEF directions by stepping `PROJ_DELTA` in projected space.
pub fn calc_ecef_along_across(
    datum: &Datum,
    proj_along: &Vec3,
    proj_across: &Vec3,
    cur_proj: &Vec3,
) -> (Vec3, Vec3) {
    let cur = datum.proj_to_ecef(cur_proj);
    let along = (datum.proj_to_ecef(&(cur_proj + PROJ_DELTA * proj_along)) - cur).normalize();
    let mut across = (datum.proj_to_ecef(&(cur_proj + PROJ_DELTA * proj_across)) - cur).normalize();
    // Remove any leakage of the along direction from the across one
    across = (across - across.dot(&along) * along).normalize();
    (along, across)
}

/// Rotation from the satellite body frame to ECEF, with the along,
/// across, and down directions as columns.
pub fn assemble_cam2world(along: &Vec3, across: &Vec3, down: &Vec3) -> Mat3 {
    Mat3::from_columns(&[*along, *across, *down])
}

/// The fixed 90-degree in-plane rotation between the satellite frame and
/// the camera frame, with the detector line across-track.
pub fn rotation_xy() -> Mat3 {
    Mat3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0)
}

/// Extract roll, pitch, yaw in degrees from a rotation matrix.
pub fn roll_pitch_yaw_degrees(m: &Mat3) -> (f64, f64, f64) {
    let (roll, pitch, yaw) = Rotation3::from_matrix_unchecked(*m).euler_angles();
    (roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
}

/// Resolve an angle in degrees modulo 180 to the representative closest
/// to zero. Roll and yaw extracted from a factored rotation carry a
/// +/-180 degree branch ambiguity that must not leak into residuals.
pub fn wrap_180<T: RealField>(angle_deg: T) -> T {
    let half_turn = T::from_f64(180.0).unwrap();
    angle_deg.clone() - half_turn.clone() * (angle_deg / half_turn).round()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn geodetic_roundtrip() {
        let datum = Datum::WGS84;
        let xyz = datum.geodetic_to_ecef(12.5, -33.25, 512.0);
        let (lon, lat, height) = datum.ecef_to_geodetic(&xyz);
        assert_relative_eq!(lon, 12.5, epsilon = 1e-9);
        assert_relative_eq!(lat, -33.25, epsilon = 1e-9);
        assert_relative_eq!(height, 512.0, epsilon = 1e-4);
    }

    #[test]
    fn wrap_180_picks_branch_near_zero() {
        // A raw decomposition of 179.9 degrees must become -0.1, not stay
        // at 179.9.
        assert_relative_eq!(wrap_180(179.9), -0.1, epsilon = 1e-12);
        assert_relative_eq!(wrap_180(-179.9), 0.1, epsilon = 1e-12);
        assert_relative_eq!(wrap_180(0.05), 0.05, epsilon = 1e-12);
        assert_relative_eq!(wrap_180(360.2), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn triad_is_orthonormal() {
        let datum = Datum::WGS84;
        let beg = datum.geodetic_to_ecef(10.0, 20.0, 500_000.0);
        let end = datum.geodetic_to_ecef(10.0, 20.5, 500_000.0);
        let beg_proj = datum.ecef_to_proj(&beg);
        let end_proj = datum.ecef_to_proj(&end);
        let (proj_along, proj_across) = calc_proj_along_across(&beg_proj, &end_proj);
        let (along, across) = calc_ecef_along_across(&datum, &proj_along, &proj_across, &beg_proj);
        assert_relative_eq!(along.norm(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(across.norm(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(along.dot(&across), 0.0, epsilon = 1e-9);
    }
}
