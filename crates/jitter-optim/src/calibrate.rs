//! Statistics that scale the soft constraints.
//!
//! The camera-position prior must not drown out image evidence, so its
//! strength is calibrated from the reprojection residuals themselves:
//! per camera, the count and median of the per-observation weights, and
//! the ground sample distance that converts metric drift into
//! pixel-equivalent units.

use jitter_core::math::{Vec2, Vec3};
use jitter_core::network::ControlNetwork;
use jitter_core::sensors::Sensor;

/// Median that is allowed to reorder its input in place. Outlier-robust,
/// and cheaper than a full sort.
pub fn destructive_median(values: &mut [f64]) -> f64 {
    assert!(!values.is_empty(), "median of an empty slice");
    let mid = values.len() / 2;
    let (_, median, _) =
        values.select_nth_unstable_by(mid, |a, b| a.partial_cmp(b).expect("NaN weight"));
    *median
}

/// Ground sample distance at an observation, in meters per pixel.
///
/// Estimated from the divergence of the rays through the pixel and a
/// one-pixel neighbor, at the range of the observed ground point.
/// Returns `None` when the geometry is degenerate; the caller skips the
/// contribution.
pub fn estimated_gsd(sensor: &Sensor, pixel: &Vec2, ground: &Vec3) -> Option<f64> {
    let (num_samples, _) = sensor.image_size();
    let step = if pixel.x + 1.0 <= (num_samples - 1) as f64 { 1.0 } else { -1.0 };
    let neighbor = Vec2::new(pixel.x + step, pixel.y);

    let center = sensor.camera_center(pixel);
    let dir1 = sensor.pixel_to_vector(pixel).normalize();
    let dir2 = sensor.pixel_to_vector(&neighbor).normalize();

    let depth = (ground - center).norm();
    let angle = dir1.dot(&dir2).clamp(-1.0, 1.0).acos();
    let gsd = depth * angle;
    if !gsd.is_finite() || gsd <= 0.0 {
        return None;
    }
    Some(gsd)
}

/// Mean GSD per triangulated point over its non-outlier observations.
/// Zero marks points whose GSD could not be estimated.
pub fn estimate_gsd_per_point(sensors: &[Sensor], network: &ControlNetwork) -> Vec<f64> {
    let mut sums = vec![0.0; network.num_points()];
    let mut counts = vec![0usize; network.num_points()];
    for obs in &network.observations {
        if network.is_outlier(obs.point) {
            continue;
        }
        let ground = network.points[obs.point].xyz;
        if let Some(gsd) = estimated_gsd(&sensors[obs.camera], &obs.pixel, &ground) {
            sums[obs.point] += gsd;
            counts[obs.point] += 1;
        }
    }
    sums.iter()
        .zip(&counts)
        .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even_slices() {
        let mut odd = vec![5.0, 1.0, 9.0];
        assert_eq!(destructive_median(&mut odd), 5.0);

        let mut even = vec![4.0, 1.0, 9.0, 5.0];
        // Upper median for even length.
        assert_eq!(destructive_median(&mut even), 5.0);
    }

    #[test]
    fn median_resists_outliers() {
        let mut values = vec![1.0, 1.1, 0.9, 1.05, 1e6];
        assert!(destructive_median(&mut values) < 2.0);
    }
}
