//! Pushbroom (linescan) sensor model.

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::math::{Vec2, Vec3};
use crate::sensors::project::{ls_project_with_pose, LinescanGeometry, LsPoseView};
use crate::tables::{PositionTable, QuaternionTable, LAGRANGE_ORDER};

/// Projection precision used everywhere; the capture-time search returns
/// junk at lower precision.
pub const DEFAULT_PROJECTION_PRECISION: f64 = 1e-8;

/// A linescan sensor: one image row per time step, pose tabulated on
/// uniform position and orientation grids.
#[derive(Debug, Clone, PartialEq)]
pub struct LinescanSensor {
    pub geometry: LinescanGeometry,
    pub positions: PositionTable,
    pub quaternions: QuaternionTable,
}

impl LinescanSensor {
    pub fn new(
        geometry: LinescanGeometry,
        positions: PositionTable,
        quaternions: QuaternionTable,
    ) -> Result<Self> {
        if positions.len() < LAGRANGE_ORDER || quaternions.len() < LAGRANGE_ORDER {
            return Err(Error::Setup(format!(
                "linescan pose tables need at least {LAGRANGE_ORDER} samples, got {} positions and {} quaternions",
                positions.len(),
                quaternions.len()
            )));
        }
        Ok(Self { geometry, positions, quaternions })
    }

    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn num_quaternions(&self) -> usize {
        self.quaternions.len()
    }

    /// Capture time of a pixel `(sample, line)`.
    pub fn image_time(&self, pixel: &Vec2) -> f64 {
        self.geometry.time_at_line(pixel.y)
    }

    /// Read-only pose view over the sensor's own tables.
    pub fn pose_view(&self) -> LsPoseView<'_, f64> {
        LsPoseView {
            pos_t0: self.positions.t0,
            pos_dt: self.positions.dt,
            base_positions: &self.positions.samples,
            live_positions: &[],
            pos_beg: 0,
            quat_t0: self.quaternions.t0,
            quat_dt: self.quaternions.dt,
            base_quaternions: &self.quaternions.samples,
            live_quaternions: &[],
            quat_beg: 0,
        }
    }

    /// Project a ground point into the image.
    pub fn ground_to_image(&self, ground: &Vec3, precision: f64) -> Result<Vec2> {
        let view = self.pose_view();
        ls_project_with_pose(&self.geometry, |t| view.pose_at(t), ground, precision)
    }

    /// Camera center at the capture time of `pixel`.
    pub fn camera_center(&self, pixel: &Vec2) -> Vec3 {
        self.positions.interpolate(self.image_time(pixel))
    }

    /// World-frame view direction through `pixel`.
    pub fn pixel_to_vector(&self, pixel: &Vec2) -> Vec3 {
        let time = self.image_time(pixel);
        let dir_cam = Vector3::new(
            (pixel.x - self.geometry.detector_origin) / self.geometry.focal_length,
            0.0,
            1.0,
        )
        .normalize();
        let view = self.pose_view();
        view.rotation_at(&time).transform_vector(&dir_cam)
    }

    /// Normalize all quaternion samples in place.
    pub fn normalize_quaternions(&mut self) {
        self.quaternions.normalize();
    }

    /// Resample the pose tables so that one position spans about
    /// `lines_per_position` image lines and one orientation about
    /// `lines_per_orientation` lines. Values of `None` leave the
    /// corresponding table as is.
    pub fn resample_pose_tables(
        &mut self,
        lines_per_position: Option<usize>,
        lines_per_orientation: Option<usize>,
    ) -> Result<()> {
        if let Some(lines) = lines_per_position {
            let num = self.resampled_count(lines)?;
            self.positions = self.positions.resample(num)?;
        }
        if let Some(lines) = lines_per_orientation {
            let num = self.resampled_count(lines)?;
            self.quaternions = self.quaternions.resample(num)?;
        }
        Ok(())
    }

    fn resampled_count(&self, lines_per_sample: usize) -> Result<usize> {
        if lines_per_sample == 0 {
            return Err(Error::Setup("lines per pose sample must be positive".to_string()));
        }
        let num = (self.geometry.num_lines as f64 / lines_per_sample as f64).ceil() as usize + 1;
        Ok(num.max(LAGRANGE_ORDER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec4;
    use approx::assert_relative_eq;

    /// A nadir-looking sensor moving along +x at constant height, with
    /// the camera z axis pointing down (-z world), the detector line
    /// across track (world y), and the focal-plane y axis along track.
    pub(crate) fn synthetic_sensor(num_pose: usize) -> LinescanSensor {
        let geometry = LinescanGeometry {
            num_lines: 1000,
            num_samples: 400,
            focal_length: 2000.0,
            detector_origin: 200.0,
            t0_line: 0.0,
            dt_line: 0.01,
        };
        // 180 degree rotation about (1, 1, 0)/sqrt(2): camera x maps to
        // world y, camera y to world x, camera z to world -z.
        let q_down = Vec4::new(
            std::f64::consts::FRAC_1_SQRT_2,
            std::f64::consts::FRAC_1_SQRT_2,
            0.0,
            0.0,
        );
        let t0 = -1.0;
        let dt = 12.0 / (num_pose - 1) as f64;
        let positions = PositionTable::new(
            t0,
            dt,
            (0..num_pose)
                .map(|i| Vec3::new(100.0 * (t0 + i as f64 * dt), 0.0, 5000.0))
                .collect(),
        )
        .unwrap();
        let quaternions =
            QuaternionTable::new(t0, dt, (0..num_pose).map(|_| q_down).collect()).unwrap();
        LinescanSensor::new(geometry, positions, quaternions).unwrap()
    }

    #[test]
    fn ground_to_image_roundtrip() {
        let sensor = synthetic_sensor(16);
        let pixel = Vec2::new(250.0, 480.0);
        let center = sensor.camera_center(&pixel);
        let dir = sensor.pixel_to_vector(&pixel);
        let ground = center + 5000.0 / dir.z.abs() * dir;

        let projected = sensor
            .ground_to_image(&ground, DEFAULT_PROJECTION_PRECISION)
            .unwrap();
        assert_relative_eq!(projected.x, pixel.x, epsilon = 1e-4);
        assert_relative_eq!(projected.y, pixel.y, epsilon = 1e-4);
    }

    #[test]
    fn image_time_is_linear_in_line() {
        let sensor = synthetic_sensor(16);
        assert_relative_eq!(sensor.image_time(&Vec2::new(10.0, 0.0)), 0.0);
        assert_relative_eq!(sensor.image_time(&Vec2::new(10.0, 500.0)), 5.0);
    }

    #[test]
    fn point_behind_sensor_fails_to_project() {
        let sensor = synthetic_sensor(16);
        let above = Vec3::new(0.0, 0.0, 9000.0);
        assert!(sensor
            .ground_to_image(&above, DEFAULT_PROJECTION_PRECISION)
            .is_err());
    }

    #[test]
    fn resampling_keeps_the_trajectory() {
        let mut sensor = synthetic_sensor(16);
        let before = sensor.positions.interpolate(3.0);
        sensor.resample_pose_tables(Some(50), Some(25)).unwrap();
        assert!(sensor.num_positions() >= 21);
        assert!(sensor.num_quaternions() >= 41);
        let after = sensor.positions.interpolate(3.0);
        assert_relative_eq!(before, after, epsilon = 1e-6);
    }
}
