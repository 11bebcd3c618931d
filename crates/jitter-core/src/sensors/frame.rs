//! Frame sensor model: one pose for the whole image.

use nalgebra::Vector3;

use crate::error::Result;
use crate::math::{Vec2, Vec3, Vec4};
use crate::sensors::project::{frame_ground_to_image, unit_quat_from_xyzw, FrameGeometry};

/// A frame sensor with a single position and orientation sample.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSensor {
    pub geometry: FrameGeometry,
    /// Camera center in ECEF.
    pub position: Vec3,
    /// Camera-to-world quaternion `[x, y, z, w]`.
    pub quaternion: Vec4,
    /// Capture time; orders cameras within an orbital group and anchors
    /// rig composition.
    pub time: f64,
}

impl FrameSensor {
    /// Capture time; the same for every pixel.
    pub fn image_time(&self, _pixel: &Vec2) -> f64 {
        self.time
    }

    /// Project a ground point into the image.
    pub fn ground_to_image(&self, ground: &Vec3) -> Result<Vec2> {
        frame_ground_to_image(&self.geometry, &self.position, &self.quaternion, ground)
    }

    pub fn camera_center(&self) -> Vec3 {
        self.position
    }

    /// World-frame view direction through `pixel`.
    pub fn pixel_to_vector(&self, pixel: &Vec2) -> Vec3 {
        let dir_cam = Vector3::new(
            (pixel.x - self.geometry.optical_center[0]) / self.geometry.focal_length,
            (pixel.y - self.geometry.optical_center[1]) / self.geometry.focal_length,
            1.0,
        )
        .normalize();
        unit_quat_from_xyzw(&self.quaternion).transform_vector(&dir_cam)
    }

    /// Normalize the quaternion in place.
    pub fn normalize_quaternion(&mut self) {
        let n = self.quaternion.norm();
        if n > 0.0 {
            self.quaternion /= n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nadir_frame() -> FrameSensor {
        FrameSensor {
            geometry: FrameGeometry {
                num_lines: 600,
                num_samples: 800,
                focal_length: 1500.0,
                optical_center: [400.0, 300.0],
            },
            position: Vec3::new(1000.0, 2000.0, 4000.0),
            // Looks along world -z.
            quaternion: Vec4::new(1.0, 0.0, 0.0, 0.0),
            time: 7.5,
        }
    }

    #[test]
    fn projection_roundtrip() {
        let sensor = nadir_frame();
        let pixel = Vec2::new(520.0, 210.0);
        let dir = sensor.pixel_to_vector(&pixel);
        let ground = sensor.position + 4000.0 / dir.z.abs() * dir;
        let projected = sensor.ground_to_image(&ground).unwrap();
        assert_relative_eq!(projected.x, pixel.x, epsilon = 1e-9);
        assert_relative_eq!(projected.y, pixel.y, epsilon = 1e-9);
    }

    #[test]
    fn point_behind_camera_fails() {
        let sensor = nadir_frame();
        assert!(sensor.ground_to_image(&Vec3::new(1000.0, 2000.0, 9000.0)).is_err());
    }
}
