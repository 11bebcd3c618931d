//! Sensor models and the uniform sensor facade.
//!
//! Two concrete sensor variants are enough for jitter solving: a
//! linescan sensor with tabulated poses and a frame sensor with a single
//! pose. A tagged enum keeps the dispatch explicit and the residual
//! factories simple; there is no deeper hierarchy to maintain.

pub mod frame;
pub mod linescan;
pub mod project;

pub use frame::FrameSensor;
pub use linescan::{LinescanSensor, DEFAULT_PROJECTION_PRECISION};
pub use project::{
    frame_ground_to_image, frame_project_with_pose, ls_project_with_pose, unit_quat_from_xyzw,
    FrameGeometry, LinescanGeometry, LsPoseView,
};

use crate::error::Result;
use crate::math::{Vec2, Vec3};

/// A camera participating in the solve.
#[derive(Debug, Clone, PartialEq)]
pub enum Sensor {
    Linescan(LinescanSensor),
    Frame(FrameSensor),
}

impl Sensor {
    /// Capture time of a pixel.
    pub fn image_time(&self, pixel: &Vec2) -> f64 {
        match self {
            Sensor::Linescan(s) => s.image_time(pixel),
            Sensor::Frame(s) => s.image_time(pixel),
        }
    }

    /// Project a ground point into the image.
    pub fn ground_to_image(&self, ground: &Vec3, precision: f64) -> Result<Vec2> {
        match self {
            Sensor::Linescan(s) => s.ground_to_image(ground, precision),
            Sensor::Frame(s) => s.ground_to_image(ground),
        }
    }

    /// Camera center for the capture time of `pixel`.
    pub fn camera_center(&self, pixel: &Vec2) -> Vec3 {
        match self {
            Sensor::Linescan(s) => s.camera_center(pixel),
            Sensor::Frame(s) => s.camera_center(),
        }
    }

    /// World-frame view direction through `pixel`.
    pub fn pixel_to_vector(&self, pixel: &Vec2) -> Vec3 {
        match self {
            Sensor::Linescan(s) => s.pixel_to_vector(pixel),
            Sensor::Frame(s) => s.pixel_to_vector(pixel),
        }
    }

    /// Image dimensions as `(num_samples, num_lines)`.
    pub fn image_size(&self) -> (usize, usize) {
        match self {
            Sensor::Linescan(s) => (s.geometry.num_samples, s.geometry.num_lines),
            Sensor::Frame(s) => (s.geometry.num_samples, s.geometry.num_lines),
        }
    }

    /// Whether `pixel` lies inside the image bounds.
    pub fn contains_pixel(&self, pixel: &Vec2) -> bool {
        let (samples, lines) = self.image_size();
        pixel.x >= 0.0
            && pixel.y >= 0.0
            && pixel.x <= (samples - 1) as f64
            && pixel.y <= (lines - 1) as f64
    }

    /// Whether residual evaluation over this sensor may run on multiple
    /// threads. Both in-repo models are plain data, so this always holds;
    /// an adapter over a non-reentrant external model would return false
    /// and the driver would pin the solver to one thread.
    pub fn thread_safe(&self) -> bool {
        true
    }

    pub fn as_linescan(&self) -> Option<&LinescanSensor> {
        match self {
            Sensor::Linescan(s) => Some(s),
            Sensor::Frame(_) => None,
        }
    }

    pub fn as_frame(&self) -> Option<&FrameSensor> {
        match self {
            Sensor::Frame(s) => Some(s),
            Sensor::Linescan(_) => None,
        }
    }

    pub fn is_linescan(&self) -> bool {
        matches!(self, Sensor::Linescan(_))
    }
}
