//! Reporting structures: residual tables and displacement summaries.
//!
//! The engine never writes files; these types are serializable so a
//! caller can persist them however it likes.

use serde::{Deserialize, Serialize};

use jitter_core::math::Vec2;
use jitter_optim::problems::jitter::{observation_residual, JitterDataset};

/// Reprojection residual of one observation, in pixels, unweighted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelResidualRecord {
    pub camera: usize,
    pub pixel: [f64; 2],
    pub residual: [f64; 2],
    pub norm: f64,
    pub is_anchor: bool,
}

/// Displacement of one camera's center through the solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraOffset {
    pub camera: usize,
    pub initial_center: [f64; 3],
    pub final_center: [f64; 3],
    pub displacement: f64,
}

/// Displacement statistics of the triangulated points observed by one
/// camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriOffsetStats {
    pub camera: usize,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
}

/// Everything the driver hands back after a solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterReport {
    pub initial_residuals: Vec<PixelResidualRecord>,
    pub final_residuals: Vec<PixelResidualRecord>,
    pub camera_offsets: Vec<CameraOffset>,
    pub tri_offsets: Vec<TriOffsetStats>,
    pub final_cost: f64,
}

/// Residuals of every usable observation against the dataset's current
/// state.
pub fn pixel_residuals(dataset: &JitterDataset) -> Vec<PixelResidualRecord> {
    dataset
        .network
        .observations
        .iter()
        .filter_map(|obs| {
            let residual = observation_residual(dataset, obs)?;
            Some(PixelResidualRecord {
                camera: obs.camera,
                pixel: [obs.pixel.x, obs.pixel.y],
                residual: [residual.x, residual.y],
                norm: residual.norm(),
                is_anchor: obs.is_anchor,
            })
        })
        .collect()
}

/// Camera center used for displacement reporting: the center pixel of
/// the image.
pub fn reference_center(sensor: &jitter_core::sensors::Sensor) -> jitter_core::math::Vec3 {
    let (num_samples, num_lines) = sensor.image_size();
    let pixel = Vec2::new(num_samples as f64 / 2.0, num_lines as f64 / 2.0);
    sensor.camera_center(&pixel)
}
