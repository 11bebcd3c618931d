//! Coupling resolver: which pose samples can affect a pixel.
//!
//! A linescan pixel is evaluated by Lagrange-interpolating eight
//! contiguous samples of each pose table around the pixel's capture
//! time. During optimization the pixel's time can shift by up to the
//! initial reprojection error, so the pixel is first expanded by a line
//! buffer before bracketing. The resolver enumerates exactly the index
//! ranges whose stencils the bracket can reach; a residual is then wired
//! to those blocks and no others.

use jitter_core::error::{Error, Result};
use jitter_core::math::Vec2;
use jitter_core::sensors::LinescanSensor;
use jitter_core::tables::LAGRANGE_ORDER;

/// Half-open index ranges of the position and quaternion samples a
/// residual couples to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouplingWindow {
    pub beg_pos: usize,
    pub end_pos: usize,
    pub beg_quat: usize,
    pub end_quat: usize,
}

impl CouplingWindow {
    pub fn num_pos(&self) -> usize {
        self.end_pos - self.beg_pos
    }

    pub fn num_quat(&self) -> usize {
        self.end_quat - self.beg_quat
    }
}

/// Index range of samples needed to interpolate anywhere between `time1`
/// and `time2` on a grid `(t0, dt)` with `num_vals` samples.
///
/// The widening is the Lagrange half-stencil and is deliberately
/// asymmetric, `-3` below and `+5` above the bracketing indices,
/// matching the interpolator's stencil choice. An empty window after
/// clamping means the image and camera bookkeeping disagree, which is a
/// setup bug rather than a data problem.
pub fn calc_index_bounds(
    time1: f64,
    time2: f64,
    t0: f64,
    dt: f64,
    num_vals: usize,
) -> Result<(usize, usize)> {
    let index1 = ((time1 - t0) / dt).floor() as i64;
    let index2 = ((time2 - t0) / dt).floor() as i64;

    let half = (LAGRANGE_ORDER / 2) as i64;
    let beg = index1.min(index2) - half + 1;
    let end = index1.max(index2) + half + 1;

    let beg = beg.max(0);
    let end = end.min(num_vals as i64);
    if beg >= end {
        return Err(Error::Indexing(
            "empty interpolation window; likely image order differs from camera order".to_string(),
        ));
    }
    Ok((beg as usize, end as usize))
}

/// Coupling window of a linescan pixel observation, expanded by
/// `line_buffer` lines up and down.
pub fn resolve_ls_window(
    sensor: &LinescanSensor,
    pixel: &Vec2,
    line_buffer: f64,
) -> Result<CouplingWindow> {
    let time1 = sensor.image_time(&Vec2::new(pixel.x, pixel.y - line_buffer));
    let time2 = sensor.image_time(&Vec2::new(pixel.x, pixel.y + line_buffer));
    resolve_time_window(sensor, time1, time2)
}

/// Coupling window of a time bracket on a linescan sensor's grids. Used
/// directly by the rig bridge, where the bracket comes from a child
/// sensor's capture times.
pub fn resolve_time_window(
    sensor: &LinescanSensor,
    time1: f64,
    time2: f64,
) -> Result<CouplingWindow> {
    let (beg_quat, end_quat) = calc_index_bounds(
        time1,
        time2,
        sensor.quaternions.t0,
        sensor.quaternions.dt,
        sensor.num_quaternions(),
    )?;
    let (beg_pos, end_pos) = calc_index_bounds(
        time1,
        time2,
        sensor.positions.t0,
        sensor.positions.dt,
        sensor.num_positions(),
    )?;
    Ok(CouplingWindow { beg_pos, end_pos, beg_quat, end_quat })
}
