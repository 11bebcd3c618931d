//! Ground-to-image projection, generic over the scalar type.
//!
//! The functions here are written against [`RealField`] so the optimizer
//! can evaluate residuals with dual numbers. Pose samples enter through
//! [`LsPoseView`], which overlays a live window of optimization variables
//! on the sensor's frozen tables; everything else (timing, intrinsics)
//! stays `f64` data.

use nalgebra::{Quaternion, RealField, UnitQuaternion, Vector2, Vector3, Vector4};

use crate::error::{Error, Result};
use crate::tables::interp_mixed;

/// Geometry of a linescan image: dimensions, optics, and line timing.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinescanGeometry {
    pub num_lines: usize,
    pub num_samples: usize,
    /// Focal length in pixel units.
    pub focal_length: f64,
    /// Sample coordinate of the optical axis on the detector line.
    pub detector_origin: f64,
    /// Capture time of line 0.
    pub t0_line: f64,
    /// Time between consecutive lines.
    pub dt_line: f64,
}

impl LinescanGeometry {
    /// Capture time of a (possibly fractional) image line.
    pub fn time_at_line(&self, line: f64) -> f64 {
        self.t0_line + line * self.dt_line
    }

    /// Image line captured at `time`.
    pub fn line_at_time(&self, time: f64) -> f64 {
        (time - self.t0_line) / self.dt_line
    }
}

/// Geometry of a frame image: dimensions and pinhole optics.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameGeometry {
    pub num_lines: usize,
    pub num_samples: usize,
    /// Focal length in pixel units.
    pub focal_length: f64,
    /// Principal point `(sample, line)`.
    pub optical_center: [f64; 2],
}

/// View of a linescan pose with a live parameter window overlaid.
///
/// Samples in `[pos_beg, pos_beg + live_positions.len())` come from
/// `live_positions` (current optimization variables); the rest from the
/// frozen `base` tables. Same for quaternions. With empty live slices
/// this is a plain read of the tables.
pub struct LsPoseView<'a, T: RealField> {
    pub pos_t0: f64,
    pub pos_dt: f64,
    pub base_positions: &'a [Vector3<f64>],
    pub live_positions: &'a [Vector3<T>],
    pub pos_beg: usize,
    pub quat_t0: f64,
    pub quat_dt: f64,
    pub base_quaternions: &'a [Vector4<f64>],
    pub live_quaternions: &'a [Vector4<T>],
    pub quat_beg: usize,
}

impl<T: RealField> LsPoseView<'_, T> {
    /// Interpolated camera center at `time`.
    pub fn position_at(&self, time: &T) -> Vector3<T> {
        interp_mixed(
            self.pos_t0,
            self.pos_dt,
            self.base_positions,
            self.live_positions,
            self.pos_beg,
            time,
        )
    }

    /// Interpolated camera-to-world rotation at `time`.
    pub fn rotation_at(&self, time: &T) -> UnitQuaternion<T> {
        let q: Vector4<T> = interp_mixed(
            self.quat_t0,
            self.quat_dt,
            self.base_quaternions,
            self.live_quaternions,
            self.quat_beg,
            time,
        );
        unit_quat_from_xyzw(&q)
    }

    /// Full pose at `time`.
    pub fn pose_at(&self, time: &T) -> (Vector3<T>, UnitQuaternion<T>) {
        (self.position_at(time), self.rotation_at(time))
    }
}

/// Build a (normalizing) rotation from a raw `[x, y, z, w]` vector.
pub fn unit_quat_from_xyzw<T: RealField>(q: &Vector4<T>) -> UnitQuaternion<T> {
    UnitQuaternion::from_quaternion(Quaternion::new(
        q[3].clone(),
        q[0].clone(),
        q[1].clone(),
        q[2].clone(),
    ))
}

fn depth_guard<T: RealField>(z: &T) -> Result<()> {
    if *z <= T::from_f64(1e-8).unwrap() {
        return Err(Error::Projection("point behind the focal plane".to_string()));
    }
    Ok(())
}

/// Project a ground point through an explicit frame camera pose.
pub fn frame_project_with_pose<T: RealField>(
    geom: &FrameGeometry,
    center: &Vector3<T>,
    rotation: &UnitQuaternion<T>,
    ground: &Vector3<T>,
) -> Result<Vector2<T>> {
    let cam = rotation.inverse_transform_vector(&(ground - center));
    depth_guard(&cam.z)?;
    let f = T::from_f64(geom.focal_length).unwrap();
    let u = f.clone() * cam.x.clone() / cam.z.clone() + T::from_f64(geom.optical_center[0]).unwrap();
    let v = f * cam.y.clone() / cam.z.clone() + T::from_f64(geom.optical_center[1]).unwrap();
    Ok(Vector2::new(u, v))
}

/// Project a ground point through a frame camera pose given as a raw
/// `[x, y, z, w]` quaternion.
pub fn frame_ground_to_image<T: RealField>(
    geom: &FrameGeometry,
    position: &Vector3<T>,
    quaternion: &Vector4<T>,
    ground: &Vector3<T>,
) -> Result<Vector2<T>> {
    frame_project_with_pose(geom, position, &unit_quat_from_xyzw(quaternion), ground)
}

/// Maximum Newton iterations when solving for the capture time.
const MAX_TIME_ITERATIONS: usize = 50;

/// Project a ground point through a linescan camera whose pose at time
/// `t` is produced by `pose_at`.
///
/// Solves for the capture time at which the point crosses the detector
/// line (focal-plane y goes to zero) by Newton iteration with a
/// finite-difference slope, then maps to `(sample, line)`. `precision`
/// is the convergence tolerance in line units; anything looser than
/// `1e-8` yields meaningless output downstream, so callers pass that.
pub fn ls_project_with_pose<T, F>(
    geom: &LinescanGeometry,
    pose_at: F,
    ground: &Vector3<T>,
    precision: f64,
) -> Result<Vector2<T>>
where
    T: RealField,
    F: Fn(&T) -> (Vector3<T>, UnitQuaternion<T>),
{
    let focal = T::from_f64(geom.focal_length).unwrap();

    // Focal-plane y coordinate in pixels, as a function of time.
    let y_pix = |t: &T| -> Result<T> {
        let (center, rot) = pose_at(t);
        let cam = rot.inverse_transform_vector(&(ground - center));
        depth_guard(&cam.z)?;
        Ok(focal.clone() * cam.y.clone() / cam.z.clone())
    };

    let h = T::from_f64(geom.dt_line).unwrap();
    let tol = T::from_f64(precision * geom.dt_line.abs()).unwrap();
    let mut t = T::from_f64(geom.time_at_line(0.5 * geom.num_lines as f64)).unwrap();

    let mut converged = false;
    for _ in 0..MAX_TIME_ITERATIONS {
        let y0 = y_pix(&t)?;
        let y1 = y_pix(&(t.clone() + h.clone()))?;
        let slope = (y1 - y0.clone()) / h.clone();
        if slope.clone().abs() < T::from_f64(1e-20).unwrap() {
            return Err(Error::Projection("degenerate linescan geometry".to_string()));
        }
        let step = y0 / slope;
        t -= step.clone();
        if step.abs() < tol {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(Error::Projection(format!(
            "capture-time search did not reach precision {precision}"
        )));
    }

    let (center, rot) = pose_at(&t);
    let cam = rot.inverse_transform_vector(&(ground - center));
    depth_guard(&cam.z)?;
    let sample =
        focal * cam.x.clone() / cam.z.clone() + T::from_f64(geom.detector_origin).unwrap();
    let line = (t - T::from_f64(geom.t0_line).unwrap()) / T::from_f64(geom.dt_line).unwrap();
    Ok(Vector2::new(sample, line))
}
