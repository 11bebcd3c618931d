//! Roll/yaw constraint against the along-track direction.
//!
//! The initial camera-to-world rotation factors as
//! `sat2world * rollPitchYaw * rotXY`, where `sat2world` comes from the
//! local along/across/down triad and `rotXY` is the fixed 90-degree
//! in-plane rotation. The residual extracts the roll and yaw of the
//! variable `rollPitchYaw` factor; pitch stays free because pitch is how
//! a pushbroom sensor scans.

use nalgebra::{DVector, Matrix3, RealField, Rotation3, SVector};

use jitter_core::error::{Error, Result};
use jitter_core::math::{
    assemble_cam2world, calc_ecef_along_across, calc_proj_along_across, rotation_xy, wrap_180,
    Datum, Mat3, Vec3, Vec4,
};
use jitter_core::sensors::unit_quat_from_xyzw;

/// Fixed setup data of one roll/yaw residual, captured at wiring time
/// from the initial trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollYawContext {
    pub sat2world: [[f64; 3]; 3],
    pub rot_xy: [[f64; 3]; 3],
    pub init_cam2world: [[f64; 3]; 3],
}

fn mat_to_rows(m: &Mat3) -> [[f64; 3]; 3] {
    let mut rows = [[0.0; 3]; 3];
    for (i, row) in rows.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = m[(i, j)];
        }
    }
    rows
}

fn rows_to_mat<T: RealField>(rows: &[[f64; 3]; 3]) -> Matrix3<T> {
    Matrix3::from_fn(|i, j| T::from_f64(rows[i][j]).unwrap())
}

impl RollYawContext {
    /// Derive the triad at sample `cur` of a trajectory given by
    /// one-to-one `positions` and `quaternions`.
    ///
    /// The along-track direction comes from the projected-coordinate
    /// neighbors of `cur`; a trajectory with fewer than two distinct
    /// neighbors cannot define it and the caller skips the constraint.
    pub fn new(
        positions: &[Vec3],
        quaternions: &[Vec4],
        datum: &Datum,
        cur: usize,
    ) -> Result<Self> {
        let num = positions.len();
        if num != quaternions.len() {
            return Err(Error::Setup(format!(
                "roll/yaw constraint expects matching position and quaternion counts, got {num} and {}",
                quaternions.len()
            )));
        }
        if cur >= num {
            return Err(Error::Setup(format!("trajectory sample {cur} out of range {num}")));
        }
        let beg = cur.saturating_sub(1);
        let end = (num - 1).min(cur + 1);
        if beg >= end {
            return Err(Error::Setup(
                "roll/yaw constraint needs at least two trajectory samples".to_string(),
            ));
        }

        let beg_proj = datum.ecef_to_proj(&positions[beg]);
        let cur_proj = datum.ecef_to_proj(&positions[cur]);
        let end_proj = datum.ecef_to_proj(&positions[end]);

        let (proj_along, proj_across) = calc_proj_along_across(&beg_proj, &end_proj);
        let (along, across) = calc_ecef_along_across(datum, &proj_along, &proj_across, &cur_proj);
        let down = along.cross(&across).normalize();

        let sat2world = assemble_cam2world(&along, &across, &down);
        let init_cam2world = unit_quat_from_xyzw(&quaternions[cur])
            .to_rotation_matrix()
            .into_inner();

        Ok(Self {
            sat2world: mat_to_rows(&sat2world),
            rot_xy: mat_to_rows(&rotation_xy()),
            init_cam2world: mat_to_rows(&init_cam2world),
        })
    }
}

fn euler_degrees<T: RealField>(m: Matrix3<T>) -> (T, T, T) {
    let (roll, pitch, yaw) = Rotation3::from_matrix_unchecked(m).euler_angles();
    let to_deg = T::from_f64(180.0 / std::f64::consts::PI).unwrap();
    (roll * to_deg.clone(), pitch * to_deg.clone(), yaw * to_deg)
}

/// Roll/yaw residual for one quaternion sample.
///
/// In the experimental relative-to-initial mode the deviation is
/// measured against the initial camera orientation instead of the
/// satellite triad; roll and pitch swap there because the camera frame
/// is rotated 90 degrees in-plane relative to the satellite frame, so
/// the roll weight lands on the camera pitch angle.
pub fn roll_yaw_residual<T: RealField>(
    quat: &DVector<T>,
    ctx: &RollYawContext,
    roll_weight: f64,
    yaw_weight: f64,
    relative_to_initial: bool,
) -> SVector<T, 2> {
    debug_assert_eq!(quat.len(), 4);
    let q = nalgebra::Vector4::new(
        quat[0].clone(),
        quat[1].clone(),
        quat[2].clone(),
        quat[3].clone(),
    );
    let cam2world = unit_quat_from_xyzw(&q).to_rotation_matrix().into_inner();

    let roll_w = T::from_f64(roll_weight).unwrap();
    let yaw_w = T::from_f64(yaw_weight).unwrap();

    if relative_to_initial {
        let cam2cam = cam2world.transpose() * rows_to_mat::<T>(&ctx.init_cam2world);
        let (_roll, pitch, yaw) = euler_degrees(cam2cam);
        return SVector::<T, 2>::new(wrap_180(pitch) * roll_w, wrap_180(yaw) * yaw_w);
    }

    let roll_pitch_yaw = rows_to_mat::<T>(&ctx.sat2world).transpose()
        * cam2world
        * rows_to_mat::<T>(&ctx.rot_xy).transpose();
    let (roll, _pitch, yaw) = euler_degrees(roll_pitch_yaw);
    SVector::<T, 2>::new(wrap_180(roll) * roll_w, wrap_180(yaw) * yaw_w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    /// Build a quaternion whose rotation is exactly
    /// `sat2world * rollPitchYaw(r, p, y) * rotXY`.
    fn quat_for_rpy(ctx: &RollYawContext, roll: f64, pitch: f64, yaw: f64) -> DVector<f64> {
        let rpy = Rotation3::from_euler_angles(
            roll.to_radians(),
            pitch.to_radians(),
            yaw.to_radians(),
        )
        .into_inner();
        let cam2world = rows_to_mat::<f64>(&ctx.sat2world) * rpy * rows_to_mat::<f64>(&ctx.rot_xy);
        let q = UnitQuaternion::from_matrix(&cam2world);
        DVector::from_row_slice(&[q.i, q.j, q.k, q.w])
    }

    fn context() -> RollYawContext {
        let datum = Datum::WGS84;
        let positions: Vec<Vec3> = (0..5)
            .map(|i| datum.geodetic_to_ecef(10.0, 20.0 + 0.1 * i as f64, 500_000.0))
            .collect();
        let quats = vec![Vec4::new(0.0, 0.0, 0.0, 1.0); 5];
        RollYawContext::new(&positions, &quats, &datum, 2).unwrap()
    }

    #[test]
    fn zero_deviation_for_triad_aligned_camera() {
        let ctx = context();
        let quat = quat_for_rpy(&ctx, 0.0, 0.0, 0.0);
        let r = roll_yaw_residual(&quat, &ctx, 100.0, 100.0, false);
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(r[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn recovers_injected_roll_and_yaw() {
        let ctx = context();
        let quat = quat_for_rpy(&ctx, 0.2, 1.5, -0.3);
        let r = roll_yaw_residual(&quat, &ctx, 1.0, 1.0, false);
        assert_relative_eq!(r[0], 0.2, epsilon = 1e-6);
        assert_relative_eq!(r[1], -0.3, epsilon = 1e-6);
    }

    #[test]
    fn branch_near_180_resolves_to_small_angle() {
        let ctx = context();
        // A decomposition that lands at roll = 179.9 must be treated as
        // -0.1 degrees off, not as a huge residual.
        let quat = quat_for_rpy(&ctx, 179.9, 0.0, 0.0);
        let r = roll_yaw_residual(&quat, &ctx, 1.0, 1.0, false);
        assert!(r[0].abs() < 0.2, "roll residual {} did not fold into (-90, 90]", r[0]);
    }

    #[test]
    fn too_short_trajectory_is_rejected() {
        let datum = Datum::WGS84;
        let positions = vec![datum.geodetic_to_ecef(10.0, 20.0, 500_000.0)];
        let quats = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        assert!(RollYawContext::new(&positions, &quats, &datum, 0).is_err());
    }
}
