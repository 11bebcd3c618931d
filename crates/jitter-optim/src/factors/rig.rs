//! Rig-composed reprojection residuals.
//!
//! On a rig, a non-reference sensor has no pose of its own: its pose at
//! time `t` is the reference sensor's interpolated pose composed with
//! the rigid `ref -> child` transform. The residual therefore couples to
//! the reference pose window, the rig transform, and the point; the
//! child's tables are never parameters.

use nalgebra::{DVector, RealField, SVector, UnitQuaternion, Vector3};

use jitter_core::sensors::{
    frame_project_with_pose, ls_project_with_pose, FrameGeometry, LinescanGeometry,
    LinescanSensor, LsPoseView, DEFAULT_PROJECTION_PRECISION,
};

use crate::coupling::CouplingWindow;
use crate::factors::reprojection::{
    sentinel, split_pose_params, vec3_from_param, weighted_pixel_residual,
};

/// Decompose a 6-DOF rig parameter block `[axis-angle, translation]`
/// into its rotation and translation. The transform maps reference-
/// sensor coordinates to child-sensor coordinates.
pub fn rig_transform_parts<T: RealField>(rig: &DVector<T>) -> (UnitQuaternion<T>, Vector3<T>) {
    debug_assert_eq!(rig.len(), 6);
    let axis = Vector3::new(rig[0].clone(), rig[1].clone(), rig[2].clone());
    let translation = Vector3::new(rig[3].clone(), rig[4].clone(), rig[5].clone());
    (UnitQuaternion::from_scaled_axis(axis), translation)
}

/// Child camera pose from the reference pose and the rig transform.
///
/// With `X_child = R_rc * X_ref + t_rc`, the child camera-to-world
/// rotation is `R_ref * R_rc^T` and the child center sits at
/// `C_ref - R_child * t_rc`.
pub fn compose_child_pose<T: RealField>(
    ref_center: &Vector3<T>,
    ref_rotation: &UnitQuaternion<T>,
    rig_rotation: &UnitQuaternion<T>,
    rig_translation: &Vector3<T>,
) -> (Vector3<T>, UnitQuaternion<T>) {
    let child_rotation = ref_rotation * rig_rotation.inverse();
    let child_center = ref_center - child_rotation.transform_vector(rig_translation);
    (child_center, child_rotation)
}

/// Rig reprojection into a frame child.
///
/// `params` holds the reference quaternion blocks of `window`, the
/// reference position blocks, the 6-DOF rig transform, and the point.
/// The reference pose is interpolated at the child's capture time.
pub fn rig_ls_frame_reproj_residual<T: RealField>(
    params: &[DVector<T>],
    ref_sensor: &LinescanSensor,
    child_geometry: &FrameGeometry,
    child_time: f64,
    window: &CouplingWindow,
    pixel: [f64; 2],
    weight: f64,
) -> SVector<T, 2> {
    debug_assert_eq!(
        params.len(),
        window.num_quat() + window.num_pos() + 2,
        "expected [ref quat window, ref pos window, rig, point] parameter blocks"
    );
    let (quats, positions) = split_pose_params(params, window);
    let (rig_rotation, rig_translation) = rig_transform_parts(&params[params.len() - 2]);
    let ground = vec3_from_param(&params[params.len() - 1]);

    let view = ref_pose_view(ref_sensor, &positions, &quats, window);
    let time = T::from_f64(child_time).unwrap();
    let (ref_center, ref_rotation) = view.pose_at(&time);
    let (center, rotation) =
        compose_child_pose(&ref_center, &ref_rotation, &rig_rotation, &rig_translation);

    match frame_project_with_pose(child_geometry, &center, &rotation, &ground) {
        Ok(projected) => weighted_pixel_residual(&projected, pixel, weight),
        Err(_) => sentinel(),
    }
}

/// Rig reprojection into a linescan child.
///
/// Same layout as [`rig_ls_frame_reproj_residual`]; the capture-time
/// search runs through the composed pose, so the window on the
/// reference grids must cover the child pixel's time bracket.
pub fn rig_ls_ls_reproj_residual<T: RealField>(
    params: &[DVector<T>],
    ref_sensor: &LinescanSensor,
    child_geometry: &LinescanGeometry,
    window: &CouplingWindow,
    pixel: [f64; 2],
    weight: f64,
) -> SVector<T, 2> {
    debug_assert_eq!(
        params.len(),
        window.num_quat() + window.num_pos() + 2,
        "expected [ref quat window, ref pos window, rig, point] parameter blocks"
    );
    let (quats, positions) = split_pose_params(params, window);
    let (rig_rotation, rig_translation) = rig_transform_parts(&params[params.len() - 2]);
    let ground = vec3_from_param(&params[params.len() - 1]);

    let view = ref_pose_view(ref_sensor, &positions, &quats, window);
    let pose_at = |t: &T| {
        let (ref_center, ref_rotation) = view.pose_at(t);
        compose_child_pose(&ref_center, &ref_rotation, &rig_rotation, &rig_translation)
    };

    match ls_project_with_pose(child_geometry, pose_at, &ground, DEFAULT_PROJECTION_PRECISION) {
        Ok(projected) => weighted_pixel_residual(&projected, pixel, weight),
        Err(_) => sentinel(),
    }
}

fn ref_pose_view<'a, T: RealField>(
    ref_sensor: &'a LinescanSensor,
    positions: &'a [Vector3<T>],
    quats: &'a [nalgebra::Vector4<T>],
    window: &CouplingWindow,
) -> LsPoseView<'a, T> {
    LsPoseView {
        pos_t0: ref_sensor.positions.t0,
        pos_dt: ref_sensor.positions.dt,
        base_positions: &ref_sensor.positions.samples,
        live_positions: positions,
        pos_beg: window.beg_pos,
        quat_t0: ref_sensor.quaternions.t0,
        quat_dt: ref_sensor.quaternions.dt,
        base_quaternions: &ref_sensor.quaternions.samples,
        live_quaternions: quats,
        quat_beg: window.beg_quat,
    }
}
