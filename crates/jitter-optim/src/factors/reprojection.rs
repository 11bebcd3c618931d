//! Linescan and frame reprojection residuals.

use nalgebra::{DVector, RealField, SVector, Vector3, Vector4};

use jitter_core::sensors::{
    frame_ground_to_image, ls_project_with_pose, FrameGeometry, LinescanSensor, LsPoseView,
    DEFAULT_PROJECTION_PRECISION,
};

use crate::coupling::CouplingWindow;

/// Residual value substituted when a projection fails, in pixels. Large
/// enough that the robust loss saturates, small enough not to wreck the
/// normal equations.
pub const BIG_PIXEL_SENTINEL: f64 = 1000.0;

pub(crate) fn vec3_from_param<T: RealField>(p: &DVector<T>) -> Vector3<T> {
    debug_assert_eq!(p.len(), 3);
    Vector3::new(p[0].clone(), p[1].clone(), p[2].clone())
}

pub(crate) fn vec4_from_param<T: RealField>(p: &DVector<T>) -> Vector4<T> {
    debug_assert_eq!(p.len(), 4);
    Vector4::new(p[0].clone(), p[1].clone(), p[2].clone(), p[3].clone())
}

pub(crate) fn sentinel<T: RealField>() -> SVector<T, 2> {
    let big = T::from_f64(BIG_PIXEL_SENTINEL).unwrap();
    SVector::<T, 2>::new(big.clone(), big)
}

pub(crate) fn weighted_pixel_residual<T: RealField>(
    projected: &nalgebra::Vector2<T>,
    pixel: [f64; 2],
    weight: f64,
) -> SVector<T, 2> {
    let w = T::from_f64(weight).unwrap();
    SVector::<T, 2>::new(
        w.clone() * (projected.x.clone() - T::from_f64(pixel[0]).unwrap()),
        w * (projected.y.clone() - T::from_f64(pixel[1]).unwrap()),
    )
}

/// Split a reprojection parameter slice into live quaternion and
/// position windows.
pub(crate) fn split_pose_params<T: RealField>(
    params: &[DVector<T>],
    window: &CouplingWindow,
) -> (Vec<Vector4<T>>, Vec<Vector3<T>>) {
    let quats: Vec<Vector4<T>> = params[..window.num_quat()].iter().map(vec4_from_param).collect();
    let positions: Vec<Vector3<T>> = params[window.num_quat()..window.num_quat() + window.num_pos()]
        .iter()
        .map(vec3_from_param)
        .collect();
    (quats, positions)
}

/// Linescan reprojection residual.
///
/// `params` holds the quaternion blocks of `window`, then its position
/// blocks, then the triangulated point. Projection runs through a value
/// view of the sensor whose coupled window is overlaid with the live
/// parameter values; the sensor's own tables are never touched.
pub fn ls_reproj_residual<T: RealField>(
    params: &[DVector<T>],
    sensor: &LinescanSensor,
    window: &CouplingWindow,
    pixel: [f64; 2],
    weight: f64,
) -> SVector<T, 2> {
    debug_assert_eq!(
        params.len(),
        window.num_quat() + window.num_pos() + 1,
        "expected [quat window, pos window, point] parameter blocks"
    );
    let (quats, positions) = split_pose_params(params, window);
    let ground = vec3_from_param(&params[params.len() - 1]);

    let view = LsPoseView {
        pos_t0: sensor.positions.t0,
        pos_dt: sensor.positions.dt,
        base_positions: &sensor.positions.samples,
        live_positions: &positions,
        pos_beg: window.beg_pos,
        quat_t0: sensor.quaternions.t0,
        quat_dt: sensor.quaternions.dt,
        base_quaternions: &sensor.quaternions.samples,
        live_quaternions: &quats,
        quat_beg: window.beg_quat,
    };

    match ls_project_with_pose(
        &sensor.geometry,
        |t| view.pose_at(t),
        &ground,
        DEFAULT_PROJECTION_PRECISION,
    ) {
        Ok(projected) => weighted_pixel_residual(&projected, pixel, weight),
        Err(_) => sentinel(),
    }
}

/// Frame reprojection residual.
///
/// `params` is `[position, quaternion, point]`.
pub fn frame_reproj_residual<T: RealField>(
    params: &[DVector<T>],
    geometry: &FrameGeometry,
    pixel: [f64; 2],
    weight: f64,
) -> SVector<T, 2> {
    debug_assert_eq!(params.len(), 3, "expected [position, quat, point] parameter blocks");
    let position = vec3_from_param(&params[0]);
    let quaternion = vec4_from_param(&params[1]);
    let ground = vec3_from_param(&params[2]);

    match frame_ground_to_image(geometry, &position, &quaternion, &ground) {
        Ok(projected) => weighted_pixel_residual(&projected, pixel, weight),
        Err(_) => sentinel(),
    }
}
