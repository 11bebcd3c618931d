//! Mathematical type aliases and geodesy utilities.

use nalgebra::{Matrix3, Point3, Vector2, Vector3, Vector4};

pub mod geodesy;

pub use geodesy::{
    assemble_cam2world, calc_ecef_along_across, calc_proj_along_across, roll_pitch_yaw_degrees,
    rotation_xy, wrap_180, Datum,
};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 4D vector with [`Real`] components; quaternions are stored `[x, y, z, w]`.
pub type Vec4 = Vector4<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3×3 matrix with [`Real`] entries.
pub type Mat3 = Matrix3<Real>;
