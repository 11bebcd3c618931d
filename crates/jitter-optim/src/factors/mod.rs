//! Residual models for the six constraint families and the rig bridge.
//!
//! Every residual is a pure function of its parameter blocks plus
//! immutable setup data, generic over [`nalgebra::RealField`] so the
//! backend can evaluate it with f64 or dual numbers. Constants enter via
//! `T::from_f64`; parameter values are read with `.clone()`.
//!
//! Reprojection residuals never fail the solve: a projection error
//! produces a large sentinel residual and the block is accepted, so one
//! pathological point cannot poison an iteration.

pub mod priors;
pub mod reprojection;
pub mod rig;
pub mod roll_yaw;

pub use reprojection::BIG_PIXEL_SENTINEL;
