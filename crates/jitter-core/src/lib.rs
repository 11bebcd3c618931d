//! Core primitives for `jitter-rs`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec3`, ...) and the geodetic
//!   datum machinery used by the along-track constraints,
//! - uniform-grid pose tables with Lagrange interpolation,
//! - linescan and frame sensor models with a projection path that is
//!   generic over [`nalgebra::RealField`],
//! - the DEM and weight-image contracts,
//! - control-network types (triangulated points and pixel observations).
//!
//! The optimization problem itself lives in `jitter-optim`, and the
//! end-to-end driver in `jitter-pipeline`.

pub mod dem;
pub mod error;
pub mod math;
pub mod network;
pub mod sensors;
pub mod tables;

pub use error::{Error, Result};
pub use math::*;
pub use network::*;
pub use sensors::*;
pub use tables::{PositionTable, QuaternionTable, LAGRANGE_ORDER};
