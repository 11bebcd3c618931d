//! Umbrella crate re-exporting the jitter-solving stack.
//!
//! - [`core`]: sensor models, pose tables, geodesy, DEM contracts.
//! - [`optim`]: problem IR, residual factors, solver backend.
//! - [`pipeline`]: configuration, driver state machine, reports.

pub use jitter_core as core;
pub use jitter_optim as optim;
pub use jitter_pipeline as pipeline;

pub use jitter_core::{Datum, Sensor};
pub use jitter_optim::problems::jitter::{JitterDataset, JitterProblem, JitterSolveOptions};
pub use jitter_pipeline::{JitterConfig, JitterDriver, JitterReport};
