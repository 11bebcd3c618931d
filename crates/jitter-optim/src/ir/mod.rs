//! Backend-independent intermediate representation of the jitter problem.

mod types;

pub use types::{FactorKind, FixedMask, ParamBlock, ParamId, ProblemIR, ResidualBlock, RobustLoss};
