//! Jitter-solve optimization: problem IR, residual factors, and the
//! solver backend.
//!
//! The pipeline has three stages, kept deliberately separate:
//!
//! 1. **Problem construction**: [`problems::jitter::JitterProblem`]
//!    wires reprojection residuals and soft constraints into a
//!    backend-independent [`ir::ProblemIR`] over named parameter blocks
//!    (per-sample camera poses, triangulated points, rig transforms).
//! 2. **Backend compilation**: [`backend::TinySolverBackend`] translates
//!    the IR into a tiny-solver problem, binding each reprojection factor
//!    to an immutable sensor snapshot.
//! 3. **Optimization**: Levenberg-Marquardt over the parameter map,
//!    then the solution is committed back into the sensors.
//!
//! What makes jitter solving different from ordinary bundle adjustment
//! is the parameter layout: a linescan camera contributes thousands of
//! pose samples, and each pixel observation couples only to the handful
//! of samples inside its interpolation stencil. The [`coupling`] module
//! computes those windows; keeping them exact is what keeps the problem
//! sparse.

pub mod backend;
pub mod calibrate;
pub mod coupling;
pub mod factors;
pub mod ir;
pub mod problems;

pub use backend::{solve_with_backend, BackendKind, BackendSolution, BackendSolveOptions};
pub use coupling::{calc_index_bounds, CouplingWindow};
pub use problems::jitter::{JitterDataset, JitterProblem, JitterSolveOptions};
pub use problems::rig::RigConfig;
