//! Backend adapters that compile the IR into solver-specific problems.
//!
//! Backends translate the IR into a solver-native graph, bind
//! reprojection factors to immutable sensor snapshots, apply losses and
//! fixed blocks, and return a solved parameter map.

mod tiny_solver_backend;

use anyhow::Result;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use jitter_core::sensors::Sensor;

use crate::ir::ProblemIR;

pub use tiny_solver_backend::TinySolverBackend;

/// Immutable sensor snapshots the backend binds factors against.
///
/// Snapshots are taken once, after the adapt stage and before solving;
/// residuals overlay live parameter windows on them but never mutate
/// them, which is what makes parallel residual evaluation safe.
#[derive(Debug, Clone)]
pub struct SensorSnapshots {
    pub sensors: Vec<Arc<Sensor>>,
}

impl SensorSnapshots {
    pub fn capture(sensors: &[Sensor]) -> Self {
        Self { sensors: sensors.iter().cloned().map(Arc::new).collect() }
    }
}

/// Backend-agnostic solver options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSolveOptions {
    /// Maximum number of iterations for the optimizer.
    pub max_iters: usize,
    /// Verbosity level (backend-specific).
    pub verbosity: usize,
    /// Optional linear solver selection.
    pub linear_solver: Option<LinearSolverKind>,
    /// Absolute error decrease threshold for early termination.
    pub min_abs_decrease: Option<f64>,
    /// Relative error decrease threshold for early termination.
    pub min_rel_decrease: Option<f64>,
    /// Error threshold for early termination.
    pub min_error: Option<f64>,
}

impl Default for BackendSolveOptions {
    fn default() -> Self {
        // Jitter corrections are sub-pixel refinements of already
        // bundle-adjusted cameras; the termination thresholds are kept
        // extremely tight and iteration count does the bounding.
        Self {
            max_iters: 500,
            verbosity: 0,
            linear_solver: Some(LinearSolverKind::SparseCholesky),
            min_abs_decrease: Some(1e-16),
            min_rel_decrease: Some(1e-16),
            min_error: Some(1e-16),
        }
    }
}

/// Linear solver selection (backend-agnostic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    /// Sparse Cholesky decomposition.
    SparseCholesky,
    /// Sparse QR decomposition.
    SparseQR,
}

/// Solver output from a backend.
///
/// The `params` map uses the IR parameter block names.
#[derive(Debug, Clone)]
pub struct BackendSolution {
    /// Optimized parameter vectors keyed by block name.
    pub params: HashMap<String, DVector<f64>>,
    /// Final robustified cost.
    pub final_cost: f64,
}

/// Backend interface implemented by solver adapters.
pub trait OptimBackend {
    /// Solve a compiled IR with the provided initial parameters.
    fn solve(
        &self,
        ir: &ProblemIR,
        snapshots: &SensorSnapshots,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
    ) -> Result<BackendSolution>;
}

/// Supported solver backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// tiny-solver Levenberg-Marquardt backend.
    TinySolver,
}

/// Solve a problem using the selected backend.
pub fn solve_with_backend(
    backend: BackendKind,
    ir: &ProblemIR,
    snapshots: &SensorSnapshots,
    initial: &HashMap<String, DVector<f64>>,
    opts: &BackendSolveOptions,
) -> Result<BackendSolution> {
    match backend {
        BackendKind::TinySolver => TinySolverBackend.solve(ir, snapshots, initial, opts),
    }
}
