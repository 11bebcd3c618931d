use anyhow::{anyhow, ensure, Result};
use nalgebra::DVector;
use std::collections::HashMap;
use std::sync::Arc;

use tiny_solver::factors::Factor;
use tiny_solver::loss_functions::{CauchyLoss, Loss};
use tiny_solver::optimizer::{Optimizer, OptimizerOptions};
use tiny_solver::problem::Problem;
use tiny_solver::{linear::sparse::LinearSolverType, LevenbergMarquardtOptimizer};

use jitter_core::sensors::{FrameGeometry, LinescanGeometry, LinescanSensor, Sensor};

use crate::backend::{
    BackendSolution, BackendSolveOptions, LinearSolverKind, OptimBackend, SensorSnapshots,
};
use crate::coupling::CouplingWindow;
use crate::factors::priors::{
    quat_norm_residual, rotation_prior_residual, translation_prior_residual, xyz_prior_residual,
};
use crate::factors::reprojection::{frame_reproj_residual, ls_reproj_residual};
use crate::factors::rig::{rig_ls_frame_reproj_residual, rig_ls_ls_reproj_residual};
use crate::factors::roll_yaw::{roll_yaw_residual, RollYawContext};
use crate::ir::{FactorKind, ProblemIR, RobustLoss};

/// tiny-solver backend adapter.
#[derive(Debug, Clone, Copy)]
pub struct TinySolverBackend;

impl TinySolverBackend {
    fn compile(
        &self,
        ir: &ProblemIR,
        snapshots: &SensorSnapshots,
        initial: &HashMap<String, DVector<f64>>,
    ) -> Result<Problem> {
        ir.validate()?;

        let mut problem = Problem::new();

        // One shared snapshot per linescan camera; factors hold clones
        // of the Arc, not of the tables.
        let ls_cache: HashMap<usize, Arc<LinescanSensor>> = snapshots
            .sensors
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_linescan().map(|ls| (i, Arc::new(ls.clone()))))
            .collect();

        for param in &ir.params {
            let init = initial.get(&param.name).ok_or_else(|| {
                anyhow!("initial values missing parameter {} (id {:?})", param.name, param.id)
            })?;
            ensure!(
                init.len() == param.dim,
                "initial dimension mismatch for {}: expected {}, got {}",
                param.name,
                param.dim,
                init.len()
            );

            for idx in param.fixed.iter() {
                problem.fix_variable(&param.name, idx);
            }
        }

        for residual in &ir.residuals {
            let (factor, loss) = compile_factor(residual, snapshots, &ls_cache)?;
            let param_names: Vec<String> = residual
                .params
                .iter()
                .map(|id| ir.params[id.0].name.clone())
                .collect();
            let param_refs: Vec<&str> = param_names.iter().map(|s| s.as_str()).collect();
            problem.add_residual_block(residual.residual_dim, &param_refs, factor, loss);
        }

        Ok(problem)
    }
}

impl OptimBackend for TinySolverBackend {
    fn solve(
        &self,
        ir: &ProblemIR,
        snapshots: &SensorSnapshots,
        initial: &HashMap<String, DVector<f64>>,
        opts: &BackendSolveOptions,
    ) -> Result<BackendSolution> {
        let problem = self.compile(ir, snapshots, initial)?;
        let optimizer = LevenbergMarquardtOptimizer::default();
        let options = to_optimizer_options(opts);
        let solution = optimizer
            .optimize(&problem, initial, Some(options))
            .ok_or_else(|| anyhow!("tiny-solver returned no solution"))?;

        let param_blocks = problem.initialize_parameter_blocks(&solution);
        let residuals = problem.compute_residuals(&param_blocks, true);
        let final_cost = 0.5 * residuals.as_ref().squared_norm_l2();

        Ok(BackendSolution { params: solution, final_cost })
    }
}

fn to_optimizer_options(opts: &BackendSolveOptions) -> OptimizerOptions {
    let mut options = OptimizerOptions {
        max_iteration: opts.max_iters,
        verbosity_level: opts.verbosity,
        ..OptimizerOptions::default()
    };
    if let Some(solver) = opts.linear_solver {
        options.linear_solver_type = match solver {
            LinearSolverKind::SparseCholesky => LinearSolverType::SparseCholesky,
            LinearSolverKind::SparseQR => LinearSolverType::SparseQR,
        };
    }
    if let Some(v) = opts.min_abs_decrease {
        options.min_abs_error_decrease_threshold = v;
    }
    if let Some(v) = opts.min_rel_decrease {
        options.min_rel_error_decrease_threshold = v;
    }
    if let Some(v) = opts.min_error {
        options.min_error_threshold = v;
    }
    options
}

fn compile_loss(loss: RobustLoss) -> Result<Option<Box<dyn Loss + Send>>> {
    match loss {
        RobustLoss::None => Ok(None),
        RobustLoss::Cauchy { scale } => {
            ensure!(scale > 0.0, "Cauchy scale must be positive");
            Ok(Some(Box::new(CauchyLoss::new(scale))))
        }
    }
}

type CompiledFactor = (
    Box<dyn tiny_solver::factors::FactorImpl + Send>,
    Option<Box<dyn Loss + Send>>,
);

fn linescan_snapshot(
    ls_cache: &HashMap<usize, Arc<LinescanSensor>>,
    camera: usize,
) -> Result<Arc<LinescanSensor>> {
    ls_cache
        .get(&camera)
        .cloned()
        .ok_or_else(|| anyhow!("camera {camera} is not a linescan sensor"))
}

fn compile_factor(
    residual: &crate::ir::ResidualBlock,
    snapshots: &SensorSnapshots,
    ls_cache: &HashMap<usize, Arc<LinescanSensor>>,
) -> Result<CompiledFactor> {
    let loss = compile_loss(residual.loss)?;
    match &residual.factor {
        FactorKind::LsPixelReproj { camera, pixel, weight, window } => {
            let factor = TinyLsReprojFactor {
                sensor: linescan_snapshot(ls_cache, *camera)?,
                window: *window,
                pixel: *pixel,
                weight: *weight,
            };
            Ok((Box::new(factor), loss))
        }
        FactorKind::FramePixelReproj { camera, pixel, weight } => {
            let geometry = match snapshots.sensors.get(*camera).map(|s| s.as_ref()) {
                Some(Sensor::Frame(f)) => f.geometry,
                _ => return Err(anyhow!("camera {camera} is not a frame sensor")),
            };
            let factor = TinyFrameReprojFactor { geometry, pixel: *pixel, weight: *weight };
            Ok((Box::new(factor), loss))
        }
        FactorKind::RigLsFramePixelReproj { ref_camera, child_camera, pixel, weight, window } => {
            let child = match snapshots.sensors.get(*child_camera).map(|s| s.as_ref()) {
                Some(Sensor::Frame(f)) => f.clone(),
                _ => return Err(anyhow!("camera {child_camera} is not a frame sensor")),
            };
            let factor = TinyRigLsFrameFactor {
                ref_sensor: linescan_snapshot(ls_cache, *ref_camera)?,
                child_geometry: child.geometry,
                child_time: child.time,
                window: *window,
                pixel: *pixel,
                weight: *weight,
            };
            Ok((Box::new(factor), loss))
        }
        FactorKind::RigLsLsPixelReproj { ref_camera, child_camera, pixel, weight, window } => {
            let child_geometry = match snapshots.sensors.get(*child_camera).map(|s| s.as_ref()) {
                Some(Sensor::Linescan(ls)) => ls.geometry,
                _ => return Err(anyhow!("camera {child_camera} is not a linescan sensor")),
            };
            let factor = TinyRigLsLsFactor {
                ref_sensor: linescan_snapshot(ls_cache, *ref_camera)?,
                child_geometry,
                window: *window,
                pixel: *pixel,
                weight: *weight,
            };
            Ok((Box::new(factor), loss))
        }
        FactorKind::XyzPrior { observation, weight } => {
            let factor = TinyXyzPriorFactor { observation: *observation, weight: *weight };
            Ok((Box::new(factor), loss))
        }
        FactorKind::TranslationPrior { initial, weight } => {
            let factor = TinyTranslationPriorFactor { initial: *initial, weight: *weight };
            Ok((Box::new(factor), loss))
        }
        FactorKind::RotationPrior { initial, weight } => {
            let factor = TinyRotationPriorFactor { initial: *initial, weight: *weight };
            Ok((Box::new(factor), loss))
        }
        FactorKind::QuatNorm { weight } => {
            let factor = TinyQuatNormFactor { weight: *weight };
            Ok((Box::new(factor), loss))
        }
        FactorKind::RollYaw {
            sat2world,
            rot_xy,
            init_cam2world,
            roll_weight,
            yaw_weight,
            relative_to_initial,
        } => {
            let factor = TinyRollYawFactor {
                context: RollYawContext {
                    sat2world: *sat2world,
                    rot_xy: *rot_xy,
                    init_cam2world: *init_cam2world,
                },
                roll_weight: *roll_weight,
                yaw_weight: *yaw_weight,
                relative_to_initial: *relative_to_initial,
            };
            Ok((Box::new(factor), loss))
        }
    }
}

#[derive(Debug, Clone)]
struct TinyLsReprojFactor {
    sensor: Arc<LinescanSensor>,
    window: CouplingWindow,
    pixel: [f64; 2],
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyLsReprojFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let r = ls_reproj_residual(params, &self.sensor, &self.window, self.pixel, self.weight);
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyFrameReprojFactor {
    geometry: FrameGeometry,
    pixel: [f64; 2],
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyFrameReprojFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let r = frame_reproj_residual(params, &self.geometry, self.pixel, self.weight);
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyRigLsFrameFactor {
    ref_sensor: Arc<LinescanSensor>,
    child_geometry: FrameGeometry,
    child_time: f64,
    window: CouplingWindow,
    pixel: [f64; 2],
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyRigLsFrameFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let r = rig_ls_frame_reproj_residual(
            params,
            &self.ref_sensor,
            &self.child_geometry,
            self.child_time,
            &self.window,
            self.pixel,
            self.weight,
        );
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyRigLsLsFactor {
    ref_sensor: Arc<LinescanSensor>,
    child_geometry: LinescanGeometry,
    window: CouplingWindow,
    pixel: [f64; 2],
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyRigLsLsFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let r = rig_ls_ls_reproj_residual(
            params,
            &self.ref_sensor,
            &self.child_geometry,
            &self.window,
            self.pixel,
            self.weight,
        );
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyXyzPriorFactor {
    observation: [f64; 3],
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyXyzPriorFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [point] parameter block");
        let r = xyz_prior_residual(&params[0], self.observation, self.weight);
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyTranslationPriorFactor {
    initial: [f64; 3],
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyTranslationPriorFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [position] parameter block");
        let r = translation_prior_residual(&params[0], self.initial, self.weight);
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyRotationPriorFactor {
    initial: [f64; 4],
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyRotationPriorFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [quaternion] parameter block");
        let r = rotation_prior_residual(&params[0], self.initial, self.weight);
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyQuatNormFactor {
    weight: f64,
}

impl<T: nalgebra::RealField> Factor<T> for TinyQuatNormFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [quaternion] parameter block");
        let r = quat_norm_residual(&params[0], self.weight);
        DVector::from_row_slice(r.as_slice())
    }
}

#[derive(Debug, Clone)]
struct TinyRollYawFactor {
    context: RollYawContext,
    roll_weight: f64,
    yaw_weight: f64,
    relative_to_initial: bool,
}

impl<T: nalgebra::RealField> Factor<T> for TinyRollYawFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        debug_assert_eq!(params.len(), 1, "expected [quaternion] parameter block");
        let r = roll_yaw_residual(
            &params[0],
            &self.context,
            self.roll_weight,
            self.yaw_weight,
            self.relative_to_initial,
        );
        DVector::from_row_slice(r.as_slice())
    }
}
