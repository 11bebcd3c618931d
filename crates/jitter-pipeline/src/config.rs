//! Validated configuration of the end-to-end solve.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use jitter_optim::backend::BackendSolveOptions;
use jitter_optim::problems::jitter::{JitterDataset, JitterSolveOptions};

/// Full configuration: solve options plus solver limits.
///
/// Failures caught here are setup errors in the sense of the error
/// policy: they reflect inconsistent input and abort before any wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterConfig {
    pub solve: JitterSolveOptions,
    /// Maximum solver iterations.
    pub num_iterations: usize,
    /// Relative parameter-change tolerance at which the solver stops.
    pub parameter_tolerance: f64,
    /// Solver verbosity.
    pub verbosity: usize,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            solve: JitterSolveOptions::default(),
            num_iterations: 500,
            parameter_tolerance: 1e-12,
            verbosity: 0,
        }
    }
}

impl JitterConfig {
    /// Check the options against each other and against the dataset.
    pub fn validate(&self, dataset: &JitterDataset) -> Result<()> {
        let s = &self.solve;

        ensure!(!dataset.sensors.is_empty(), "missing input cameras");
        ensure!(
            dataset.orbital_groups.len() == dataset.sensors.len(),
            "every camera needs an orbital group"
        );

        ensure!(s.max_init_reproj_error > 0.0, "must have a positive initial reprojection gate");
        ensure!(s.robust_threshold > 0.0, "the robust threshold must be positive");
        ensure!(s.tri_weight >= 0.0, "the triangulation weight must be non-negative");
        ensure!(s.tri_robust_threshold > 0.0, "the triangulation robust threshold must be positive");
        ensure!(s.heights_from_dem_uncertainty > 0.0, "the DEM uncertainty must be positive");
        ensure!(
            s.heights_from_dem_robust_threshold > 0.0,
            "the DEM robust threshold must be positive"
        );
        ensure!(s.camera_position_weight >= 0.0, "the position weight must be non-negative");
        ensure!(
            s.camera_position_robust_threshold > 0.0,
            "the position robust threshold must be positive"
        );
        ensure!(s.rotation_weight >= 0.0, "the rotation weight must be non-negative");
        ensure!(s.quat_norm_weight > 0.0, "the quaternion norm weight must be positive");
        ensure!(s.roll_weight >= 0.0, "the roll weight must be non-negative");
        ensure!(s.yaw_weight >= 0.0, "the yaw weight must be non-negative");
        ensure!(s.anchor_weight >= 0.0, "the anchor weight must be non-negative");

        ensure!(
            s.num_anchor_points_per_image == 0 || s.num_anchor_points_per_tile == 0,
            "cannot have anchor points both per image and per tile"
        );
        if s.anchor_weight > 0.0 {
            ensure!(
                dataset.anchor_dem.is_some(),
                "a positive anchor weight needs an anchor DEM"
            );
        }

        if dataset.rig.is_some() {
            ensure!(
                s.roll_weight == 0.0 && s.yaw_weight == 0.0,
                "cannot use the roll/yaw constraint with a rig"
            );
        }
        if let Some(rig) = &dataset.rig {
            rig.validate(&dataset.sensors)?;
        }

        ensure!(self.num_iterations > 0, "must allow at least one solver iteration");
        ensure!(self.parameter_tolerance > 0.0, "the parameter tolerance must be positive");
        Ok(())
    }

    /// Solver limits as backend options.
    pub fn backend_options(&self) -> BackendSolveOptions {
        BackendSolveOptions {
            max_iters: self.num_iterations,
            verbosity: self.verbosity,
            min_rel_decrease: Some(self.parameter_tolerance),
            ..BackendSolveOptions::default()
        }
    }
}
