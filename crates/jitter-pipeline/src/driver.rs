//! The driver state machine.
//!
//! `Init -> Adapt -> WireReproj -> WirePriors -> Solve -> Commit -> Done`,
//! transitions unconditional. Running out of iterations is not a
//! failure: input cameras arrive bundle-adjusted near the optimum, so a
//! maxed-out solve is still committed and reported.

use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use jitter_core::math::Vec3;
use jitter_optim::calibrate::destructive_median;
use jitter_optim::problems::anchors::synthesize_anchor_points;
use jitter_optim::problems::jitter::{JitterDataset, JitterProblem, JitterSolution};

use crate::config::JitterConfig;
use crate::report::{
    pixel_residuals, reference_center, CameraOffset, JitterReport, PixelResidualRecord,
    TriOffsetStats,
};

/// Driver states, advanced in order by [`JitterDriver::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveState {
    Init,
    Adapt,
    WireReproj,
    WirePriors,
    Solve,
    Commit,
    Done,
}

/// Owns the dataset through the solve and produces the final report.
pub struct JitterDriver {
    config: JitterConfig,
    dataset: JitterDataset,
    state: SolveState,
    problem: Option<JitterProblem>,
    solution: Option<JitterSolution>,
    initial_residuals: Vec<PixelResidualRecord>,
    initial_centers: Vec<Vec3>,
    initial_points: Vec<Vec3>,
    report: Option<JitterReport>,
}

impl JitterDriver {
    /// Validate the configuration against the dataset and stage the
    /// driver in `Init`.
    pub fn new(config: JitterConfig, dataset: JitterDataset) -> Result<Self> {
        config.validate(&dataset)?;
        Ok(Self {
            config,
            dataset,
            state: SolveState::Init,
            problem: None,
            solution: None,
            initial_residuals: Vec::new(),
            initial_centers: Vec::new(),
            initial_points: Vec::new(),
            report: None,
        })
    }

    pub fn state(&self) -> SolveState {
        self.state
    }

    pub fn dataset(&self) -> &JitterDataset {
        &self.dataset
    }

    /// Perform the work of the current state and advance to the next.
    pub fn step(&mut self) -> Result<SolveState> {
        match self.state {
            SolveState::Init => {
                if self.dataset.single_threaded_cameras() {
                    warn!("a sensor adapter is not thread safe; solver restricted to one thread");
                }
                self.state = SolveState::Adapt;
            }
            SolveState::Adapt => {
                let opts = self.config.solve.clone();
                self.dataset.normalize_and_resample(&opts)?;
                self.dataset.flag_outliers(&opts);
                info!("{} outliers after the initial reprojection gate", self.dataset.network.outliers.len());
                self.dataset.override_points_from_dem()?;
                self.dataset.apply_weight_image();
                if (opts.num_anchor_points_per_image > 0 || opts.num_anchor_points_per_tile > 0)
                    && opts.anchor_weight > 0.0
                {
                    let added = synthesize_anchor_points(&mut self.dataset, &opts)?;
                    info!("synthesized {added} anchor points");
                }
                // Record the pre-solve state for the displacement report.
                self.initial_centers =
                    self.dataset.sensors.iter().map(reference_center).collect();
                self.initial_points =
                    self.dataset.network.points.iter().map(|p| p.xyz).collect();
                self.state = SolveState::WireReproj;
            }
            SolveState::WireReproj => {
                let mut problem = JitterProblem::new(self.config.solve.clone());
                problem.wire_reprojection(&self.dataset)?;
                self.problem = Some(problem);
                self.state = SolveState::WirePriors;
            }
            SolveState::WirePriors => {
                let problem = self.problem.as_mut().expect("wired in WireReproj");
                problem.wire_priors(&self.dataset)?;
                self.initial_residuals = pixel_residuals(&self.dataset);
                self.state = SolveState::Solve;
            }
            SolveState::Solve => {
                let problem = self.problem.as_ref().expect("wired in WireReproj");
                let solution = problem.solve(&self.dataset, &self.config.backend_options())?;
                info!("final cost {}", solution.final_cost);
                self.solution = Some(solution);
                self.state = SolveState::Commit;
            }
            SolveState::Commit => {
                let problem = self.problem.as_ref().expect("wired in WireReproj");
                let solution = self.solution.as_ref().expect("solved in Solve");
                problem.commit(solution, &mut self.dataset)?;
                self.report = Some(self.build_report(solution.final_cost));
                self.state = SolveState::Done;
            }
            SolveState::Done => {}
        }
        Ok(self.state)
    }

    /// Run every remaining state and return the report.
    pub fn run(&mut self) -> Result<JitterReport> {
        while self.state != SolveState::Done {
            self.step()?;
        }
        self.report
            .clone()
            .ok_or_else(|| anyhow!("driver finished without a report"))
    }

    fn build_report(&self, final_cost: f64) -> JitterReport {
        let final_residuals = pixel_residuals(&self.dataset);

        let camera_offsets = self
            .dataset
            .sensors
            .iter()
            .enumerate()
            .map(|(icam, sensor)| {
                let initial = self.initial_centers[icam];
                let current = reference_center(sensor);
                CameraOffset {
                    camera: icam,
                    initial_center: [initial.x, initial.y, initial.z],
                    final_center: [current.x, current.y, current.z],
                    displacement: (current - initial).norm(),
                }
            })
            .collect();

        let mut tri_offsets = Vec::new();
        for icam in 0..self.dataset.sensors.len() {
            let mut offsets: Vec<f64> = self
                .dataset
                .network
                .observations_for_camera(icam)
                .filter(|obs| !self.dataset.network.is_outlier(obs.point))
                .map(|obs| {
                    (self.dataset.network.points[obs.point].xyz - self.initial_points[obs.point])
                        .norm()
                })
                .collect();
            if offsets.is_empty() {
                continue;
            }
            let mean = offsets.iter().sum::<f64>() / offsets.len() as f64;
            let median = destructive_median(&mut offsets);
            tri_offsets.push(TriOffsetStats { camera: icam, count: offsets.len(), mean, median });
        }

        JitterReport {
            initial_residuals: self.initial_residuals.clone(),
            final_residuals,
            camera_offsets,
            tri_offsets,
            final_cost,
        }
    }

    /// Consume the driver and hand back the refined dataset.
    pub fn into_dataset(self) -> JitterDataset {
        self.dataset
    }
}

