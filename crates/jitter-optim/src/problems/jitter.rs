//! The jitter-solve problem: joint refinement of per-sample camera
//! poses, triangulated points, and rig transforms.
//!
//! Construction runs in two wiring passes mirroring the driver states:
//! reprojection residuals first (collecting the statistics the
//! constraint calibrator needs), then the soft priors scaled by those
//! statistics. The problem is deliberately under-determined without the
//! priors; they are what keeps tens of thousands of pose samples
//! physically plausible where image evidence is thin.

use anyhow::{anyhow, ensure, Result};
use log::warn;
use nalgebra::DVector;
use std::collections::HashMap;
use std::sync::Arc;

use jitter_core::dem::{dem_xyz_at_point, DemSurface, WeightImage};
use jitter_core::math::{Datum, Vec2, Vec3, Vec4};
use jitter_core::network::{ControlNetwork, Observation, PointKind};
use jitter_core::sensors::{
    frame_project_with_pose, ls_project_with_pose, Sensor, DEFAULT_PROJECTION_PRECISION,
};

use crate::backend::{
    solve_with_backend, BackendKind, BackendSolution, BackendSolveOptions, SensorSnapshots,
};
use crate::calibrate::{destructive_median, estimate_gsd_per_point, estimated_gsd};
use crate::coupling::{resolve_ls_window, resolve_time_window};
use crate::factors::rig::{compose_child_pose, rig_transform_parts};
use crate::factors::roll_yaw::RollYawContext;
use crate::ir::{FactorKind, FixedMask, ParamId, ProblemIR, ResidualBlock, RobustLoss};
use crate::problems::rig::{RigConfig, NUM_RIGID_PARAMS};

/// Options of the jitter solve, one field per knob of the engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JitterSolveOptions {
    /// Initial-reprojection outlier gate, in pixels; also sets the
    /// coupling line buffer.
    pub max_init_reproj_error: f64,
    /// Cauchy threshold of the reprojection residuals.
    pub robust_threshold: f64,
    /// Strength of the triangulation prior; divided by GSD per point.
    pub tri_weight: f64,
    /// Cauchy threshold of the triangulation prior. Smaller than the
    /// reprojection threshold so the prior yields to image evidence.
    pub tri_robust_threshold: f64,
    /// One-sigma DEM uncertainty in meters; the DEM constraint weight is
    /// its reciprocal.
    pub heights_from_dem_uncertainty: f64,
    /// Cauchy threshold of the DEM constraint.
    pub heights_from_dem_robust_threshold: f64,
    /// Aggregate camera-position prior multiplier.
    pub camera_position_weight: f64,
    /// Cauchy threshold of the camera-position prior.
    pub camera_position_robust_threshold: f64,
    /// Per-sample quaternion prior weight.
    pub rotation_weight: f64,
    /// Weight of the soft unit-norm quaternion constraint.
    pub quat_norm_weight: f64,
    /// Along-track roll constraint weight.
    pub roll_weight: f64,
    /// Along-track yaw constraint weight.
    pub yaw_weight: f64,
    /// Experimental: measure roll/yaw relative to the initial camera
    /// orientation instead of the satellite triad.
    pub initial_camera_constraint: bool,
    /// Anchor points per image; exclusive with the per-tile count.
    pub num_anchor_points_per_image: usize,
    /// Anchor points per 1024 x 1024 tile; exclusive with the per-image
    /// count.
    pub num_anchor_points_per_tile: usize,
    /// Extend anchor placement this many lines before and after a
    /// linescan image.
    pub num_anchor_points_extra_lines: usize,
    /// Weight of each anchor observation.
    pub anchor_weight: f64,
    /// Resample position tables to one sample per this many lines.
    pub num_lines_per_position: Option<usize>,
    /// Resample quaternion tables to one sample per this many lines.
    pub num_lines_per_orientation: Option<usize>,
}

impl Default for JitterSolveOptions {
    fn default() -> Self {
        Self {
            max_init_reproj_error: 10.0,
            robust_threshold: 0.5,
            tri_weight: 0.1,
            tri_robust_threshold: 0.1,
            heights_from_dem_uncertainty: 10.0,
            heights_from_dem_robust_threshold: 0.1,
            camera_position_weight: 0.0,
            camera_position_robust_threshold: 0.1,
            rotation_weight: 0.0,
            quat_norm_weight: 1.0,
            roll_weight: 0.0,
            yaw_weight: 0.0,
            initial_camera_constraint: false,
            num_anchor_points_per_image: 0,
            num_anchor_points_per_tile: 0,
            num_anchor_points_extra_lines: 0,
            anchor_weight: 0.0,
            num_lines_per_position: None,
            num_lines_per_orientation: None,
        }
    }
}

/// Everything the solve consumes: cameras, the control network, the
/// datum, and the optional reference surfaces.
pub struct JitterDataset {
    pub sensors: Vec<Sensor>,
    pub network: ControlNetwork,
    pub datum: Datum,
    /// Orbital group of each camera; frame cameras sharing an arc share
    /// a group.
    pub orbital_groups: Vec<usize>,
    pub rig: Option<RigConfig>,
    /// DEM backing the height constraint.
    pub height_dem: Option<Arc<dyn DemSurface + Send + Sync>>,
    /// DEM used for anchor-point synthesis.
    pub anchor_dem: Option<Arc<dyn DemSurface + Send + Sync>>,
    /// Optional per-point reweighting of match observations.
    pub weight_image: Option<Arc<dyn WeightImage + Send + Sync>>,
    /// Optional gate and scale for anchor points.
    pub anchor_weight_image: Option<Arc<dyn WeightImage + Send + Sync>>,
    /// DEM override of each original network point, filled during adapt.
    pub dem_xyz: Vec<Option<Vec3>>,
}

impl JitterDataset {
    pub fn new(sensors: Vec<Sensor>, network: ControlNetwork, datum: Datum) -> Result<Self> {
        ensure!(!sensors.is_empty(), "no input cameras");
        let orbital_groups = (0..sensors.len()).collect();
        Ok(Self {
            sensors,
            network,
            datum,
            orbital_groups,
            rig: None,
            height_dem: None,
            anchor_dem: None,
            weight_image: None,
            anchor_weight_image: None,
            dem_xyz: Vec::new(),
        })
    }

    /// Normalize quaternions and resample linescan pose tables. Done
    /// before anything reads the tables, so that soft norm constraints
    /// start from a consistent state.
    pub fn normalize_and_resample(&mut self, opts: &JitterSolveOptions) -> Result<()> {
        for sensor in self.sensors.iter_mut() {
            match sensor {
                Sensor::Linescan(ls) => {
                    ls.normalize_quaternions();
                    ls.resample_pose_tables(
                        opts.num_lines_per_position,
                        opts.num_lines_per_orientation,
                    )?;
                }
                Sensor::Frame(f) => f.normalize_quaternion(),
            }
        }
        Ok(())
    }

    /// Flag points whose initial reprojection error exceeds the gate.
    pub fn flag_outliers(&mut self, opts: &JitterSolveOptions) {
        self.network.flag_initial_outliers(
            &self.sensors,
            opts.max_init_reproj_error,
            DEFAULT_PROJECTION_PRECISION,
        );
    }

    /// Re-weight match observations from the weight image; observations
    /// landing outside it or on bad values flag their point as outlier.
    pub fn apply_weight_image(&mut self) {
        let Some(image) = self.weight_image.clone() else {
            return;
        };
        let mut new_outliers = Vec::new();
        for obs in self.network.observations.iter_mut() {
            if obs.is_anchor || self.network.outliers.contains(&obs.point) {
                continue;
            }
            let xyz = self.network.points[obs.point].xyz;
            match image.closest_value(&xyz) {
                Some(w) if w.is_finite() && w > 0.0 => obs.weight = w,
                _ => new_outliers.push(obs.point),
            }
        }
        self.network.outliers.extend(new_outliers);
    }

    /// Override triangulated points from the height DEM and reclassify
    /// them, recording the DEM coordinates for the height constraint.
    pub fn override_points_from_dem(&mut self) -> Result<()> {
        let Some(dem) = self.height_dem.clone() else {
            return Ok(());
        };
        ensure!(
            !self.has_gcps(),
            "found a GCP where not expecting any; GCPs carry their own constraint"
        );
        self.dem_xyz = vec![None; self.network.num_points()];
        for (ipt, point) in self.network.points.iter_mut().enumerate() {
            if self.network.outliers.contains(&ipt) {
                continue;
            }
            if let Some(xyz) = dem_xyz_at_point(dem.as_ref(), &point.xyz) {
                point.xyz = xyz;
                point.kind = PointKind::FromDem;
                self.dem_xyz[ipt] = Some(xyz);
            }
        }
        Ok(())
    }

    fn has_gcps(&self) -> bool {
        self.network.points.iter().any(|p| p.kind == PointKind::Gcp)
    }

    /// True when any sensor adapter cannot guarantee reentrant
    /// projection; the driver then pins the solver to one thread.
    pub fn single_threaded_cameras(&self) -> bool {
        self.sensors.iter().any(|s| !s.thread_safe())
    }
}

pub(crate) fn quat_param_name(camera: usize, index: usize) -> String {
    format!("cam{camera:03}_quat_{index:05}")
}

pub(crate) fn pos_param_name(camera: usize, index: usize) -> String {
    format!("cam{camera:03}_pos_{index:05}")
}

pub(crate) fn point_param_name(index: usize) -> String {
    format!("pt_{index:06}")
}

pub(crate) fn rig_param_name(sensor_id: usize) -> String {
    format!("rig_{sensor_id:02}")
}

/// Solution of a jitter solve, keyed by parameter block name.
pub type JitterSolution = BackendSolution;

/// The wired problem. Parameter blocks are created lazily, on first
/// reference by a residual, so cameras and points that nothing observes
/// contribute no variables and come out of the solve bit-identical.
pub struct JitterProblem {
    opts: JitterSolveOptions,
    ir: ProblemIR,
    initial: HashMap<String, DVector<f64>>,
    param_ids: HashMap<String, ParamId>,
    /// Weight of every wired residual, in residual order; reporting
    /// divides by these.
    weight_per_residual: Vec<f64>,
    /// Median observation weight per (pass, camera); pass 0 is match
    /// points, pass 1 anchors.
    weight_per_cam: [Vec<f64>; 2],
    count_per_cam: [Vec<usize>; 2],
    reproj_wired: bool,
    priors_wired: bool,
}

impl JitterProblem {
    pub fn new(opts: JitterSolveOptions) -> Self {
        Self {
            opts,
            ir: ProblemIR::new(),
            initial: HashMap::new(),
            param_ids: HashMap::new(),
            weight_per_residual: Vec::new(),
            weight_per_cam: [Vec::new(), Vec::new()],
            count_per_cam: [Vec::new(), Vec::new()],
            reproj_wired: false,
            priors_wired: false,
        }
    }

    pub fn ir(&self) -> &ProblemIR {
        &self.ir
    }

    pub fn initial_values(&self) -> &HashMap<String, DVector<f64>> {
        &self.initial
    }

    pub fn weight_per_residual(&self) -> &[f64] {
        &self.weight_per_residual
    }

    fn ensure_param(
        &mut self,
        name: String,
        dim: usize,
        fixed: FixedMask,
        init: DVector<f64>,
    ) -> ParamId {
        if let Some(id) = self.param_ids.get(&name) {
            return *id;
        }
        let id = self.ir.add_param_block(name.clone(), dim, fixed);
        self.initial.insert(name.clone(), init);
        self.param_ids.insert(name, id);
        id
    }

    fn ensure_quat_param(&mut self, dataset: &JitterDataset, camera: usize, index: usize) -> ParamId {
        let init = match &dataset.sensors[camera] {
            Sensor::Linescan(ls) => ls.quaternions.samples[index],
            Sensor::Frame(f) => f.quaternion,
        };
        self.ensure_param(
            quat_param_name(camera, index),
            4,
            FixedMask::all_free(),
            DVector::from_row_slice(init.as_slice()),
        )
    }

    fn ensure_pos_param(&mut self, dataset: &JitterDataset, camera: usize, index: usize) -> ParamId {
        let init = match &dataset.sensors[camera] {
            Sensor::Linescan(ls) => ls.positions.samples[index],
            Sensor::Frame(f) => f.position,
        };
        self.ensure_param(
            pos_param_name(camera, index),
            3,
            FixedMask::all_free(),
            DVector::from_row_slice(init.as_slice()),
        )
    }

    fn ensure_point_param(&mut self, dataset: &JitterDataset, index: usize) -> ParamId {
        let point = &dataset.network.points[index];
        let fixed = if point.kind.is_fixed() { FixedMask::all_fixed(3) } else { FixedMask::all_free() };
        self.ensure_param(
            point_param_name(index),
            3,
            fixed,
            DVector::from_row_slice(point.xyz.as_slice()),
        )
    }

    fn ensure_rig_param(&mut self, dataset: &JitterDataset, sensor_id: usize) -> ParamId {
        let init = dataset
            .rig
            .as_ref()
            .map(|r| r.ref_to_sensor[sensor_id])
            .unwrap_or([0.0; NUM_RIGID_PARAMS]);
        self.ensure_param(
            rig_param_name(sensor_id),
            NUM_RIGID_PARAMS,
            FixedMask::all_free(),
            DVector::from_row_slice(&init),
        )
    }

    /// Wire the reprojection residuals, two passes: match points first,
    /// anchor points second. Collects the per-camera weight statistics
    /// the aggregated position prior needs.
    pub fn wire_reprojection(&mut self, dataset: &JitterDataset) -> Result<()> {
        ensure!(!self.reproj_wired, "reprojection residuals already wired");

        let num_cams = dataset.sensors.len();
        self.weight_per_cam = [vec![0.0; num_cams], vec![0.0; num_cams]];
        self.count_per_cam = [vec![0; num_cams], vec![0; num_cams]];
        let line_buffer = self.opts.max_init_reproj_error + 5.0;

        for pass in 0..2 {
            for icam in 0..num_cams {
                let mut cam_weights: Vec<f64> = Vec::new();

                let observations: Vec<Observation> = dataset
                    .network
                    .observations_for_camera(icam)
                    .copied()
                    .collect();
                for obs in observations {
                    if dataset.network.is_outlier(obs.point) {
                        continue;
                    }
                    if usize::from(obs.is_anchor) != pass {
                        continue;
                    }

                    self.wire_one_reprojection(dataset, &obs, line_buffer)?;
                    self.weight_per_residual.push(obs.weight);
                    self.weight_per_residual.push(obs.weight);

                    // Contribution to the aggregated position prior:
                    // the per-observation weight over the local GSD.
                    let ground = dataset.network.points[obs.point].xyz;
                    let Some(gsd) = estimated_gsd(&dataset.sensors[icam], &obs.pixel, &ground)
                    else {
                        continue;
                    };
                    cam_weights.push(self.opts.camera_position_weight * obs.weight / gsd);
                }

                self.count_per_cam[pass][icam] = cam_weights.len();
                self.weight_per_cam[pass][icam] = if cam_weights.is_empty() {
                    0.0
                } else {
                    destructive_median(&mut cam_weights)
                };
            }
        }

        self.reproj_wired = true;
        Ok(())
    }

    fn wire_one_reprojection(
        &mut self,
        dataset: &JitterDataset,
        obs: &Observation,
        line_buffer: f64,
    ) -> Result<()> {
        let loss = RobustLoss::Cauchy { scale: self.opts.robust_threshold };
        let is_rig_child =
            dataset.rig.as_ref().is_some_and(|rig| !rig.is_ref_camera(obs.camera));

        if !is_rig_child {
            match &dataset.sensors[obs.camera] {
                Sensor::Linescan(ls) => {
                    let window = resolve_ls_window(ls, &obs.pixel, line_buffer)?;
                    let mut params = Vec::with_capacity(window.num_quat() + window.num_pos() + 1);
                    for i in window.beg_quat..window.end_quat {
                        params.push(self.ensure_quat_param(dataset, obs.camera, i));
                    }
                    for i in window.beg_pos..window.end_pos {
                        params.push(self.ensure_pos_param(dataset, obs.camera, i));
                    }
                    params.push(self.ensure_point_param(dataset, obs.point));
                    self.ir.add_residual_block(ResidualBlock {
                        params,
                        loss,
                        factor: FactorKind::LsPixelReproj {
                            camera: obs.camera,
                            pixel: [obs.pixel.x, obs.pixel.y],
                            weight: obs.weight,
                            window,
                        },
                        residual_dim: 2,
                    });
                }
                Sensor::Frame(_) => {
                    let params = vec![
                        self.ensure_pos_param(dataset, obs.camera, 0),
                        self.ensure_quat_param(dataset, obs.camera, 0),
                        self.ensure_point_param(dataset, obs.point),
                    ];
                    self.ir.add_residual_block(ResidualBlock {
                        params,
                        loss,
                        factor: FactorKind::FramePixelReproj {
                            camera: obs.camera,
                            pixel: [obs.pixel.x, obs.pixel.y],
                            weight: obs.weight,
                        },
                        residual_dim: 2,
                    });
                }
            }
            return Ok(());
        }

        let rig = dataset.rig.as_ref().unwrap();
        let ref_camera = rig.ref_camera_of[obs.camera];
        let sensor_id = rig.sensor_of_camera[obs.camera];
        let ref_ls = dataset.sensors[ref_camera]
            .as_linescan()
            .ok_or_else(|| anyhow!("reference camera {ref_camera} must be linescan"))?;

        // Resolve the coupling window on the reference grids from the
        // child's capture times.
        let (window, factor) = match &dataset.sensors[obs.camera] {
            Sensor::Frame(f) => {
                let t = f.time;
                let window = resolve_time_window(ref_ls, t, t)?;
                let factor = FactorKind::RigLsFramePixelReproj {
                    ref_camera,
                    child_camera: obs.camera,
                    pixel: [obs.pixel.x, obs.pixel.y],
                    weight: obs.weight,
                    window,
                };
                (window, factor)
            }
            Sensor::Linescan(child) => {
                let t1 = child.image_time(&Vec2::new(obs.pixel.x, obs.pixel.y - line_buffer));
                let t2 = child.image_time(&Vec2::new(obs.pixel.x, obs.pixel.y + line_buffer));
                let window = resolve_time_window(ref_ls, t1, t2)?;
                let factor = FactorKind::RigLsLsPixelReproj {
                    ref_camera,
                    child_camera: obs.camera,
                    pixel: [obs.pixel.x, obs.pixel.y],
                    weight: obs.weight,
                    window,
                };
                (window, factor)
            }
        };

        let mut params = Vec::with_capacity(window.num_quat() + window.num_pos() + 2);
        for i in window.beg_quat..window.end_quat {
            params.push(self.ensure_quat_param(dataset, ref_camera, i));
        }
        for i in window.beg_pos..window.end_pos {
            params.push(self.ensure_pos_param(dataset, ref_camera, i));
        }
        params.push(self.ensure_rig_param(dataset, sensor_id));
        params.push(self.ensure_point_param(dataset, obs.point));
        self.ir.add_residual_block(ResidualBlock { params, loss, factor, residual_dim: 2 });
        Ok(())
    }

    /// Whether constraint families apply to this camera; on a rig only
    /// the reference sensor carries them.
    fn constrained_camera(&self, dataset: &JitterDataset, icam: usize) -> bool {
        dataset.rig.as_ref().is_none_or(|rig| rig.is_ref_camera(icam))
    }

    /// Wire the soft constraints: DEM heights, triangulation prior,
    /// aggregated camera-position prior, rotation and quaternion-norm
    /// priors, and the optional roll/yaw constraint.
    pub fn wire_priors(&mut self, dataset: &JitterDataset) -> Result<()> {
        ensure!(self.reproj_wired, "wire reprojection residuals before the priors");
        ensure!(!self.priors_wired, "priors already wired");

        self.wire_dem_constraint(dataset)?;
        if self.opts.tri_weight > 0.0 {
            self.wire_tri_constraint(dataset)?;
        }
        if self.opts.camera_position_weight > 0.0 {
            self.wire_camera_position_constraint(dataset)?;
        }
        if self.opts.rotation_weight > 0.0 {
            self.wire_rotation_constraint(dataset);
        }
        if self.opts.quat_norm_weight > 0.0 {
            self.wire_quat_norm_constraint(dataset);
        }
        if self.opts.roll_weight > 0.0 || self.opts.yaw_weight > 0.0 {
            self.wire_roll_yaw_constraint(dataset)?;
        }

        self.priors_wired = true;
        Ok(())
    }

    fn wire_dem_constraint(&mut self, dataset: &JitterDataset) -> Result<()> {
        if dataset.height_dem.is_none() || dataset.dem_xyz.is_empty() {
            return Ok(());
        }
        ensure!(
            self.opts.heights_from_dem_uncertainty > 0.0,
            "the DEM uncertainty must be positive"
        );
        let weight = 1.0 / self.opts.heights_from_dem_uncertainty;
        let threshold = self.opts.heights_from_dem_robust_threshold;
        ensure!(threshold > 0.0, "the DEM robust threshold must be positive");

        for (ipt, dem_xyz) in dataset.dem_xyz.iter().enumerate() {
            if dataset.network.is_outlier(ipt) {
                continue;
            }
            let Some(observation) = dem_xyz else {
                continue;
            };
            let params = vec![self.ensure_point_param(dataset, ipt)];
            self.ir.add_residual_block(ResidualBlock {
                params,
                loss: RobustLoss::Cauchy { scale: threshold },
                factor: FactorKind::XyzPrior {
                    observation: [observation.x, observation.y, observation.z],
                    weight,
                },
                residual_dim: 3,
            });
            for _ in 0..3 {
                self.weight_per_residual.push(weight);
            }
        }
        Ok(())
    }

    fn wire_tri_constraint(&mut self, dataset: &JitterDataset) -> Result<()> {
        let gsds = estimate_gsd_per_point(&dataset.sensors, &dataset.network);
        for (ipt, point) in dataset.network.points.iter().enumerate() {
            // GCPs, DEM-constrained, and anchor points have their own
            // handling.
            if point.kind != PointKind::Free || dataset.network.is_outlier(ipt) {
                continue;
            }
            let gsd = gsds[ipt];
            if gsd <= 0.0 {
                continue;
            }
            // Division by GSD turns metric drift into pixel-equivalent
            // units, so the weight means the same thing as a pixel
            // weight.
            let weight = self.opts.tri_weight / gsd;
            let params = vec![self.ensure_point_param(dataset, ipt)];
            self.ir.add_residual_block(ResidualBlock {
                params,
                loss: RobustLoss::Cauchy { scale: self.opts.tri_robust_threshold },
                factor: FactorKind::XyzPrior {
                    observation: [point.xyz.x, point.xyz.y, point.xyz.z],
                    weight,
                },
                residual_dim: 3,
            });
            for _ in 0..3 {
                self.weight_per_residual.push(self.opts.tri_weight);
            }
        }
        Ok(())
    }

    fn wire_camera_position_constraint(&mut self, dataset: &JitterDataset) -> Result<()> {
        for pass in 0..2 {
            for icam in 0..dataset.sensors.len() {
                if !self.constrained_camera(dataset, icam) {
                    continue;
                }
                let count = self.count_per_cam[pass][icam];
                if count == 0 {
                    continue;
                }
                let median_wt = self.weight_per_cam[pass][icam];

                // Under least squares, n residuals with weight w and
                // threshold t behave like one with sqrt(n) * w and
                // sqrt(n) * t.
                let combined_wt = (count as f64).sqrt() * median_wt;
                let combined_th =
                    (count as f64).sqrt() * self.opts.camera_position_robust_threshold;

                match &dataset.sensors[icam] {
                    Sensor::Linescan(ls) => {
                        // The samples divide the job of holding the
                        // camera in place, so the weight divides among
                        // them.
                        let num_pos = ls.num_positions();
                        let wt = combined_wt / (num_pos as f64).sqrt();
                        let th = combined_th / (num_pos as f64).sqrt();
                        for ip in 0..num_pos {
                            let initial = ls.positions.samples[ip];
                            let params = vec![self.ensure_pos_param(dataset, icam, ip)];
                            self.ir.add_residual_block(ResidualBlock {
                                params,
                                loss: RobustLoss::Cauchy { scale: th },
                                factor: FactorKind::TranslationPrior {
                                    initial: [initial.x, initial.y, initial.z],
                                    weight: wt,
                                },
                                residual_dim: 3,
                            });
                            for _ in 0..3 {
                                self.weight_per_residual.push(wt);
                            }
                        }
                    }
                    Sensor::Frame(f) => {
                        let initial = f.position;
                        let params = vec![self.ensure_pos_param(dataset, icam, 0)];
                        self.ir.add_residual_block(ResidualBlock {
                            params,
                            loss: RobustLoss::Cauchy { scale: combined_th },
                            factor: FactorKind::TranslationPrior {
                                initial: [initial.x, initial.y, initial.z],
                                weight: combined_wt,
                            },
                            residual_dim: 3,
                        });
                        for _ in 0..3 {
                            self.weight_per_residual.push(combined_wt);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn wire_rotation_constraint(&mut self, dataset: &JitterDataset) {
        let weight = self.opts.rotation_weight;
        for icam in 0..dataset.sensors.len() {
            if !self.constrained_camera(dataset, icam) {
                continue;
            }
            let num_quat = match &dataset.sensors[icam] {
                Sensor::Linescan(ls) => ls.num_quaternions(),
                Sensor::Frame(_) => 1,
            };
            for iq in 0..num_quat {
                let initial = match &dataset.sensors[icam] {
                    Sensor::Linescan(ls) => ls.quaternions.samples[iq],
                    Sensor::Frame(f) => f.quaternion,
                };
                let params = vec![self.ensure_quat_param(dataset, icam, iq)];
                self.ir.add_residual_block(ResidualBlock {
                    params,
                    loss: RobustLoss::None,
                    factor: FactorKind::RotationPrior {
                        initial: [initial.x, initial.y, initial.z, initial.w],
                        weight,
                    },
                    residual_dim: 4,
                });
                for _ in 0..4 {
                    self.weight_per_residual.push(weight);
                }
            }
        }
    }

    fn wire_quat_norm_constraint(&mut self, dataset: &JitterDataset) {
        let weight = self.opts.quat_norm_weight;
        for icam in 0..dataset.sensors.len() {
            if !self.constrained_camera(dataset, icam) {
                continue;
            }
            let num_quat = match &dataset.sensors[icam] {
                Sensor::Linescan(ls) => ls.num_quaternions(),
                Sensor::Frame(_) => 1,
            };
            for iq in 0..num_quat {
                let params = vec![self.ensure_quat_param(dataset, icam, iq)];
                self.ir.add_residual_block(ResidualBlock {
                    params,
                    loss: RobustLoss::None,
                    factor: FactorKind::QuatNorm { weight },
                    residual_dim: 1,
                });
                self.weight_per_residual.push(weight);
            }
        }
    }

    fn wire_roll_yaw_constraint(&mut self, dataset: &JitterDataset) -> Result<()> {
        ensure!(dataset.rig.is_none(), "the roll/yaw constraint cannot be used with a rig");
        ensure!(
            self.opts.roll_weight > 0.0 || self.opts.yaw_weight > 0.0,
            "the roll or yaw weight must be positive"
        );
        ensure!(
            dataset.orbital_groups.len() == dataset.sensors.len(),
            "every camera needs an orbital group for the roll/yaw constraint"
        );

        // Recorded weights must stay positive: reporting divides by them.
        let roll_record = if self.opts.roll_weight > 0.0 { self.opts.roll_weight } else { 1.0 };
        let yaw_record = if self.opts.yaw_weight > 0.0 { self.opts.yaw_weight } else { 1.0 };

        for icam in 0..dataset.sensors.len() {
            match &dataset.sensors[icam] {
                Sensor::Linescan(ls) => {
                    // Make positions one-to-one with the quaternion
                    // samples, extrapolating at the table ends.
                    let positions: Vec<Vec3> = (0..ls.num_quaternions())
                        .map(|k| {
                            ls.positions
                                .interpolate(ls.quaternions.t0 + k as f64 * ls.quaternions.dt)
                        })
                        .collect();
                    for iq in 0..ls.num_quaternions() {
                        let ctx = match RollYawContext::new(
                            &positions,
                            &ls.quaternions.samples,
                            &dataset.datum,
                            iq,
                        ) {
                            Ok(ctx) => ctx,
                            Err(err) => {
                                warn!("skipping roll/yaw constraint for camera {icam} sample {iq}: {err}");
                                continue;
                            }
                        };
                        self.push_roll_yaw_residual(dataset, icam, iq, ctx);
                        self.weight_per_residual.push(roll_record);
                        self.weight_per_residual.push(yaw_record);
                    }
                }
                Sensor::Frame(_) => {
                    let group = dataset.orbital_groups[icam];
                    let mut members: Vec<usize> = (0..dataset.sensors.len())
                        .filter(|&c| {
                            dataset.orbital_groups[c] == group
                                && dataset.sensors[c].as_frame().is_some()
                        })
                        .collect();
                    members.sort_by(|&a, &b| {
                        let ta = dataset.sensors[a].as_frame().unwrap().time;
                        let tb = dataset.sensors[b].as_frame().unwrap().time;
                        ta.partial_cmp(&tb).unwrap()
                    });
                    if members.len() < 2 {
                        warn!(
                            "cannot add a roll/yaw constraint for an orbital group with a single frame camera"
                        );
                        continue;
                    }
                    let positions: Vec<Vec3> = members
                        .iter()
                        .map(|&c| dataset.sensors[c].as_frame().unwrap().position)
                        .collect();
                    let quaternions: Vec<Vec4> = members
                        .iter()
                        .map(|&c| dataset.sensors[c].as_frame().unwrap().quaternion)
                        .collect();
                    let index_in_group =
                        members.iter().position(|&c| c == icam).expect("member list covers icam");
                    let ctx = match RollYawContext::new(
                        &positions,
                        &quaternions,
                        &dataset.datum,
                        index_in_group,
                    ) {
                        Ok(ctx) => ctx,
                        Err(err) => {
                            warn!("skipping roll/yaw constraint for frame camera {icam}: {err}");
                            continue;
                        }
                    };
                    self.push_roll_yaw_residual(dataset, icam, 0, ctx);
                    self.weight_per_residual.push(roll_record);
                    self.weight_per_residual.push(yaw_record);
                }
            }
        }
        Ok(())
    }

    fn push_roll_yaw_residual(
        &mut self,
        dataset: &JitterDataset,
        camera: usize,
        quat_index: usize,
        ctx: RollYawContext,
    ) {
        let params = vec![self.ensure_quat_param(dataset, camera, quat_index)];
        self.ir.add_residual_block(ResidualBlock {
            params,
            loss: RobustLoss::None,
            factor: FactorKind::RollYaw {
                sat2world: ctx.sat2world,
                rot_xy: ctx.rot_xy,
                init_cam2world: ctx.init_cam2world,
                roll_weight: self.opts.roll_weight,
                yaw_weight: self.opts.yaw_weight,
                relative_to_initial: self.opts.initial_camera_constraint,
            },
            residual_dim: 2,
        });
    }

    /// Run the solver over the wired problem.
    pub fn solve(
        &self,
        dataset: &JitterDataset,
        backend_opts: &BackendSolveOptions,
    ) -> Result<JitterSolution> {
        ensure!(self.reproj_wired && self.priors_wired, "wire the problem before solving");
        let snapshots = SensorSnapshots::capture(&dataset.sensors);
        solve_with_backend(BackendKind::TinySolver, &self.ir, &snapshots, &self.initial, backend_opts)
    }

    /// Commit the solution back into the sensors, points, and rig.
    /// Blocks absent from the solution (nothing referenced them) leave
    /// their sensor state untouched.
    pub fn commit(&self, solution: &JitterSolution, dataset: &mut JitterDataset) -> Result<()> {
        for (icam, sensor) in dataset.sensors.iter_mut().enumerate() {
            match sensor {
                Sensor::Linescan(ls) => {
                    for iq in 0..ls.num_quaternions() {
                        if let Some(v) = solution.params.get(&quat_param_name(icam, iq)) {
                            ensure!(v.len() == 4, "bad quaternion block size");
                            ls.quaternions.samples[iq] = Vec4::new(v[0], v[1], v[2], v[3]);
                        }
                    }
                    for ip in 0..ls.num_positions() {
                        if let Some(v) = solution.params.get(&pos_param_name(icam, ip)) {
                            ensure!(v.len() == 3, "bad position block size");
                            ls.positions.samples[ip] = Vec3::new(v[0], v[1], v[2]);
                        }
                    }
                }
                Sensor::Frame(f) => {
                    if let Some(v) = solution.params.get(&pos_param_name(icam, 0)) {
                        ensure!(v.len() == 3, "bad position block size");
                        f.position = Vec3::new(v[0], v[1], v[2]);
                    }
                    if let Some(v) = solution.params.get(&quat_param_name(icam, 0)) {
                        ensure!(v.len() == 4, "bad quaternion block size");
                        f.quaternion = Vec4::new(v[0], v[1], v[2], v[3]);
                    }
                }
            }
        }

        for (ipt, point) in dataset.network.points.iter_mut().enumerate() {
            if point.kind.is_fixed() {
                continue;
            }
            if let Some(v) = solution.params.get(&point_param_name(ipt)) {
                ensure!(v.len() == 3, "bad point block size");
                point.xyz = Vec3::new(v[0], v[1], v[2]);
            }
        }

        if let Some(rig) = dataset.rig.as_mut() {
            for sensor_id in 0..rig.num_sensors {
                if let Some(v) = solution.params.get(&rig_param_name(sensor_id)) {
                    ensure!(v.len() == NUM_RIGID_PARAMS, "bad rig block size");
                    let mut transform = [0.0; NUM_RIGID_PARAMS];
                    transform.copy_from_slice(v.as_slice());
                    rig.ref_to_sensor[sensor_id] = transform;
                }
            }
        }
        Ok(())
    }
}

/// Pixel residual of one observation against the dataset's current
/// state: `projected - observed`, unweighted. `None` when the
/// projection fails or the point is an outlier.
pub fn observation_residual(dataset: &JitterDataset, obs: &Observation) -> Option<Vec2> {
    if dataset.network.is_outlier(obs.point) {
        return None;
    }
    let ground = dataset.network.points[obs.point].xyz;
    let is_rig_child = dataset.rig.as_ref().is_some_and(|rig| !rig.is_ref_camera(obs.camera));

    let projected = if !is_rig_child {
        dataset.sensors[obs.camera]
            .ground_to_image(&ground, DEFAULT_PROJECTION_PRECISION)
            .ok()?
    } else {
        let rig = dataset.rig.as_ref().unwrap();
        let ref_camera = rig.ref_camera_of[obs.camera];
        let sensor_id = rig.sensor_of_camera[obs.camera];
        let ref_ls = dataset.sensors[ref_camera].as_linescan()?;
        let rig_vec = DVector::from_row_slice(&rig.ref_to_sensor[sensor_id]);
        let (rig_rotation, rig_translation) = rig_transform_parts(&rig_vec);

        let view = ref_ls.pose_view();
        match &dataset.sensors[obs.camera] {
            Sensor::Frame(f) => {
                let (ref_center, ref_rotation) = view.pose_at(&f.time);
                let (center, rotation) = compose_child_pose(
                    &ref_center,
                    &ref_rotation,
                    &rig_rotation,
                    &rig_translation,
                );
                frame_project_with_pose(&f.geometry, &center, &rotation, &ground).ok()?
            }
            Sensor::Linescan(child) => {
                let pose_at = |t: &f64| {
                    let (ref_center, ref_rotation) = view.pose_at(t);
                    compose_child_pose(&ref_center, &ref_rotation, &rig_rotation, &rig_translation)
                };
                ls_project_with_pose(
                    &child.geometry,
                    pose_at,
                    &ground,
                    DEFAULT_PROJECTION_PRECISION,
                )
                .ok()?
            }
        }
    };
    Some(projected - obs.pixel)
}

