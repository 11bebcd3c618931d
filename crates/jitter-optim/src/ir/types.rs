use anyhow::{anyhow, ensure, Result};
use std::collections::HashSet;

use crate::coupling::CouplingWindow;

/// Identifier for a parameter block in the IR.
///
/// Stable within a `ProblemIR` instance; residual blocks use it to
/// reference their parameter dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(pub usize);

/// Fixed parameter mask for a block.
///
/// Backends interpret this as per-index fixing; anchor and ground
/// control points fix all three coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedMask {
    fixed_indices: HashSet<usize>,
}

impl FixedMask {
    /// Creates a mask with no fixed indices.
    pub fn all_free() -> Self {
        Self { fixed_indices: HashSet::new() }
    }

    /// Creates a mask with all indices fixed.
    pub fn all_fixed(dim: usize) -> Self {
        Self { fixed_indices: (0..dim).collect() }
    }

    /// Returns `true` if all indices `[0, dim)` are fixed.
    pub fn is_all_fixed(&self, dim: usize) -> bool {
        self.fixed_indices.len() == dim
    }

    /// Iterates over fixed indices.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.fixed_indices.iter().copied()
    }

    /// Returns `true` if no indices are fixed.
    pub fn is_empty(&self) -> bool {
        self.fixed_indices.is_empty()
    }
}

/// Robust loss applied to a residual block.
///
/// Reprojection and point constraints use Cauchy; the quaternion
/// constraints run without a loss, as orientations have no outliers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RobustLoss {
    #[default]
    None,
    Cauchy {
        scale: f64,
    },
}

/// Backend-agnostic factor kinds.
///
/// Each factor kind implies its parameter layout and residual dimension.
/// Factors are pure data; the backend binds reprojection factors to
/// immutable sensor snapshots at compile time.
#[derive(Debug, Clone, PartialEq)]
pub enum FactorKind {
    /// Linescan reprojection.
    ///
    /// Parameters: the quaternion blocks of `window`, then the position
    /// blocks of `window`, then the triangulated point.
    LsPixelReproj {
        camera: usize,
        pixel: [f64; 2],
        weight: f64,
        window: CouplingWindow,
    },
    /// Frame reprojection.
    ///
    /// Parameters: `[position, quaternion, point]`.
    FramePixelReproj {
        camera: usize,
        pixel: [f64; 2],
        weight: f64,
    },
    /// Rig-composed reprojection into a frame child sensor.
    ///
    /// Parameters: reference quaternion blocks of `window`, reference
    /// position blocks of `window`, the 6-DOF `ref -> child` transform,
    /// and the point. The child's own pose is derived, not read.
    RigLsFramePixelReproj {
        ref_camera: usize,
        child_camera: usize,
        pixel: [f64; 2],
        weight: f64,
        window: CouplingWindow,
    },
    /// Rig-composed reprojection into a linescan child sensor.
    ///
    /// Same parameter layout as [`FactorKind::RigLsFramePixelReproj`],
    /// with the window resolved on the reference sensor's grids from the
    /// child pixel's time bracket.
    RigLsLsPixelReproj {
        ref_camera: usize,
        child_camera: usize,
        pixel: [f64; 2],
        weight: f64,
        window: CouplingWindow,
    },
    /// Weighted difference between a 3D point and a fixed observation.
    /// Serves both the DEM constraint and the triangulation prior.
    XyzPrior { observation: [f64; 3], weight: f64 },
    /// Weighted difference between a position sample and its initial
    /// value.
    TranslationPrior { initial: [f64; 3], weight: f64 },
    /// Weighted difference between a quaternion sample and its initial
    /// value.
    RotationPrior { initial: [f64; 4], weight: f64 },
    /// Weighted deviation of a quaternion's squared norm from one.
    QuatNorm { weight: f64 },
    /// Roll and yaw of a camera orientation measured against the
    /// along-track triad (or against the initial camera orientation in
    /// the experimental relative mode).
    ///
    /// Parameters: `[quaternion]`. Matrices are row-major.
    RollYaw {
        sat2world: [[f64; 3]; 3],
        rot_xy: [[f64; 3]; 3],
        init_cam2world: [[f64; 3]; 3],
        roll_weight: f64,
        yaw_weight: f64,
        relative_to_initial: bool,
    },
}

impl FactorKind {
    /// Residual dimension implied by the factor.
    pub fn residual_dim(&self) -> usize {
        match self {
            FactorKind::LsPixelReproj { .. } => 2,
            FactorKind::FramePixelReproj { .. } => 2,
            FactorKind::RigLsFramePixelReproj { .. } => 2,
            FactorKind::RigLsLsPixelReproj { .. } => 2,
            FactorKind::XyzPrior { .. } => 3,
            FactorKind::TranslationPrior { .. } => 3,
            FactorKind::RotationPrior { .. } => 4,
            FactorKind::QuatNorm { .. } => 1,
            FactorKind::RollYaw { .. } => 2,
        }
    }
}

/// Parameter block definition in the IR.
#[derive(Debug, Clone)]
pub struct ParamBlock {
    pub id: ParamId,
    pub name: String,
    pub dim: usize,
    pub fixed: FixedMask,
}

/// Residual block definition in the IR.
///
/// The order of `params` must match the factor's expected parameter
/// order.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub params: Vec<ParamId>,
    pub loss: RobustLoss,
    pub factor: FactorKind,
    pub residual_dim: usize,
}

/// Backend-agnostic optimization problem representation.
#[derive(Debug, Default, Clone)]
pub struct ProblemIR {
    pub params: Vec<ParamBlock>,
    pub residuals: Vec<ResidualBlock>,
}

impl ProblemIR {
    /// Creates an empty IR.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter block and returns its `ParamId`.
    pub fn add_param_block(
        &mut self,
        name: impl Into<String>,
        dim: usize,
        fixed: FixedMask,
    ) -> ParamId {
        let id = ParamId(self.params.len());
        self.params.push(ParamBlock { id, name: name.into(), dim, fixed });
        id
    }

    /// Adds a residual block to the IR.
    pub fn add_residual_block(&mut self, residual: ResidualBlock) {
        self.residuals.push(residual);
    }

    /// Finds a parameter by name.
    pub fn param_by_name(&self, name: &str) -> Option<ParamId> {
        self.params.iter().find(|p| p.name == name).map(|p| p.id)
    }

    fn check_dims(&self, r_idx: usize, params: &[ParamId], dims: &[usize]) -> Result<()> {
        ensure!(
            params.len() == dims.len(),
            "residual {} has {} params, factor expects {}",
            r_idx,
            params.len(),
            dims.len()
        );
        for (param, dim) in params.iter().zip(dims) {
            let block = &self.params[param.0];
            ensure!(
                block.dim == *dim,
                "residual {} param {} has dim {}, expected {}",
                r_idx,
                block.name,
                block.dim,
                dim
            );
        }
        Ok(())
    }

    /// Validates internal consistency and factor expectations.
    pub fn validate(&self) -> Result<()> {
        for (idx, param) in self.params.iter().enumerate() {
            ensure!(
                param.id.0 == idx,
                "param id mismatch: expected {}, got {:?}",
                idx,
                param.id
            );
            for fixed_idx in param.fixed.iter() {
                ensure!(
                    fixed_idx < param.dim,
                    "param {} fixed index {} out of range",
                    param.name,
                    fixed_idx
                );
            }
        }

        for (r_idx, residual) in self.residuals.iter().enumerate() {
            ensure!(
                residual.residual_dim == residual.factor.residual_dim(),
                "residual {} dim {} does not match factor expectation {}",
                r_idx,
                residual.residual_dim,
                residual.factor.residual_dim()
            );
            for param in &residual.params {
                ensure!(
                    param.0 < self.params.len(),
                    "residual {} references missing param {:?}",
                    r_idx,
                    param
                );
            }

            match &residual.factor {
                FactorKind::LsPixelReproj { window, .. }
                | FactorKind::RigLsFramePixelReproj { window, .. }
                | FactorKind::RigLsLsPixelReproj { window, .. } => {
                    let has_rig = !matches!(residual.factor, FactorKind::LsPixelReproj { .. });
                    let mut dims = vec![4; window.num_quat()];
                    dims.extend(vec![3; window.num_pos()]);
                    if has_rig {
                        dims.push(6);
                    }
                    dims.push(3);
                    self.check_dims(r_idx, &residual.params, &dims)?;
                }
                FactorKind::FramePixelReproj { .. } => {
                    self.check_dims(r_idx, &residual.params, &[3, 4, 3])?;
                }
                FactorKind::XyzPrior { weight, .. } => {
                    ensure!(*weight > 0.0, "residual {} has non-positive weight", r_idx);
                    self.check_dims(r_idx, &residual.params, &[3])?;
                }
                FactorKind::TranslationPrior { .. } => {
                    self.check_dims(r_idx, &residual.params, &[3])?;
                }
                FactorKind::RotationPrior { .. } | FactorKind::QuatNorm { .. } => {
                    self.check_dims(r_idx, &residual.params, &[4])?;
                }
                FactorKind::RollYaw { roll_weight, yaw_weight, .. } => {
                    ensure!(
                        *roll_weight >= 0.0 && *yaw_weight >= 0.0,
                        "residual {} has negative roll/yaw weight",
                        r_idx
                    );
                    self.check_dims(r_idx, &residual.params, &[4])?;
                }
            }

            if let RobustLoss::Cauchy { scale } = residual.loss {
                ensure!(scale > 0.0, "residual {} has non-positive Cauchy scale", r_idx);
            }
        }

        Ok(())
    }

    /// Parameter names referenced by residual `r_idx`, in wiring order.
    pub fn residual_param_names(&self, r_idx: usize) -> Result<Vec<&str>> {
        let residual = self
            .residuals
            .get(r_idx)
            .ok_or_else(|| anyhow!("no residual with index {r_idx}"))?;
        Ok(residual
            .params
            .iter()
            .map(|id| self.params[id.0].name.as_str())
            .collect())
    }
}
