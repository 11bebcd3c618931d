//! Control-network types: triangulated points and pixel observations.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::math::{Vec2, Vec3};
use crate::sensors::Sensor;

/// Classification of a triangulated point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PointKind {
    /// Free to move during the solve.
    Free,
    /// Overridden from the reference DEM; gets the DEM constraint
    /// instead of the triangulation prior.
    FromDem,
    /// Ground control point; immutable.
    Gcp,
    /// Synthesized anchor point; immutable.
    Anchor,
}

impl PointKind {
    /// Anchor and GCP points are constant parameter blocks.
    pub fn is_fixed(self) -> bool {
        matches!(self, PointKind::Anchor | PointKind::Gcp)
    }
}

/// A triangulated ground point in ECEF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangulatedPoint {
    pub xyz: Vec3,
    pub kind: PointKind,
}

/// One pixel observation tying a camera to a triangulated point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub camera: usize,
    pub pixel: Vec2,
    pub point: usize,
    pub weight: f64,
    pub is_anchor: bool,
}

/// The pre-triangulated control network the solve consumes.
///
/// Points and observations are appended at setup (anchor synthesis adds
/// more of both) and never removed; indices into `points` stay stable
/// for the lifetime of the problem.
#[derive(Debug, Clone, Default)]
pub struct ControlNetwork {
    pub points: Vec<TriangulatedPoint>,
    pub observations: Vec<Observation>,
    pub outliers: HashSet<usize>,
}

impl ControlNetwork {
    pub fn new(points: Vec<TriangulatedPoint>, observations: Vec<Observation>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::Setup("no triangulated ground points were found".to_string()));
        }
        for (i, obs) in observations.iter().enumerate() {
            if obs.point >= points.len() {
                return Err(Error::Setup(format!(
                    "observation {i} references missing point {}",
                    obs.point
                )));
            }
            if obs.weight <= 0.0 {
                return Err(Error::Setup(format!(
                    "observation {i} has non-positive weight {}",
                    obs.weight
                )));
            }
        }
        Ok(Self { points, observations, outliers: HashSet::new() })
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn is_outlier(&self, point: usize) -> bool {
        self.outliers.contains(&point)
    }

    /// Observations of one camera, in insertion order.
    pub fn observations_for_camera(&self, camera: usize) -> impl Iterator<Item = &Observation> {
        self.observations.iter().filter(move |o| o.camera == camera)
    }

    /// Flag as outliers all points whose initial reprojection error in
    /// any observing camera exceeds `max_error` pixels. Input cameras
    /// are bundle-adjusted, so this gate is expected to trim little.
    pub fn flag_initial_outliers(&mut self, sensors: &[Sensor], max_error: f64, precision: f64) {
        let mut flagged = HashSet::new();
        for obs in &self.observations {
            if flagged.contains(&obs.point) {
                continue;
            }
            let point = &self.points[obs.point];
            match sensors[obs.camera].ground_to_image(&point.xyz, precision) {
                Ok(projected) => {
                    if (projected - obs.pixel).norm() > max_error {
                        flagged.insert(obs.point);
                    }
                }
                Err(_) => {
                    flagged.insert(obs.point);
                }
            }
        }
        self.outliers.extend(flagged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dangling_observation() {
        let points = vec![TriangulatedPoint { xyz: Vec3::zeros(), kind: PointKind::Free }];
        let observations = vec![Observation {
            camera: 0,
            pixel: Vec2::new(1.0, 2.0),
            point: 3,
            weight: 1.0,
            is_anchor: false,
        }];
        assert!(ControlNetwork::new(points, observations).is_err());
    }

    #[test]
    fn rejects_non_positive_weight() {
        let points = vec![TriangulatedPoint { xyz: Vec3::zeros(), kind: PointKind::Free }];
        let observations = vec![Observation {
            camera: 0,
            pixel: Vec2::new(1.0, 2.0),
            point: 0,
            weight: 0.0,
            is_anchor: false,
        }];
        assert!(ControlNetwork::new(points, observations).is_err());
    }
}
