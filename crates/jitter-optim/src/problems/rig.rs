//! Rig configuration: rigidly mounted sensors sharing one trajectory.
//!
//! On a rig only the reference sensor keeps independent pose tables.
//! Every other sensor's pose is the reference pose composed with a
//! 6-DOF `ref -> sensor` transform, and those transforms are the only
//! per-sensor parameters the solve adds.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use jitter_core::sensors::Sensor;

/// Number of scalars in a rigid `ref -> sensor` transform:
/// axis-angle rotation plus translation.
pub const NUM_RIGID_PARAMS: usize = 6;

/// Rig layout and its current transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Number of sensors on the rig.
    pub num_sensors: usize,
    /// Sensor id of the reference sensor.
    pub ref_sensor: usize,
    /// Sensor id of each camera (acquisition).
    pub sensor_of_camera: Vec<usize>,
    /// For each camera, the index of the reference-sensor camera whose
    /// timeline covers it. Reference cameras point at themselves.
    pub ref_camera_of: Vec<usize>,
    /// Per sensor, the `ref -> sensor` transform as
    /// `[axis-angle, translation]`. Identity for the reference sensor.
    pub ref_to_sensor: Vec<[f64; NUM_RIGID_PARAMS]>,
}

impl RigConfig {
    /// A rig where every non-reference transform starts at identity and
    /// is recovered by the solve.
    pub fn with_identity_transforms(
        num_sensors: usize,
        ref_sensor: usize,
        sensor_of_camera: Vec<usize>,
        ref_camera_of: Vec<usize>,
    ) -> Self {
        Self {
            num_sensors,
            ref_sensor,
            sensor_of_camera,
            ref_camera_of,
            ref_to_sensor: vec![[0.0; NUM_RIGID_PARAMS]; num_sensors],
        }
    }

    pub fn is_ref_sensor(&self, sensor_id: usize) -> bool {
        sensor_id == self.ref_sensor
    }

    pub fn is_ref_camera(&self, camera: usize) -> bool {
        self.sensor_of_camera[camera] == self.ref_sensor
    }

    /// Check the layout against the loaded cameras.
    pub fn validate(&self, sensors: &[Sensor]) -> Result<()> {
        ensure!(self.num_sensors >= 2, "a rig needs at least two sensors");
        ensure!(self.ref_sensor < self.num_sensors, "reference sensor id out of range");
        ensure!(
            self.sensor_of_camera.len() == sensors.len(),
            "rig maps {} cameras but {} were loaded",
            self.sensor_of_camera.len(),
            sensors.len()
        );
        ensure!(
            self.ref_camera_of.len() == sensors.len(),
            "rig reference-camera map has {} entries for {} cameras",
            self.ref_camera_of.len(),
            sensors.len()
        );
        ensure!(
            self.ref_to_sensor.len() == self.num_sensors,
            "rig has {} transforms for {} sensors",
            self.ref_to_sensor.len(),
            self.num_sensors
        );

        for (camera, &sensor_id) in self.sensor_of_camera.iter().enumerate() {
            ensure!(sensor_id < self.num_sensors, "camera {camera} has sensor id out of range");
            let ref_camera = self.ref_camera_of[camera];
            ensure!(ref_camera < sensors.len(), "camera {camera} references missing camera");
            ensure!(
                self.is_ref_camera(ref_camera),
                "camera {camera} references camera {ref_camera}, which is not on the reference sensor"
            );
            // The composition interpolates the reference pose tables, so
            // the reference acquisitions must be linescan.
            ensure!(
                sensors[ref_camera].is_linescan(),
                "reference camera {ref_camera} must be linescan"
            );
        }

        let ref_transform = &self.ref_to_sensor[self.ref_sensor];
        ensure!(
            ref_transform.iter().all(|v| *v == 0.0),
            "the reference sensor's own transform must stay identity"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rig_has_zero_transforms() {
        let rig = RigConfig::with_identity_transforms(2, 0, vec![0, 1], vec![0, 0]);
        assert!(rig.is_ref_sensor(0));
        assert!(!rig.is_ref_sensor(1));
        assert_eq!(rig.ref_to_sensor[1], [0.0; NUM_RIGID_PARAMS]);
    }
}
