//! Driver state-machine tests over a synthetic scene.

use nalgebra::UnitQuaternion;

use jitter_core::dem::{ray_dem_intersection, ConstantDem};
use jitter_core::math::{Datum, Mat3, Vec2, Vec3, Vec4};
use jitter_core::network::{ControlNetwork, Observation, PointKind, TriangulatedPoint};
use jitter_core::sensors::{
    LinescanGeometry, LinescanSensor, Sensor, DEFAULT_PROJECTION_PRECISION,
};
use jitter_core::tables::{PositionTable, QuaternionTable};
use jitter_pipeline::{JitterConfig, JitterDriver, SolveState};

const ORBIT_HEIGHT: f64 = 500_000.0;
const LON0: f64 = 10.0;
const LAT0: f64 = 20.0;
const LAT_RATE: f64 = 0.001;

fn nadir_cam2world(lon_deg: f64, lat_deg: f64) -> Vec4 {
    let lon = lon_deg.to_radians();
    let lat = lat_deg.to_radians();
    let east = Vec3::new(-lon.sin(), lon.cos(), 0.0);
    let north = Vec3::new(-lat.sin() * lon.cos(), -lat.sin() * lon.sin(), lat.cos());
    let up = Vec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin());
    let q = UnitQuaternion::from_matrix(&Mat3::from_columns(&[-east, north, -up]));
    Vec4::new(q.i, q.j, q.k, q.w)
}

fn orbital_linescan(num_pose: usize) -> LinescanSensor {
    let datum = Datum::WGS84;
    let geometry = LinescanGeometry {
        num_lines: 1000,
        num_samples: 400,
        focal_length: 50_000.0,
        detector_origin: 200.0,
        t0_line: 0.0,
        dt_line: 0.09,
    };
    let t0 = -5.0;
    let dt = 100.0 / (num_pose - 1) as f64;
    let mut positions = Vec::new();
    let mut quaternions = Vec::new();
    for i in 0..num_pose {
        let lat = LAT0 + LAT_RATE * (t0 + i as f64 * dt);
        positions.push(datum.geodetic_to_ecef(LON0, lat, ORBIT_HEIGHT));
        quaternions.push(nadir_cam2world(LON0, lat));
    }
    LinescanSensor::new(
        geometry,
        PositionTable::new(t0, dt, positions).unwrap(),
        QuaternionTable::new(t0, dt, quaternions).unwrap(),
    )
    .unwrap()
}

fn build_dataset() -> jitter_optim::problems::jitter::JitterDataset {
    let sensor = Sensor::Linescan(orbital_linescan(16));
    let dem = ConstantDem { datum: Datum::WGS84, height: 0.0 };

    let mut points = Vec::new();
    let mut observations = Vec::new();
    for i in 0..6 {
        let pixel = Vec2::new(80.0 + 40.0 * i as f64, 150.0 + 120.0 * i as f64);
        let center = sensor.camera_center(&pixel);
        let dir = sensor.pixel_to_vector(&pixel);
        let ground = ray_dem_intersection(&center, &dir, &dem).unwrap();
        let projected = sensor.ground_to_image(&ground, DEFAULT_PROJECTION_PRECISION).unwrap();
        // Observations see the truth; the stored point starts displaced.
        points.push(TriangulatedPoint {
            xyz: ground + Vec3::new(1.5, -1.0, 0.5),
            kind: PointKind::Free,
        });
        observations.push(Observation {
            camera: 0,
            pixel: projected,
            point: i,
            weight: 1.0,
            is_anchor: false,
        });
    }
    let network = ControlNetwork::new(points, observations).unwrap();
    jitter_optim::problems::jitter::JitterDataset::new(vec![sensor], network, Datum::WGS84)
        .unwrap()
}

#[test]
fn driver_walks_every_state_in_order() {
    let config = JitterConfig { num_iterations: 20, ..Default::default() };
    let mut driver = JitterDriver::new(config, build_dataset()).unwrap();

    let expected = [
        SolveState::Adapt,
        SolveState::WireReproj,
        SolveState::WirePriors,
        SolveState::Solve,
        SolveState::Commit,
        SolveState::Done,
    ];
    for state in expected {
        assert_eq!(driver.step().unwrap(), state);
    }
    // Stepping past Done is a no-op.
    assert_eq!(driver.step().unwrap(), SolveState::Done);
}

#[test]
fn run_reduces_pixel_residuals_and_reports_displacements() {
    let config = JitterConfig { num_iterations: 20, ..Default::default() };
    let mut driver = JitterDriver::new(config, build_dataset()).unwrap();
    let report = driver.run().unwrap();

    let initial: f64 = report.initial_residuals.iter().map(|r| r.norm).sum();
    let final_: f64 = report.final_residuals.iter().map(|r| r.norm).sum();
    assert!(initial > 0.05, "expected a visible initial offset, got {initial}");
    assert!(final_ < initial, "residuals did not decrease: {initial} -> {final_}");

    assert_eq!(report.camera_offsets.len(), 1);
    assert_eq!(report.tri_offsets.len(), 1);
    // Every point moved, so the per-camera displacement stats see it.
    assert!(report.tri_offsets[0].count > 0);
    assert!(report.tri_offsets[0].median > 0.0);
}

#[test]
fn invalid_configuration_is_rejected_before_any_work() {
    let mut config = JitterConfig::default();
    config.solve.quat_norm_weight = 0.0;
    assert!(JitterDriver::new(config, build_dataset()).is_err());

    let mut config = JitterConfig::default();
    config.solve.anchor_weight = 1.0; // no anchor DEM supplied
    assert!(JitterDriver::new(config, build_dataset()).is_err());

    let mut config = JitterConfig::default();
    config.solve.num_anchor_points_per_image = 10;
    config.solve.num_anchor_points_per_tile = 10;
    assert!(JitterDriver::new(config, build_dataset()).is_err());
}
