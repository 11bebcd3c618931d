//! Synthetic orbital scene shared by the integration tests.
#![allow(dead_code)]

use nalgebra::UnitQuaternion;

use jitter_core::dem::{ray_dem_intersection, ConstantDem};
use jitter_core::math::{Datum, Mat3, Vec2, Vec3, Vec4};
use jitter_core::network::{ControlNetwork, Observation, PointKind, TriangulatedPoint};
use jitter_core::sensors::{
    FrameGeometry, FrameSensor, LinescanGeometry, LinescanSensor, Sensor,
    DEFAULT_PROJECTION_PRECISION,
};
use jitter_core::tables::{PositionTable, QuaternionTable};

pub const ORBIT_HEIGHT: f64 = 500_000.0;
pub const LON0: f64 = 10.0;
pub const LAT0: f64 = 20.0;
/// Degrees of latitude per second of the ground track.
pub const LAT_RATE: f64 = 0.001;

/// Nadir camera-to-world rotation at a geodetic location, with the
/// detector across track and the focal-plane y axis along the (north)
/// motion.
pub fn nadir_cam2world(lon_deg: f64, lat_deg: f64) -> Vec4 {
    let lon = lon_deg.to_radians();
    let lat = lat_deg.to_radians();
    let east = Vec3::new(-lon.sin(), lon.cos(), 0.0);
    let north = Vec3::new(-lat.sin() * lon.cos(), -lat.sin() * lon.sin(), lat.cos());
    let up = Vec3::new(lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin());

    let cam2world = Mat3::from_columns(&[-east, north, -up]);
    let q = UnitQuaternion::from_matrix(&cam2world);
    Vec4::new(q.i, q.j, q.k, q.w)
}

/// A linescan sensor flying north over the WGS84 ellipsoid at
/// [`ORBIT_HEIGHT`], imaging 1000 lines over about 90 seconds.
pub fn orbital_linescan(num_pose: usize) -> LinescanSensor {
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
    let t_end = 95.0;
    let dt = (t_end - t0) / (num_pose - 1) as f64;

    let mut positions = Vec::with_capacity(num_pose);
    let mut quaternions = Vec::with_capacity(num_pose);
    for i in 0..num_pose {
        let t = t0 + i as f64 * dt;
        let lat = LAT0 + LAT_RATE * t;
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

/// A frame sensor riding the same orbit, capturing at `time`.
pub fn orbital_frame(time: f64) -> FrameSensor {
    let datum = Datum::WGS84;
    let lat = LAT0 + LAT_RATE * time;
    FrameSensor {
        geometry: FrameGeometry {
            num_lines: 600,
            num_samples: 800,
            focal_length: 50_000.0,
            optical_center: [400.0, 300.0],
        },
        position: datum.geodetic_to_ecef(LON0, lat, ORBIT_HEIGHT),
        quaternion: nadir_cam2world(LON0, lat),
        time,
    }
}

/// Ground point seen at `pixel`: the ray through the pixel intersected
/// with the ellipsoid.
pub fn ground_point(sensor: &Sensor, pixel: &Vec2) -> Vec3 {
    let dem = ConstantDem { datum: Datum::WGS84, height: 0.0 };
    let center = sensor.camera_center(pixel);
    let dir = sensor.pixel_to_vector(pixel);
    ray_dem_intersection(&center, &dir, &dem).expect("nadir ray must hit the ellipsoid")
}

/// Build a network observing `pixels` with exact projections from one
/// camera.
pub fn single_camera_network(sensor: &Sensor, pixels: &[Vec2]) -> ControlNetwork {
    let mut points = Vec::new();
    let mut observations = Vec::new();
    for (i, pixel) in pixels.iter().enumerate() {
        let ground = ground_point(sensor, pixel);
        let projected = sensor
            .ground_to_image(&ground, DEFAULT_PROJECTION_PRECISION)
            .expect("synthetic point must project");
        points.push(TriangulatedPoint { xyz: ground, kind: PointKind::Free });
        observations.push(Observation {
            camera: 0,
            pixel: projected,
            point: i,
            weight: 1.0,
            is_anchor: false,
        });
    }
    ControlNetwork::new(points, observations).unwrap()
}
