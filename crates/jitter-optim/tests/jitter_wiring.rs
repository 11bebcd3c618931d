//! Structural tests of the problem wiring: coupling windows, parameter
//! layouts, fixed blocks, and anchor synthesis.

mod support;

use std::sync::Arc;

use jitter_core::dem::ConstantDem;
use jitter_core::math::{Datum, Vec2};
use jitter_core::network::{ControlNetwork, Observation, PointKind, TriangulatedPoint};
use jitter_core::sensors::Sensor;
use jitter_optim::coupling::resolve_ls_window;
use jitter_optim::problems::anchors::synthesize_anchor_points;
use jitter_optim::problems::jitter::{JitterDataset, JitterProblem, JitterSolveOptions};
use jitter_optim::problems::rig::RigConfig;

use support::{ground_point, orbital_frame, orbital_linescan, single_camera_network};

fn single_linescan_dataset(pixels: &[Vec2]) -> JitterDataset {
    let sensor = Sensor::Linescan(orbital_linescan(16));
    let network = single_camera_network(&sensor, pixels);
    JitterDataset::new(vec![sensor], network, Datum::WGS84).unwrap()
}

#[test]
fn reprojection_params_match_the_coupling_window_exactly() {
    let pixel = Vec2::new(200.0, 500.0);
    let dataset = single_linescan_dataset(&[pixel]);
    let opts = JitterSolveOptions::default();

    let mut problem = JitterProblem::new(opts.clone());
    problem.wire_reprojection(&dataset).unwrap();

    let ls = dataset.sensors[0].as_linescan().unwrap();
    let obs_pixel = dataset.network.observations[0].pixel;
    let window = resolve_ls_window(ls, &obs_pixel, opts.max_init_reproj_error + 5.0).unwrap();

    let mut expected: Vec<String> = Vec::new();
    for i in window.beg_quat..window.end_quat {
        expected.push(format!("cam000_quat_{i:05}"));
    }
    for i in window.beg_pos..window.end_pos {
        expected.push(format!("cam000_pos_{i:05}"));
    }
    expected.push("pt_000000".to_string());

    let ir = problem.ir();
    assert_eq!(ir.residuals.len(), 1);
    let names = ir.residual_param_names(0).unwrap();
    assert_eq!(names, expected.iter().map(|s| s.as_str()).collect::<Vec<_>>());

    ir.validate().unwrap();
}

#[test]
fn observation_near_the_first_line_clamps_the_window() {
    let pixel = Vec2::new(200.0, 1.0);
    let dataset = single_linescan_dataset(&[pixel]);
    let opts = JitterSolveOptions::default();

    let mut problem = JitterProblem::new(opts.clone());
    problem.wire_reprojection(&dataset).unwrap();

    let ls = dataset.sensors[0].as_linescan().unwrap();
    let obs_pixel = dataset.network.observations[0].pixel;
    let window = resolve_ls_window(ls, &obs_pixel, opts.max_init_reproj_error + 5.0).unwrap();
    assert!(window.end_quat <= ls.num_quaternions());
    assert!(window.end_pos <= ls.num_positions());
    assert!(window.num_quat() >= 1 && window.num_pos() >= 1);
}

#[test]
fn anchor_points_become_fixed_blocks() {
    let pixel = Vec2::new(200.0, 500.0);
    let mut dataset = single_linescan_dataset(&[pixel]);

    // Turn the single point into an anchor by hand.
    dataset.network.points[0].kind = PointKind::Anchor;
    dataset.network.observations[0].is_anchor = true;

    let mut problem = JitterProblem::new(JitterSolveOptions::default());
    problem.wire_reprojection(&dataset).unwrap();

    let ir = problem.ir();
    let id = ir.param_by_name("pt_000000").unwrap();
    assert!(ir.params[id.0].fixed.is_all_fixed(3));
}

#[test]
fn frame_camera_without_matches_stays_bit_identical() {
    let pixel = Vec2::new(200.0, 500.0);
    let sensor = Sensor::Linescan(orbital_linescan(16));
    let network = single_camera_network(&sensor, &[pixel]);
    let idle_frame = Sensor::Frame(orbital_frame(45.0));
    let mut dataset =
        JitterDataset::new(vec![sensor, idle_frame.clone()], network, Datum::WGS84).unwrap();

    let mut problem = JitterProblem::new(JitterSolveOptions::default());
    problem.wire_reprojection(&dataset).unwrap();
    problem.wire_priors(&dataset).unwrap();

    // No reprojection residual touches the frame camera's blocks.
    assert!(problem.ir().param_by_name("cam001_pos_00000").is_none());

    // An echoed solution commits without disturbing it.
    let solution = jitter_optim::backend::BackendSolution {
        params: problem.initial_values().clone(),
        final_cost: 0.0,
    };
    problem.commit(&solution, &mut dataset).unwrap();
    assert_eq!(dataset.sensors[1], idle_frame);
}

#[test]
fn anchors_land_inside_the_tabulated_pose_range() {
    let mut dataset = single_linescan_dataset(&[Vec2::new(200.0, 500.0)]);
    dataset.anchor_dem = Some(Arc::new(ConstantDem { datum: Datum::WGS84, height: 0.0 }));

    let opts = JitterSolveOptions {
        num_anchor_points_per_image: 100,
        num_anchor_points_extra_lines: 0,
        anchor_weight: 0.5,
        ..Default::default()
    };
    let added = synthesize_anchor_points(&mut dataset, &opts).unwrap();
    assert!(added > 0, "expected some anchor points on a nadir scene");

    let ls = dataset.sensors[0].as_linescan().unwrap();
    let (t_beg, t_end) = ls.quaternions.time_range();
    for obs in dataset.network.observations.iter().filter(|o| o.is_anchor) {
        let time = ls.image_time(&obs.pixel);
        assert!(
            time >= t_beg && time <= t_end,
            "anchor at line {} implies time {time} outside [{t_beg}, {t_end}]",
            obs.pixel.y
        );
        assert_eq!(dataset.network.points[obs.point].kind, PointKind::Anchor);
        assert_eq!(obs.weight, 0.5);
    }
}

#[test]
fn dem_override_reclassifies_points_and_wires_the_height_constraint() {
    let mut dataset = single_linescan_dataset(&[Vec2::new(200.0, 500.0), Vec2::new(150.0, 300.0)]);
    dataset.height_dem = Some(Arc::new(ConstantDem { datum: Datum::WGS84, height: 0.0 }));

    // Lift the triangulated points 2 m off the surface; the DEM
    // override must bring them back down and reclassify them.
    for point in dataset.network.points.iter_mut() {
        let up = point.xyz.normalize();
        point.xyz += 2.0 * up;
    }
    dataset.override_points_from_dem().unwrap();
    for point in &dataset.network.points {
        assert_eq!(point.kind, PointKind::FromDem);
        let (_, _, height) = Datum::WGS84.ecef_to_geodetic(&point.xyz);
        assert!(height.abs() < 0.01, "point not pulled onto the DEM, height {height}");
    }

    let opts = JitterSolveOptions {
        heights_from_dem_uncertainty: 0.01,
        ..Default::default()
    };
    let mut problem = JitterProblem::new(opts);
    problem.wire_reprojection(&dataset).unwrap();
    problem.wire_priors(&dataset).unwrap();

    // Two reprojection residuals plus one height constraint per point,
    // plus the quaternion-norm priors; DEM-classified points must not
    // also get the triangulation prior.
    let ir = problem.ir();
    let xyz_priors = ir
        .residuals
        .iter()
        .filter(|r| matches!(r.factor, jitter_optim::ir::FactorKind::XyzPrior { .. }))
        .count();
    assert_eq!(xyz_priors, 2, "expected exactly one height constraint per point");
    ir.validate().unwrap();
}

#[test]
fn rig_child_couples_to_reference_pose_and_rig_transform_only() {
    let ref_sensor = Sensor::Linescan(orbital_linescan(16));
    let child = orbital_frame(45.0);

    // One shared point, observed by the child.
    let ground = ground_point(&ref_sensor, &Vec2::new(200.0, 500.0));
    let child_pixel = child.ground_to_image(&ground).unwrap();
    let points = vec![TriangulatedPoint { xyz: ground, kind: PointKind::Free }];
    let observations = vec![Observation {
        camera: 1,
        pixel: child_pixel,
        point: 0,
        weight: 1.0,
        is_anchor: false,
    }];
    let network = ControlNetwork::new(points, observations).unwrap();

    let mut dataset =
        JitterDataset::new(vec![ref_sensor, Sensor::Frame(child)], network, Datum::WGS84).unwrap();
    dataset.rig =
        Some(RigConfig::with_identity_transforms(2, 0, vec![0, 1], vec![0, 0]));

    let mut problem = JitterProblem::new(JitterSolveOptions::default());
    problem.wire_reprojection(&dataset).unwrap();

    let ir = problem.ir();
    assert_eq!(ir.residuals.len(), 1);
    let names = ir.residual_param_names(0).unwrap();

    // All pose blocks belong to the reference camera; the child
    // contributes only through the rig transform.
    assert!(names.iter().all(|n| !n.starts_with("cam001")));
    assert!(names.contains(&"rig_01"));
    assert!(names.contains(&"pt_000000"));
    assert!(names.iter().any(|n| n.starts_with("cam000_quat_")));
    assert!(names.iter().any(|n| n.starts_with("cam000_pos_")));

    ir.validate().unwrap();
}

#[test]
fn rig_composition_reproduces_the_child_projection() {
    use jitter_optim::problems::jitter::observation_residual;

    let ref_sensor = Sensor::Linescan(orbital_linescan(16));
    let child = orbital_frame(45.0);

    // The child rides the same orbit, so with an identity rig transform
    // the composed pose at t = 45 matches the child's own pose and its
    // own projection.
    let ground = ground_point(&ref_sensor, &Vec2::new(220.0, 480.0));
    let child_pixel = child.ground_to_image(&ground).unwrap();
    let points = vec![TriangulatedPoint { xyz: ground, kind: PointKind::Free }];
    let observations = vec![Observation {
        camera: 1,
        pixel: child_pixel,
        point: 0,
        weight: 1.0,
        is_anchor: false,
    }];
    let network = ControlNetwork::new(points, observations).unwrap();
    let mut dataset =
        JitterDataset::new(vec![ref_sensor, Sensor::Frame(child)], network, Datum::WGS84).unwrap();
    dataset.rig = Some(RigConfig::with_identity_transforms(2, 0, vec![0, 1], vec![0, 0]));

    let residual = observation_residual(&dataset, &dataset.network.observations[0]).unwrap();
    assert!(
        residual.norm() < 1e-3,
        "identity rig should reproduce the child pixel, off by {} px",
        residual.norm()
    );

    // A half-meter rig offset must show up in the projection.
    dataset.rig.as_mut().unwrap().ref_to_sensor[1] = [0.0, 0.0, 0.0, 0.5, 0.0, 0.0];
    let shifted = observation_residual(&dataset, &dataset.network.observations[0]).unwrap();
    assert!(
        shifted.norm() > 1e-3,
        "a rig translation must move the projection, got {} px",
        shifted.norm()
    );
}

#[test]
fn priors_skip_rig_child_cameras() {
    let ref_sensor = Sensor::Linescan(orbital_linescan(16));
    let child = orbital_frame(45.0);

    let ground = ground_point(&ref_sensor, &Vec2::new(200.0, 500.0));
    let child_pixel = child.ground_to_image(&ground).unwrap();
    let ref_pixel = ref_sensor.ground_to_image(&ground, 1e-8).unwrap();
    let points = vec![TriangulatedPoint { xyz: ground, kind: PointKind::Free }];
    let observations = vec![
        Observation { camera: 0, pixel: ref_pixel, point: 0, weight: 1.0, is_anchor: false },
        Observation { camera: 1, pixel: child_pixel, point: 0, weight: 1.0, is_anchor: false },
    ];
    let network = ControlNetwork::new(points, observations).unwrap();

    let mut dataset =
        JitterDataset::new(vec![ref_sensor, Sensor::Frame(child)], network, Datum::WGS84).unwrap();
    dataset.rig = Some(RigConfig::with_identity_transforms(2, 0, vec![0, 1], vec![0, 0]));

    let mut problem = JitterProblem::new(JitterSolveOptions {
        rotation_weight: 10.0,
        ..Default::default()
    });
    problem.wire_reprojection(&dataset).unwrap();
    problem.wire_priors(&dataset).unwrap();

    // The child frame camera has no quaternion block of its own, so the
    // rotation and norm priors cannot have touched it.
    assert!(problem.ir().param_by_name("cam001_quat_00000").is_none());
}
