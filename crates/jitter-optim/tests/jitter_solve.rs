//! End-to-end solver smoke tests on synthetic orbital scenes.
//!
//! These verify convergence with loose tolerances; the exact structural
//! behavior is covered by the wiring tests.

mod support;

use jitter_core::math::{Datum, Vec2, Vec3};
use jitter_core::sensors::Sensor;
use jitter_optim::backend::BackendSolveOptions;
use jitter_optim::problems::jitter::{
    observation_residual, JitterDataset, JitterProblem, JitterSolveOptions,
};

use support::{orbital_linescan, single_camera_network};

fn total_residual(dataset: &JitterDataset) -> f64 {
    dataset
        .network
        .observations
        .iter()
        .filter_map(|obs| observation_residual(dataset, obs))
        .map(|r| r.norm())
        .sum()
}

#[test]
fn perturbed_points_are_pulled_back_onto_their_rays() {
    let sensor = Sensor::Linescan(orbital_linescan(16));
    let pixels: Vec<Vec2> = (0..8)
        .map(|i| Vec2::new(60.0 + 40.0 * i as f64, 120.0 + 100.0 * i as f64))
        .collect();
    let network = single_camera_network(&sensor, &pixels);
    let mut dataset = JitterDataset::new(vec![sensor], network, Datum::WGS84).unwrap();

    // Shift every triangulated point a couple of meters sideways; the
    // observations still hold the true pixels.
    for (i, point) in dataset.network.points.iter_mut().enumerate() {
        let offset = if i % 2 == 0 { Vec3::new(2.0, 0.0, 0.0) } else { Vec3::new(0.0, 2.0, 1.0) };
        point.xyz += offset;
    }

    let opts = JitterSolveOptions::default();
    dataset.normalize_and_resample(&opts).unwrap();
    dataset.flag_outliers(&opts);
    assert!(dataset.network.outliers.is_empty(), "2 m offsets are far below the 10 px gate");

    let initial_total = total_residual(&dataset);
    assert!(
        initial_total > 0.05,
        "perturbation should be visible in pixels, got {initial_total}"
    );

    let mut problem = JitterProblem::new(opts);
    problem.wire_reprojection(&dataset).unwrap();
    problem.wire_priors(&dataset).unwrap();

    let backend_opts = BackendSolveOptions { max_iters: 30, ..Default::default() };
    let solution = problem.solve(&dataset, &backend_opts).unwrap();
    problem.commit(&solution, &mut dataset).unwrap();

    let final_total = total_residual(&dataset);
    assert!(
        final_total < 0.5 * initial_total,
        "residuals did not drop: {initial_total} -> {final_total}"
    );

    // The soft norm constraint must keep every quaternion sample close
    // to unit length through the solve.
    let ls = dataset.sensors[0].as_linescan().unwrap();
    for q in &ls.quaternions.samples {
        assert!((q.norm() - 1.0).abs() < 1e-3, "quaternion norm drifted to {}", q.norm());
    }
}

#[test]
fn solve_is_idempotent_once_converged() {
    let sensor = Sensor::Linescan(orbital_linescan(16));
    let pixels: Vec<Vec2> = (0..6)
        .map(|i| Vec2::new(100.0 + 30.0 * i as f64, 150.0 + 120.0 * i as f64))
        .collect();
    let network = single_camera_network(&sensor, &pixels);
    let mut dataset = JitterDataset::new(vec![sensor], network, Datum::WGS84).unwrap();
    for point in dataset.network.points.iter_mut() {
        point.xyz += Vec3::new(1.0, -1.0, 0.5);
    }

    let opts = JitterSolveOptions::default();
    let backend_opts = BackendSolveOptions { max_iters: 30, ..Default::default() };

    let mut problem = JitterProblem::new(opts.clone());
    problem.wire_reprojection(&dataset).unwrap();
    problem.wire_priors(&dataset).unwrap();
    let solution = problem.solve(&dataset, &backend_opts).unwrap();
    problem.commit(&solution, &mut dataset).unwrap();
    let after_first = total_residual(&dataset);

    // Second run, seeded with the first run's output.
    let mut problem = JitterProblem::new(opts);
    problem.wire_reprojection(&dataset).unwrap();
    problem.wire_priors(&dataset).unwrap();
    let solution = problem.solve(&dataset, &backend_opts).unwrap();
    problem.commit(&solution, &mut dataset).unwrap();
    let after_second = total_residual(&dataset);

    assert!(
        after_second <= after_first + 1e-6,
        "second solve should not regress: {after_first} -> {after_second}"
    );
}
