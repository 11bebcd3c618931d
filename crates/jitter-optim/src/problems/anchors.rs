//! Anchor-point synthesis.
//!
//! Anchor points are synthetic tie points that pin the cameras near
//! their initial attitude where image matches are sparse. Each image is
//! tiled, the tile centers are ray-cast into the anchor DEM through the
//! current camera, and every surviving hit becomes an immutable
//! triangulated point with a single weighted observation.

use anyhow::{ensure, Result};
use log::{info, warn};

use jitter_core::dem::{ray_dem_intersection, DemSurface, WeightImage, DEM_INTERSECTION_HEIGHT_TOL};
use jitter_core::math::Vec2;
use jitter_core::network::{Observation, PointKind, TriangulatedPoint};
use jitter_core::sensors::{LinescanSensor, Sensor, DEFAULT_PROJECTION_PRECISION};

use crate::problems::jitter::{JitterDataset, JitterSolveOptions};

/// Synthesize anchor points for every camera and append them to the
/// network. Returns the total number of anchors added.
pub fn synthesize_anchor_points(dataset: &mut JitterDataset, opts: &JitterSolveOptions) -> Result<usize> {
    ensure!(
        opts.num_anchor_points_per_image > 0 || opts.num_anchor_points_per_tile > 0,
        "expecting a positive number of anchor points"
    );
    ensure!(
        opts.num_anchor_points_per_image == 0 || opts.num_anchor_points_per_tile == 0,
        "cannot have anchor points both per image and per tile"
    );
    ensure!(opts.anchor_weight > 0.0, "anchor weight must be positive");
    let anchor_dem = dataset
        .anchor_dem
        .clone()
        .ok_or_else(|| anyhow::anyhow!("anchor points need an anchor DEM"))?;
    let weight_image = dataset.anchor_weight_image.clone();

    let mut total = 0;
    let mut range_warning_printed = false;

    for icam in 0..dataset.sensors.len() {
        let sensor = dataset.sensors[icam].clone();
        let (num_samples, num_lines) = sensor.image_size();

        // Extra lines extend placement past the image only for linescan.
        let extra = match &sensor {
            Sensor::Linescan(_) => opts.num_anchor_points_extra_lines as f64,
            Sensor::Frame(_) => 0.0,
        };

        // Image area taken by each anchor point. Compute in f64 early;
        // large images overflow integer areas.
        let area = num_samples as f64 * (num_lines as f64 + 2.0 * extra);
        let area_per_point = if opts.num_anchor_points_per_image > 0 {
            area / opts.num_anchor_points_per_image as f64
        } else {
            1024.0 * 1024.0 / opts.num_anchor_points_per_tile as f64
        };
        let bin_len = area_per_point.sqrt().max(1.0);
        let lenx = ((num_samples as f64 / bin_len).ceil() as usize).max(1);
        let leny = (((num_lines as f64 + 2.0 * extra) / bin_len).ceil() as usize).max(1);

        let mut num_placed = 0;
        for binx in 0..=lenx {
            let posx = binx as f64 * bin_len;
            for biny in 0..=leny {
                let posy = biny as f64 * bin_len - extra;
                if posx > (num_samples - 1) as f64
                    || posy < -extra
                    || posy > (num_lines - 1) as f64 + extra
                {
                    continue;
                }
                let pixel = Vec2::new(posx, posy);

                let center = sensor.camera_center(&pixel);
                let dir = sensor.pixel_to_vector(&pixel);
                let Some(dem_xyz) = ray_dem_intersection(&center, &dir, anchor_dem.as_ref())
                else {
                    continue;
                };

                // The hit must reproject back onto the cell center;
                // otherwise the intersection is unreliable.
                let Ok(reprojected) = sensor.ground_to_image(&dem_xyz, DEFAULT_PROJECTION_PRECISION)
                else {
                    continue;
                };
                if (reprojected - pixel).norm() > 10.0 * DEM_INTERSECTION_HEIGHT_TOL {
                    continue;
                }

                let mut image_weight = 1.0;
                if let Some(image) = weight_image.as_deref() {
                    match image.closest_value(&dem_xyz) {
                        Some(w) if w.is_finite() && w > 0.0 => image_weight = w,
                        _ => continue,
                    }
                }

                if let Sensor::Linescan(ls) = &sensor {
                    if !anchor_time_in_range(ls, &pixel) {
                        if !range_warning_printed {
                            warn!(
                                "not placing anchor points outside the range of tabulated positions and orientations"
                            );
                            range_warning_printed = true;
                        }
                        continue;
                    }
                }

                let point_index = dataset.network.points.len();
                dataset
                    .network
                    .points
                    .push(TriangulatedPoint { xyz: dem_xyz, kind: PointKind::Anchor });
                dataset.network.observations.push(Observation {
                    camera: icam,
                    pixel,
                    point: point_index,
                    weight: opts.anchor_weight * image_weight,
                    is_anchor: true,
                });
                num_placed += 1;
            }
        }

        info!("camera {icam}: placed {num_placed} anchor points");
        total += num_placed;
    }
    Ok(total)
}

/// The anchor's implied capture time must fall strictly inside both
/// tabulated pose ranges; outside them the interpolant extrapolates and
/// the anchor would constrain samples that do not exist.
fn anchor_time_in_range(ls: &LinescanSensor, pixel: &Vec2) -> bool {
    let time = ls.image_time(pixel);
    let pos_index = ((time - ls.positions.t0) / ls.positions.dt).floor();
    let quat_index = ((time - ls.quaternions.t0) / ls.quaternions.dt).floor();
    pos_index >= 0.0
        && (pos_index as usize) < ls.num_positions()
        && quat_index >= 0.0
        && (quat_index as usize) < ls.num_quaternions()
}
