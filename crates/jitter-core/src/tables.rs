//! Uniform-grid pose tables and Lagrange interpolation.
//!
//! Linescan sensors tabulate positions and orientations on uniform time
//! grids and evaluate a pixel by interpolating a stencil of eight
//! contiguous samples around the capture time. The interpolation here is
//! generic over [`RealField`] so the optimizer can differentiate through
//! it with dual numbers.

use nalgebra::RealField;

use crate::error::{Error, Result};
use crate::math::{Vec3, Vec4};

/// Order of the Lagrange interpolator.
pub const LAGRANGE_ORDER: usize = 8;

/// Positions sampled on a uniform time grid.
///
/// Sample `i` is taken at `t0 + i * dt`.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionTable {
    pub t0: f64,
    pub dt: f64,
    pub samples: Vec<Vec3>,
}

/// Quaternions `[x, y, z, w]` sampled on a uniform time grid.
#[derive(Debug, Clone, PartialEq)]
pub struct QuaternionTable {
    pub t0: f64,
    pub dt: f64,
    pub samples: Vec<Vec4>,
}

impl PositionTable {
    pub fn new(t0: f64, dt: f64, samples: Vec<Vec3>) -> Result<Self> {
        ensure_grid(dt, samples.len())?;
        Ok(Self { t0, dt, samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time of the first and last sample.
    pub fn time_range(&self) -> (f64, f64) {
        (self.t0, self.t0 + (self.len() - 1) as f64 * self.dt)
    }

    /// Interpolate the position at `time`.
    pub fn interpolate(&self, time: f64) -> Vec3 {
        lagrange_interp(self.t0, self.dt, &self.samples, &time)
    }

    /// Resample onto a uniform grid with `num` samples spanning the same
    /// time range, using the table's own interpolant.
    pub fn resample(&self, num: usize) -> Result<Self> {
        let samples = resample_samples(self.t0, self.dt, &self.samples, num)?;
        let (beg, end) = self.time_range();
        let dt = (end - beg) / (num - 1) as f64;
        Ok(Self { t0: beg, dt, samples })
    }
}

impl QuaternionTable {
    pub fn new(t0: f64, dt: f64, samples: Vec<Vec4>) -> Result<Self> {
        ensure_grid(dt, samples.len())?;
        Ok(Self { t0, dt, samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn time_range(&self) -> (f64, f64) {
        (self.t0, self.t0 + (self.len() - 1) as f64 * self.dt)
    }

    /// Interpolate the quaternion at `time`, component-wise, and
    /// normalize the result.
    pub fn interpolate(&self, time: f64) -> Vec4 {
        let q: Vec4 = lagrange_interp(self.t0, self.dt, &self.samples, &time);
        q / q.norm()
    }

    /// Normalize every sample in place. Done once at setup so that the
    /// soft unit-norm constraint starts from a consistent state.
    pub fn normalize(&mut self) {
        for q in self.samples.iter_mut() {
            let n = q.norm();
            if n > 0.0 {
                *q /= n;
            }
        }
    }

    pub fn resample(&self, num: usize) -> Result<Self> {
        let samples = resample_samples(self.t0, self.dt, &self.samples, num)?;
        let (beg, end) = self.time_range();
        let dt = (end - beg) / (num - 1) as f64;
        let mut out = Self { t0: beg, dt, samples };
        out.normalize();
        Ok(out)
    }
}

fn ensure_grid(dt: f64, len: usize) -> Result<()> {
    if dt <= 0.0 {
        return Err(Error::Setup(format!("pose table spacing must be positive, got {dt}")));
    }
    if len == 0 {
        return Err(Error::Setup("pose table has no samples".to_string()));
    }
    Ok(())
}

fn resample_samples<const D: usize>(
    t0: f64,
    dt: f64,
    samples: &[nalgebra::SVector<f64, D>],
    num: usize,
) -> Result<Vec<nalgebra::SVector<f64, D>>> {
    if num < 2 {
        return Err(Error::Setup(format!(
            "resampling needs at least 2 output samples, got {num}"
        )));
    }
    let beg = t0;
    let end = t0 + (samples.len() - 1) as f64 * dt;
    let new_dt = (end - beg) / (num - 1) as f64;
    Ok((0..num)
        .map(|i| lagrange_interp(t0, dt, samples, &(beg + i as f64 * new_dt)))
        .collect())
}

/// Largest integer `i` in `[0, max]` with `i <= x`, found by bisection.
///
/// The stencil index must be recovered from a possibly dual-valued time
/// without converting `T` back to `f64`; comparisons against integer
/// probes sidestep that.
pub fn clamped_floor_index<T: RealField>(x: &T, max: usize) -> usize {
    if *x <= T::zero() {
        return 0;
    }
    if T::from_f64(max as f64).unwrap() <= *x {
        return max;
    }
    let mut lo = 0usize;
    let mut hi = max;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if T::from_f64(mid as f64).unwrap() <= *x {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Lagrange interpolation of vector-valued samples on a uniform grid.
///
/// Uses a stencil of [`LAGRANGE_ORDER`] contiguous samples around `time`,
/// clamped at the table edges; falls back to the full table when it holds
/// fewer samples than the stencil.
pub fn lagrange_interp<T: RealField, const D: usize>(
    t0: f64,
    dt: f64,
    samples: &[nalgebra::SVector<f64, D>],
    time: &T,
) -> nalgebra::SVector<T, D> {
    interp_mixed::<T, D>(t0, dt, samples, &[], 0, time)
}

/// Lagrange interpolation where samples in `[beg, beg + live.len())` are
/// taken from `live` (typically active optimization variables) and the
/// rest from the frozen `base` table.
///
/// This is the value-copy contract of the reprojection residuals: the
/// sensor's tabulated samples stay untouched while the coupled window is
/// overlaid with the current parameter values.
pub fn interp_mixed<T: RealField, const D: usize>(
    t0: f64,
    dt: f64,
    base: &[nalgebra::SVector<f64, D>],
    live: &[nalgebra::SVector<T, D>],
    beg: usize,
    time: &T,
) -> nalgebra::SVector<T, D> {
    let n = base.len();
    debug_assert!(beg + live.len() <= n, "live window out of range");

    let x = (time.clone() - T::from_f64(t0).unwrap()) / T::from_f64(dt).unwrap();
    let order = LAGRANGE_ORDER.min(n);
    let idx = clamped_floor_index(&x, n - 1);
    let start = idx
        .saturating_sub(LAGRANGE_ORDER / 2 - 1)
        .min(n - order);

    let fetch = |j: usize| -> nalgebra::SVector<T, D> {
        if j >= beg && j < beg + live.len() {
            live[j - beg].clone()
        } else {
            base[j].map(|v| T::from_f64(v).unwrap())
        }
    };

    let mut result = nalgebra::SVector::<T, D>::zeros();
    for j in start..start + order {
        let mut basis = T::one();
        for k in start..start + order {
            if k == j {
                continue;
            }
            let num = x.clone() - T::from_f64(k as f64).unwrap();
            let den = T::from_f64((j as f64) - (k as f64)).unwrap();
            basis *= num / den;
        }
        result += fetch(j) * basis;
    }
    result
}
