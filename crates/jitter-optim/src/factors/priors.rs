//! Soft-prior residuals on points, positions, and quaternions.

use nalgebra::{DVector, RealField, SVector};

/// Weighted difference between a 3D point and a fixed observation.
/// Backs both the DEM height constraint and the triangulation prior.
pub fn xyz_prior_residual<T: RealField>(
    point: &DVector<T>,
    observation: [f64; 3],
    weight: f64,
) -> SVector<T, 3> {
    debug_assert_eq!(point.len(), 3);
    let w = T::from_f64(weight).unwrap();
    SVector::<T, 3>::from_fn(|i, _| {
        w.clone() * (point[i].clone() - T::from_f64(observation[i]).unwrap())
    })
}

/// Weighted difference between a position sample and its initial value.
pub fn translation_prior_residual<T: RealField>(
    position: &DVector<T>,
    initial: [f64; 3],
    weight: f64,
) -> SVector<T, 3> {
    debug_assert_eq!(position.len(), 3);
    let w = T::from_f64(weight).unwrap();
    SVector::<T, 3>::from_fn(|i, _| {
        w.clone() * (position[i].clone() - T::from_f64(initial[i]).unwrap())
    })
}

/// Weighted difference between a quaternion sample and its initial
/// value. No robust loss is ever attached: quaternions have no outliers.
pub fn rotation_prior_residual<T: RealField>(
    quat: &DVector<T>,
    initial: [f64; 4],
    weight: f64,
) -> SVector<T, 4> {
    debug_assert_eq!(quat.len(), 4);
    let w = T::from_f64(weight).unwrap();
    SVector::<T, 4>::from_fn(|i, _| {
        w.clone() * (quat[i].clone() - T::from_f64(initial[i]).unwrap())
    })
}

/// Weighted deviation of the squared quaternion norm from one.
pub fn quat_norm_residual<T: RealField>(quat: &DVector<T>, weight: f64) -> SVector<T, 1> {
    debug_assert_eq!(quat.len(), 4);
    let mut norm2 = T::zero();
    for i in 0..4 {
        norm2 += quat[i].clone() * quat[i].clone();
    }
    SVector::<T, 1>::new(T::from_f64(weight).unwrap() * (norm2 - T::one()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn xyz_prior_is_zero_at_observation() {
        let p = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let r = xyz_prior_residual(&p, [1.0, 2.0, 3.0], 5.0);
        assert_relative_eq!(r.norm(), 0.0);
    }

    #[test]
    fn quat_norm_penalizes_drift() {
        let unit = DVector::from_row_slice(&[0.0, 0.0, 0.0, 1.0]);
        assert_relative_eq!(quat_norm_residual(&unit, 2.0)[0], 0.0);

        let scaled = DVector::from_row_slice(&[0.0, 0.0, 0.0, 1.1]);
        assert_relative_eq!(quat_norm_residual(&scaled, 2.0)[0], 2.0 * (1.1f64 * 1.1 - 1.0));
    }

    #[test]
    fn rotation_prior_measures_componentwise_drift() {
        let q = DVector::from_row_slice(&[0.1, 0.0, 0.0, 1.0]);
        let r = rotation_prior_residual(&q, [0.0, 0.0, 0.0, 1.0], 10.0);
        assert_relative_eq!(r[0], 1.0);
        assert_relative_eq!(r[3], 0.0);
    }
}
