//! Dense linear-algebra helpers shared by calibration and triangulation.
//!
//! Both solvers go through the SVD of the design matrix directly instead of
//! forming `AᵀA`, which would square its condition number.

use crate::camera::CameraModelError;
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, Vector2, Vector3};

/// Approximate solution of the homogeneous system `A z = 0`.
#[derive(Debug, Clone)]
pub struct NullSpace {
    /// Unit vector minimising `|A z|`.
    pub vector: DVector<f64>,
    /// Smallest singular value of `A`, i.e. the residual `|A z|`.
    pub smallest: f64,
    /// Second smallest singular value. When it is close to `smallest` the
    /// null space is not one-dimensional and `vector` is arbitrary.
    pub second_smallest: f64,
    /// Largest singular value of `A`.
    pub largest: f64,
}

/// Computes the right singular vector of `a` associated with its smallest
/// singular value.
///
/// Wide matrices are padded with zero rows so the SVD returns the full `V`.
pub fn null_space(a: &DMatrix<f64>) -> Result<NullSpace, CameraModelError> {
    if a.ncols() == 0 {
        return Err(CameraModelError::InvalidInput(
            "design matrix has no columns".to_string(),
        ));
    }

    let a_work = if a.nrows() < a.ncols() {
        let mut padded = DMatrix::<f64>::zeros(a.ncols(), a.ncols());
        padded.view_mut((0, 0), (a.nrows(), a.ncols())).copy_from(a);
        padded
    } else {
        a.clone()
    };

    let svd = a_work.svd(false, true);
    let v_t = svd.v_t.ok_or_else(|| {
        CameraModelError::NumericalError("SVD did not return right singular vectors".to_string())
    })?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&i, &j| svd.singular_values[i].total_cmp(&svd.singular_values[j]));

    let min_idx = order[0];
    let smallest = svd.singular_values[min_idx];
    let second_smallest = order
        .get(1)
        .map(|&i| svd.singular_values[i])
        .unwrap_or(f64::INFINITY);
    let largest = svd.singular_values[order[order.len() - 1]];

    Ok(NullSpace {
        vector: v_t.row(min_idx).transpose(),
        smallest,
        second_smallest,
        largest,
    })
}

/// Solves `A x = b` in the least-squares sense.
///
/// `rank_tolerance` is relative: the system is rejected as rank deficient when
/// `σ_min <= rank_tolerance * σ_max`.
///
/// # Errors
///
/// * [`CameraModelError::InvalidInput`] if `a` and `b` disagree on the row count.
/// * [`CameraModelError::DegenerateGeometry`] if `a` is numerically rank deficient
///   or has fewer rows than columns.
pub fn solve_least_squares(
    a: &DMatrix<f64>,
    b: &DVector<f64>,
    rank_tolerance: f64,
) -> Result<DVector<f64>, CameraModelError> {
    if a.nrows() != b.len() {
        return Err(CameraModelError::InvalidInput(format!(
            "design matrix has {} rows but right-hand side has {}",
            a.nrows(),
            b.len()
        )));
    }
    if a.nrows() < a.ncols() {
        return Err(CameraModelError::DegenerateGeometry(format!(
            "underdetermined system: {} equations for {} unknowns",
            a.nrows(),
            a.ncols()
        )));
    }

    let svd = a.clone().svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();

    if !(sigma_max > 0.0) || sigma_min <= rank_tolerance * sigma_max {
        return Err(CameraModelError::DegenerateGeometry(format!(
            "rank deficient system (singular values {sigma_min:e} .. {sigma_max:e})"
        )));
    }

    svd.solve(b, rank_tolerance * sigma_max)
        .map_err(|e| CameraModelError::NumericalError(e.to_string()))
}

/// Hartley normalization of 2D points: zero centroid, mean distance `sqrt(2)`.
///
/// Returns the normalized points and the similarity `T` with `x̂ = T x`, or
/// `None` if all points coincide.
pub fn normalize_points_2d(points: &[Vector2<f64>]) -> Option<(Vec<Vector2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;

    if mean_dist <= f64::EPSILON {
        return None;
    }

    let scale = 2.0_f64.sqrt() / mean_dist;
    #[rustfmt::skip]
    let t = Matrix3::new(
        scale, 0.0, -scale * centroid.x,
        0.0, scale, -scale * centroid.y,
        0.0, 0.0, 1.0,
    );
    let normalized = points.iter().map(|p| (p - centroid) * scale).collect();

    Some((normalized, t))
}

/// Hartley normalization of 3D points: zero centroid, mean distance `sqrt(3)`.
pub fn normalize_points_3d(points: &[Vector3<f64>]) -> Option<(Vec<Vector3<f64>>, Matrix4<f64>)> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;

    if mean_dist <= f64::EPSILON {
        return None;
    }

    let scale = 3.0_f64.sqrt() / mean_dist;
    #[rustfmt::skip]
    let t = Matrix4::new(
        scale, 0.0, 0.0, -scale * centroid.x,
        0.0, scale, 0.0, -scale * centroid.y,
        0.0, 0.0, scale, -scale * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );
    let normalized = points.iter().map(|p| (p - centroid) * scale).collect();

    Some((normalized, t))
}
