//! Reprojection statistics and synthetic calibration targets.

use crate::camera::{CameraModelError, Correspondence, ProjectionMatrix};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Summary statistics of pixel reprojection distances.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ReprojectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reprojection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

impl ReprojectionError {
    /// Summarizes a list of per-point errors. Returns `None` for an empty list.
    pub fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }

        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;

        let variance = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();

        let rmse = (errors.iter().map(|x| x.powi(2)).sum::<f64>() / n).sqrt();

        let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let mut sorted_errors = errors.to_vec();
        sorted_errors.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted_errors.len() / 2;
        let median = if sorted_errors.len() % 2 == 0 {
            (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
        } else {
            sorted_errors[mid]
        };

        Some(ReprojectionError {
            rmse,
            min,
            max,
            mean,
            stddev,
            median,
        })
    }
}

/// Projects every world point of `correspondences` and measures the pixel
/// distance to its observed pixel.
///
/// Points that cannot be projected (on the camera's principal plane) are skipped.
///
/// # Errors
///
/// * [`CameraModelError::ZeroProjectionPoints`] if no point could be projected.
pub fn compute_reprojection_error(
    camera: &ProjectionMatrix,
    correspondences: &[Correspondence],
) -> Result<ReprojectionError, CameraModelError> {
    let errors: Vec<f64> = correspondences
        .iter()
        .filter_map(|c| {
            camera
                .project(&c.world)
                .ok()
                .map(|projected| (projected - c.pixel).norm())
        })
        .collect();

    ReprojectionError::from_errors(&errors).ok_or(CameraModelError::ZeroProjectionPoints)
}

/// Generate the corners of a planar calibration board placed at several depths.
///
/// # Arguments
///
/// * `cols` - Number of corners along X
/// * `rows` - Number of corners along Y
/// * `spacing` - Distance between neighbouring corners, in world units
/// * `depths` - Z coordinate of each board placement
///
/// # Returns
///
/// `cols * rows * depths.len()` world points, board by board, row by row.
pub fn grid_points(cols: usize, rows: usize, spacing: f64, depths: &[f64]) -> Vec<Vector3<f64>> {
    let mut points = Vec::with_capacity(cols * rows * depths.len());
    for &z in depths {
        for i in 0..rows {
            for j in 0..cols {
                points.push(Vector3::new(j as f64 * spacing, i as f64 * spacing, z));
            }
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3x4, Vector2};

    #[test]
    fn test_reprojection_error_statistics() {
        let stats = ReprojectionError::from_errors(&[3.0, 1.0, 4.0, 2.0]).unwrap();
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.median, 2.5);
        assert_relative_eq!(stats.min, 1.0);
        assert_relative_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.rmse, 7.5_f64.sqrt());
        assert_relative_eq!(stats.stddev, 1.25_f64.sqrt());

        let odd = ReprojectionError::from_errors(&[5.0, 1.0, 2.0]).unwrap();
        assert_relative_eq!(odd.median, 2.0);

        assert!(ReprojectionError::from_errors(&[]).is_none());
    }

    #[test]
    fn test_compute_reprojection_error_skips_unprojectable_points() {
        let camera = ProjectionMatrix::from_matrix(Matrix3x4::identity());
        let correspondences = vec![
            Correspondence::new(Vector2::new(1.0, 2.0), Vector3::new(1.0, 2.0, 1.0)),
            Correspondence::new(Vector2::new(3.0, 4.0), Vector3::new(1.0, 1.0, 1.0)),
            Correspondence::new(Vector2::new(0.0, 0.0), Vector3::new(1.0, 1.0, 0.0)),
        ];

        let stats = compute_reprojection_error(&camera, &correspondences).unwrap();
        // (1, 1) vs (3, 4): distance sqrt(13); the point at Z = 0 is skipped.
        assert_relative_eq!(stats.max, 13.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(stats.min, 0.0, epsilon = 1e-12);

        let result = compute_reprojection_error(&camera, &correspondences[2..]);
        assert!(matches!(result, Err(CameraModelError::ZeroProjectionPoints)));
    }

    #[test]
    fn test_grid_points() {
        let points = grid_points(3, 2, 0.5, &[1.0, 2.0]);
        assert_eq!(points.len(), 12);
        assert_eq!(points[0], Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(points[5], Vector3::new(1.0, 0.5, 1.0));
        assert_eq!(points[6], Vector3::new(0.0, 0.0, 2.0));
    }
}
