//! Implements the projective camera model.
//!
//! This module provides the [`ProjectionMatrix`] struct: a 3x4 matrix `P` with
//! `λ [x, y, 1]ᵀ = P [X, Y, Z, 1]ᵀ`. It can be estimated from pixel/world
//! correspondences ([`ProjectionMatrix::create`]), applied to world points
//! ([`ProjectionMatrix::project`]) and persisted as YAML.

use crate::camera::{
    validation, CalibrationOptions, CameraModelError, Correspondence, ProjectOptions,
    MIN_CORRESPONDENCES,
};
use crate::geometry::{self, ReprojectionError};
use crate::linalg;
use log::{debug, warn};
use nalgebra::{DMatrix, Matrix3x4, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

/// Relative singular-value gap under which the calibration null space is
/// reported as ambiguous.
const NULL_SPACE_GAP: f64 = 1e-10;

/// A calibrated projective camera.
///
/// After estimation the matrix is normalized so that entry `[2, 3]` equals 1,
/// which fixes the otherwise arbitrary homogeneous scale. Values are immutable
/// once built and cheap to share between threads.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{Matrix3x4, Vector3};
/// use stereo_vision::camera::{Correspondence, ProjectionMatrix};
///
/// #[rustfmt::skip]
/// let truth = ProjectionMatrix::normalized(Matrix3x4::new(
///     800.0, 0.0, 320.0, 2000.0,
///     0.0, 800.0, 240.0, 1200.0,
///     0.0, 0.0, 1.0, 5.0,
/// )).unwrap();
///
/// let mut correspondences = Vec::new();
/// for z in [0.0, 0.4, 0.8] {
///     for y in [-0.3, 0.0, 0.3] {
///         for x in [-0.5, 0.1, 0.5] {
///             let world = Vector3::new(x, y + 0.1 * x, z);
///             let pixel = truth.project(&world).unwrap();
///             correspondences.push(Correspondence::new(pixel, world));
///         }
///     }
/// }
///
/// let estimated = ProjectionMatrix::create(&correspondences).unwrap();
/// assert_eq!(estimated.matrix()[(2, 3)], 1.0);
/// assert!((estimated.matrix() - truth.matrix()).amax() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionMatrix {
    matrix: Matrix3x4<f64>,
}

impl Default for ProjectionMatrix {
    /// The uncalibrated camera `[I | 0]`.
    fn default() -> Self {
        ProjectionMatrix {
            matrix: Matrix3x4::identity(),
        }
    }
}

impl ProjectionMatrix {
    /// Wraps an existing matrix as is, e.g. one loaded from storage.
    ///
    /// No normalization is applied; use [`ProjectionMatrix::normalized`] when the
    /// homogeneous scale still has to be fixed.
    pub fn from_matrix(matrix: Matrix3x4<f64>) -> Self {
        ProjectionMatrix { matrix }
    }

    /// Scales `matrix` so that its entry `[2, 3]` becomes exactly 1.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::DegenerateGeometry`] if the matrix has non-finite
    ///   entries or its entry `[2, 3]` is numerically zero.
    pub fn normalized(matrix: Matrix3x4<f64>) -> Result<Self, CameraModelError> {
        if !matrix.iter().all(|v| v.is_finite()) {
            return Err(CameraModelError::DegenerateGeometry(
                "projection matrix has non-finite entries".to_string(),
            ));
        }
        let scale = matrix[(2, 3)];
        if scale.abs() <= f64::EPSILON * matrix.amax() {
            return Err(CameraModelError::DegenerateGeometry(format!(
                "entry [2,3] = {scale:e} cannot fix the homogeneous scale"
            )));
        }
        Ok(ProjectionMatrix {
            matrix: matrix / scale,
        })
    }

    /// Builds the camera from a raw solution of the homogeneous calibration
    /// system.
    ///
    /// The first 12 components are the matrix entries in row-major order; any
    /// further components (the per-correspondence scale unknowns) are ignored.
    /// Every entry is divided by component 11, so scaling `z` by a non-zero
    /// constant yields the same camera.
    pub fn from_homogeneous_solution(z: &[f64]) -> Result<Self, CameraModelError> {
        if z.len() < 12 {
            return Err(CameraModelError::InvalidInput(format!(
                "homogeneous solution needs at least 12 components, got {}",
                z.len()
            )));
        }
        Self::normalized(Matrix3x4::from_row_slice(&z[..12]))
    }

    /// Estimates the camera from at least six pixel/world correspondences.
    ///
    /// Each correspondence contributes `λ_i [x_i, y_i, 1]ᵀ = P [X_i, Y_i, Z_i, 1]ᵀ`.
    /// The 12 entries of `P` and one scale unknown per correspondence form a
    /// homogeneous `3N x (12 + N)` system. Its right singular vector `z` for the
    /// smallest singular value is divided by `z[11]`, so `P[2, 3] == 1`.
    ///
    /// Coplanar or collinear world points leave the solution undetermined; this is
    /// logged but not rejected.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidInput`] for fewer than six correspondences or
    ///   non-finite coordinates.
    /// * [`CameraModelError::DegenerateGeometry`] if `z[11]` is zero.
    /// * [`CameraModelError::NumericalError`] if the SVD fails.
    pub fn create(correspondences: &[Correspondence]) -> Result<Self, CameraModelError> {
        Self::create_with(correspondences, &CalibrationOptions::default())
    }

    /// Same as [`ProjectionMatrix::create`], with explicit options.
    ///
    /// With `options.hartley_conditioning` the coordinates are moved to zero
    /// centroid and unit-order spread before the system is built, and the
    /// recovered matrix is mapped back with `P = T⁻¹ P̂ U`. On noisy data this
    /// yields a (usually slightly better) different estimate than the raw system.
    ///
    /// # Errors
    ///
    /// As [`ProjectionMatrix::create`]; with conditioning enabled, coincident
    /// pixels or world points also fail with [`CameraModelError::DegenerateGeometry`].
    pub fn create_with(
        correspondences: &[Correspondence],
        options: &CalibrationOptions,
    ) -> Result<Self, CameraModelError> {
        let n = correspondences.len();
        if n < MIN_CORRESPONDENCES {
            return Err(CameraModelError::InvalidInput(format!(
                "need at least {MIN_CORRESPONDENCES} correspondences, got {n}"
            )));
        }
        for correspondence in correspondences {
            validation::validate_correspondence(correspondence)?;
        }

        let pixels: Vec<Vector2<f64>> = correspondences.iter().map(|c| c.pixel).collect();
        let world: Vec<Vector3<f64>> = correspondences.iter().map(|c| c.world).collect();

        if !options.hartley_conditioning {
            let solution = solve_calibration_system(&design_matrix(&pixels, &world))?;
            return Self::from_homogeneous_solution(solution.vector.as_slice());
        }

        let (pixels_n, t_pixel) = linalg::normalize_points_2d(&pixels).ok_or_else(|| {
            CameraModelError::DegenerateGeometry("all pixel coordinates coincide".to_string())
        })?;
        let (world_n, t_world) = linalg::normalize_points_3d(&world).ok_or_else(|| {
            CameraModelError::DegenerateGeometry("all world points coincide".to_string())
        })?;

        let solution = solve_calibration_system(&design_matrix(&pixels_n, &world_n))?;
        let conditioned = Matrix3x4::from_row_slice(&solution.vector.as_slice()[..12]);
        let t_pixel_inv = t_pixel.try_inverse().ok_or_else(|| {
            CameraModelError::NumericalError("pixel normalization is not invertible".to_string())
        })?;

        Self::normalized(t_pixel_inv * conditioned * t_world)
    }

    /// The underlying 3x4 matrix.
    pub fn matrix(&self) -> &Matrix3x4<f64> {
        &self.matrix
    }

    /// Projects a world point to pixel coordinates with the default options.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::DegenerateProjection`] if `|w| < 1e-9`.
    pub fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        self.project_with(point_3d, &ProjectOptions::default())
    }

    /// Projects a world point: `[u, v, w] = P [X, Y, Z, 1]`, returning `(u/w, v/w)`.
    ///
    /// With `options.round_to_int` both coordinates are rounded to the nearest
    /// integer, ties to even.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::DegenerateProjection`] if `|w| < options.zero_threshold`,
    ///   i.e. the point lies on the camera's principal plane.
    pub fn project_with(
        &self,
        point_3d: &Vector3<f64>,
        options: &ProjectOptions,
    ) -> Result<Vector2<f64>, CameraModelError> {
        let projection = self.matrix * Vector4::new(point_3d.x, point_3d.y, point_3d.z, 1.0);
        let w = projection.z;
        if w.is_nan() || w.abs() < options.zero_threshold {
            return Err(CameraModelError::DegenerateProjection {
                depth: w.abs(),
                threshold: options.zero_threshold,
            });
        }

        let xy = Vector2::new(projection.x / w, projection.y / w);
        if options.round_to_int {
            Ok(xy.map(f64::round_ties_even))
        } else {
            Ok(xy)
        }
    }

    /// Same as [`ProjectionMatrix::project_with`] for a loosely typed point.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidInput`] if `point_3d` does not have exactly
    ///   3 components.
    pub fn project_slice(
        &self,
        point_3d: &[f64],
        options: &ProjectOptions,
    ) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.len() != 3 {
            return Err(CameraModelError::InvalidInput(format!(
                "point must have 3 components, got {}",
                point_3d.len()
            )));
        }
        self.project_with(
            &Vector3::new(point_3d[0], point_3d[1], point_3d[2]),
            options,
        )
    }

    /// Reprojection statistics of this camera over a set of correspondences.
    pub fn reprojection_error(
        &self,
        correspondences: &[Correspondence],
    ) -> Result<ReprojectionError, CameraModelError> {
        geometry::compute_reprojection_error(self, correspondences)
    }

    /// Loads a camera from a YAML file.
    ///
    /// The expected layout is:
    ///
    /// ```yaml
    /// cam0:
    ///   camera_model: projective
    ///   projection_matrix: [p00, p01, p02, p03, p10, ..., p23]
    /// ```
    ///
    /// The matrix is taken as stored, without renormalization.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`] if the file cannot be read.
    /// * [`CameraModelError::YamlError`] if the content is not valid YAML.
    /// * [`CameraModelError::InvalidParams`] if `projection_matrix` is missing,
    ///   does not hold 12 entries or holds non-numeric values.
    ///
    /// # Related
    /// * [`ProjectionMatrix::save_to_yaml()`]
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::InvalidParams("YAML document is empty".to_string()))?;

        let entries_yaml = doc["cam0"]["projection_matrix"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams(
                "YAML missing 'projection_matrix' or not an array".to_string(),
            )
        })?;
        if entries_yaml.len() != 12 {
            return Err(CameraModelError::InvalidParams(format!(
                "'projection_matrix' must hold 12 values, got {}",
                entries_yaml.len()
            )));
        }

        let entries = entries_yaml
            .iter()
            .enumerate()
            .map(|(i, value)| {
                value
                    .as_f64()
                    .or_else(|| value.as_i64().map(|v| v as f64))
                    .ok_or_else(|| {
                        CameraModelError::InvalidParams(format!(
                            "Invalid projection_matrix[{i}]: not a number"
                        ))
                    })
            })
            .collect::<Result<Vec<f64>, CameraModelError>>()?;

        Ok(Self::from_matrix(Matrix3x4::from_row_slice(&entries)))
    }

    /// Saves the camera to a YAML file readable by
    /// [`ProjectionMatrix::load_from_yaml()`]. Values keep full `f64` precision.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::YamlError`] if serialization fails.
    /// * [`CameraModelError::IOError`] if the file cannot be written.
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let row_major: Vec<f64> = self.matrix.transpose().iter().copied().collect();

        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::to_value(serde_yaml::Mapping::from_iter([
                (
                    serde_yaml::Value::String("camera_model".to_string()),
                    serde_yaml::Value::String("projective".to_string()),
                ),
                (
                    serde_yaml::Value::String("projection_matrix".to_string()),
                    serde_yaml::to_value(row_major)
                        .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
                ),
            ]))
            .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
        )]))
        .map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }
}

/// Coefficient matrix of the homogeneous calibration system.
///
/// ```text
///   p00 ... p23      s_0 ... s_N-1
/// | X Y Z 1 0 0 0 0 0 0 0 0 ... -x_i ... |
/// | 0 0 0 0 X Y Z 1 0 0 0 0 ... -y_i ... |
/// | 0 0 0 0 0 0 0 0 X Y Z 1 ...  -1  ... |
/// ```
pub(crate) fn design_matrix(pixels: &[Vector2<f64>], world: &[Vector3<f64>]) -> DMatrix<f64> {
    let n = pixels.len().min(world.len());
    let mut a = DMatrix::<f64>::zeros(3 * n, 12 + n);
    for (i, (xy, xyz)) in pixels.iter().zip(world.iter()).enumerate() {
        for axis in 0..3 {
            let row = 3 * i + axis;
            let col = 4 * axis;
            a[(row, col)] = xyz.x;
            a[(row, col + 1)] = xyz.y;
            a[(row, col + 2)] = xyz.z;
            a[(row, col + 3)] = 1.0;
        }
        a[(3 * i, 12 + i)] = -xy.x;
        a[(3 * i + 1, 12 + i)] = -xy.y;
        a[(3 * i + 2, 12 + i)] = -1.0;
    }
    a
}

fn solve_calibration_system(a: &DMatrix<f64>) -> Result<linalg::NullSpace, CameraModelError> {
    let n = a.ncols().saturating_sub(12);
    debug!(
        "Estimating projection matrix from {} correspondences ({}x{} system)",
        n,
        a.nrows(),
        a.ncols()
    );

    let solution = linalg::null_space(a)?;
    debug!(
        "Calibration singular values: smallest {:e}, next {:e}, largest {:e}",
        solution.smallest, solution.second_smallest, solution.largest
    );
    if solution.second_smallest <= NULL_SPACE_GAP * solution.largest {
        warn!(
            "Calibration null space is not one-dimensional; the {} correspondences may be coplanar or collinear",
            n
        );
    }
    Ok(solution)
}
