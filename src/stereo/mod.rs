//! Multi-camera triangulation.
//!
//! A [`StereoVisionSystem`] owns the calibrated cameras of a rig, in a fixed
//! order, and recovers the world position of a point from one pixel observation
//! per camera.

use crate::camera::{validation, CameraModelError, ProjectionMatrix};
use crate::linalg;
use log::{debug, info};
use nalgebra::{DMatrix, DVector, Vector2, Vector3};

/// Default relative singular-value threshold for rejecting a triangulation.
///
/// With unit-length equations `σ_min / σ_max` is about half the angle between
/// the two most divergent viewing rays, so this rejects rays closer than
/// roughly 2 microradians.
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-6;

/// A rig of N >= 2 calibrated cameras.
///
/// Observations passed to [`StereoVisionSystem::solve_xyz`] must follow the
/// camera order given at construction. The system is immutable, so a shared
/// reference can be used from several threads at once.
///
/// # Examples
///
/// ```rust
/// use nalgebra::{Matrix3x4, Vector3};
/// use stereo_vision::camera::ProjectionMatrix;
/// use stereo_vision::stereo::StereoVisionSystem;
///
/// #[rustfmt::skip]
/// let left = ProjectionMatrix::from_matrix(Matrix3x4::new(
///     800.0, 0.0, 320.0, 0.0,
///     0.0, 800.0, 240.0, 0.0,
///     0.0, 0.0, 1.0, 1.0,
/// ));
/// #[rustfmt::skip]
/// let right = ProjectionMatrix::from_matrix(Matrix3x4::new(
///     800.0, 0.0, 320.0, -400.0,
///     0.0, 800.0, 240.0, 0.0,
///     0.0, 0.0, 1.0, 1.0,
/// ));
/// let system = StereoVisionSystem::new(vec![left, right]).unwrap();
///
/// let point = Vector3::new(0.2, -0.1, 3.0);
/// let observations = [left.project(&point).unwrap(), right.project(&point).unwrap()];
/// let xyz = system.solve_xyz(&observations).unwrap();
/// assert!((xyz - point).norm() < 1e-8);
/// ```
#[derive(Debug, Clone)]
pub struct StereoVisionSystem {
    projection_matrices: Vec<ProjectionMatrix>,
    rank_tolerance: f64,
}

impl StereoVisionSystem {
    /// Builds a system from its cameras, in observation order.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidInput`] if fewer than two cameras are given.
    pub fn new(projection_matrices: Vec<ProjectionMatrix>) -> Result<Self, CameraModelError> {
        if projection_matrices.len() < 2 {
            return Err(CameraModelError::InvalidInput(format!(
                "a stereo vision system needs at least 2 cameras, got {}",
                projection_matrices.len()
            )));
        }
        Ok(StereoVisionSystem {
            projection_matrices,
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        })
    }

    /// Loads every camera from its YAML file, in the given order.
    pub fn load_from_yaml_files(paths: &[&str]) -> Result<Self, CameraModelError> {
        let projection_matrices = paths
            .iter()
            .map(|path| {
                info!("Loading projection matrix from: {}", path);
                ProjectionMatrix::load_from_yaml(path)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(projection_matrices)
    }

    /// Sets the relative threshold `σ_min / σ_max` under which a triangulation
    /// is rejected as degenerate.
    pub fn with_rank_tolerance(mut self, rank_tolerance: f64) -> Self {
        self.rank_tolerance = rank_tolerance;
        self
    }

    pub fn projection_matrices(&self) -> &[ProjectionMatrix] {
        &self.projection_matrices
    }

    pub fn num_cameras(&self) -> usize {
        self.projection_matrices.len()
    }

    /// Triangulates the world point seen at `observations[i]` by camera `i`.
    ///
    /// Every camera contributes the two equations
    /// `x (r3 · X) - (r1 · X) = 0` and `y (r3 · X) - (r2 · X) = 0` with
    /// `X = [X, Y, Z, 1]`. Each equation is scaled to unit length and the
    /// stacked `2N x 3` system is solved in the least-squares sense.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidInput`] if the number of observations differs
    ///   from the number of cameras or an observation is not finite.
    /// * [`CameraModelError::DegenerateGeometry`] if the system is rank deficient
    ///   or ill-conditioned (`σ_min <= rank_tolerance * σ_max`), e.g. all viewing
    ///   rays are parallel or nearly so.
    pub fn solve_xyz(
        &self,
        observations: &[Vector2<f64>],
    ) -> Result<Vector3<f64>, CameraModelError> {
        let n = self.projection_matrices.len();
        if observations.len() != n {
            return Err(CameraModelError::InvalidInput(format!(
                "expected {} observations (one per camera), got {}",
                n,
                observations.len()
            )));
        }

        let mut a = DMatrix::<f64>::zeros(2 * n, 3);
        let mut b = DVector::<f64>::zeros(2 * n);
        for (i, (camera, xy)) in self
            .projection_matrices
            .iter()
            .zip(observations.iter())
            .enumerate()
        {
            validation::validate_observation(i, xy)?;
            let p = camera.matrix();
            let r0 = 2 * i;
            let r1 = 2 * i + 1;

            for col in 0..3 {
                a[(r0, col)] = xy.x * p[(2, col)] - p[(0, col)];
                a[(r1, col)] = xy.y * p[(2, col)] - p[(1, col)];
            }
            b[r0] = p[(0, 3)] - xy.x * p[(2, 3)];
            b[r1] = p[(1, 3)] - xy.y * p[(2, 3)];

            // Unit-length rows, so singular values measure ray geometry, not pixel scale.
            for row in [r0, r1] {
                let norm = a.row(row).norm();
                if norm > 0.0 {
                    for col in 0..3 {
                        a[(row, col)] /= norm;
                    }
                    b[row] /= norm;
                }
            }
        }

        let xyz = linalg::solve_least_squares(&a, &b, self.rank_tolerance)?;
        debug!(
            "Triangulated ({:.4}, {:.4}, {:.4}) from {} cameras",
            xyz[0], xyz[1], xyz[2], n
        );

        Ok(Vector3::new(xyz[0], xyz[1], xyz[2]))
    }

    /// Runs [`StereoVisionSystem::solve_xyz`] on every frame. A failing frame
    /// does not affect the others.
    pub fn solve_xyz_batch<F>(&self, frames: &[F]) -> Vec<Result<Vector3<f64>, CameraModelError>>
    where
        F: AsRef<[Vector2<f64>]>,
    {
        frames
            .iter()
            .map(|frame| self.solve_xyz(frame.as_ref()))
            .collect()
    }

    /// Pixel distance, per camera, between each observation and the projection
    /// of `point`.
    ///
    /// Large values flag frames where the tracker latched onto different
    /// features in different cameras.
    pub fn reprojection_residuals(
        &self,
        point: &Vector3<f64>,
        observations: &[Vector2<f64>],
    ) -> Result<Vec<f64>, CameraModelError> {
        if observations.len() != self.projection_matrices.len() {
            return Err(CameraModelError::InvalidInput(format!(
                "expected {} observations (one per camera), got {}",
                self.projection_matrices.len(),
                observations.len()
            )));
        }

        self.projection_matrices
            .iter()
            .zip(observations.iter())
            .map(|(camera, xy)| -> Result<f64, CameraModelError> {
                Ok((camera.project(point)? - xy).norm())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Matrix3x4, Rotation3};

    fn camera(k: Matrix3<f64>, r: Rotation3<f64>, t: Vector3<f64>) -> ProjectionMatrix {
        let mut p = Matrix3x4::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&(k * r.matrix()));
        p.set_column(3, &(k * t));
        ProjectionMatrix::normalized(p).unwrap()
    }

    fn stereo_pair() -> (ProjectionMatrix, ProjectionMatrix) {
        let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
        let left = camera(
            k,
            Rotation3::from_euler_angles(0.0, 0.1, 0.0),
            Vector3::new(-0.25, 0.0, 4.0),
        );
        let right = camera(
            k,
            Rotation3::from_euler_angles(0.0, -0.1, 0.02),
            Vector3::new(0.25, 0.05, 4.0),
        );
        (left, right)
    }

    fn observe(cameras: &[ProjectionMatrix], point: &Vector3<f64>) -> Vec<Vector2<f64>> {
        cameras.iter().map(|c| c.project(point).unwrap()).collect()
    }

    #[test]
    fn test_new_requires_two_cameras() {
        let (left, _) = stereo_pair();
        assert!(matches!(
            StereoVisionSystem::new(vec![left]),
            Err(CameraModelError::InvalidInput(_))
        ));
        assert!(matches!(
            StereoVisionSystem::new(vec![]),
            Err(CameraModelError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_solve_xyz_round_trip() {
        let (left, right) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();

        for point in [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.3, -0.2, 0.5),
            Vector3::new(-0.4, 0.25, -0.3),
        ] {
            let observations = observe(system.projection_matrices(), &point);
            let xyz = system.solve_xyz(&observations).unwrap();
            assert_relative_eq!(xyz, point, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_solve_xyz_three_cameras() {
        let (left, right) = stereo_pair();
        let k = Matrix3::new(760.0, 0.0, 300.0, 0.0, 760.0, 250.0, 0.0, 0.0, 1.0);
        let top = camera(
            k,
            Rotation3::from_euler_angles(-0.12, 0.0, 0.0),
            Vector3::new(0.0, -0.3, 4.2),
        );
        let system = StereoVisionSystem::new(vec![left, right, top]).unwrap();
        assert_eq!(system.num_cameras(), 3);

        let point = Vector3::new(0.15, 0.1, 0.2);
        let observations = observe(system.projection_matrices(), &point);
        let xyz = system.solve_xyz(&observations).unwrap();
        assert_relative_eq!(xyz, point, epsilon = 1e-8);
    }

    #[test]
    fn test_solve_xyz_with_noise_stays_close() {
        let (left, right) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();

        let point = Vector3::new(0.1, 0.05, 0.2);
        let mut observations = observe(system.projection_matrices(), &point);
        observations[0] += Vector2::new(0.3, -0.2);
        observations[1] += Vector2::new(-0.25, 0.1);

        let xyz = system.solve_xyz(&observations).unwrap();
        assert!((xyz - point).norm() < 0.05, "estimate {:?}", xyz);
    }

    #[test]
    fn test_solve_xyz_observation_count_mismatch() {
        let (left, right) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();
        let point = Vector3::new(0.1, 0.1, 0.1);
        let observations = observe(system.projection_matrices(), &point);

        assert!(matches!(
            system.solve_xyz(&observations[..1]),
            Err(CameraModelError::InvalidInput(_))
        ));

        let mut longer = observations.clone();
        longer.push(Vector2::new(10.0, 10.0));
        assert!(matches!(
            system.solve_xyz(&longer),
            Err(CameraModelError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_solve_xyz_rejects_non_finite_observation() {
        let (left, right) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();
        let observations = [Vector2::new(320.0, 240.0), Vector2::new(f64::NAN, 240.0)];
        assert!(matches!(
            system.solve_xyz(&observations),
            Err(CameraModelError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_solve_xyz_degenerate_identical_cameras() {
        let (left, _) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, left]).unwrap();
        let point = Vector3::new(0.2, 0.1, 0.3);
        let observations = observe(system.projection_matrices(), &point);

        assert!(matches!(
            system.solve_xyz(&observations),
            Err(CameraModelError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_solve_xyz_rejects_nearly_parallel_rays() {
        let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
        let left = camera(k, Rotation3::identity(), Vector3::new(0.0, 0.0, 3.0));
        let right = camera(k, Rotation3::identity(), Vector3::new(-1e-7, 0.0, 3.0));
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();

        let point = Vector3::new(0.2, -0.1, 0.0);
        let mut observations = observe(system.projection_matrices(), &point);
        assert!(matches!(
            system.solve_xyz(&observations),
            Err(CameraModelError::DegenerateGeometry(_))
        ));

        // Half a pixel of noise would otherwise put the point behind the cameras.
        observations[0] += Vector2::new(0.5, 0.0);
        assert!(matches!(
            system.solve_xyz(&observations),
            Err(CameraModelError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_solve_xyz_accepts_narrow_baseline() {
        let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
        let left = camera(k, Rotation3::identity(), Vector3::new(0.0, 0.0, 3.0));
        let right = camera(k, Rotation3::identity(), Vector3::new(-0.01, 0.0, 3.0));
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();

        let point = Vector3::new(0.2, -0.1, 0.0);
        let observations = observe(system.projection_matrices(), &point);
        let xyz = system.solve_xyz(&observations).unwrap();
        assert_relative_eq!(xyz, point, epsilon = 1e-6);
    }

    #[test]
    fn test_solve_xyz_camera_order_is_a_labeling() {
        let (left, right) = stereo_pair();
        let point = Vector3::new(-0.2, 0.3, 0.1);
        let mut observations = observe(&[left, right], &point);
        observations[0] += Vector2::new(0.4, -0.3);
        observations[1] += Vector2::new(-0.1, 0.2);

        let forward = StereoVisionSystem::new(vec![left, right])
            .unwrap()
            .solve_xyz(&observations)
            .unwrap();
        let swapped = StereoVisionSystem::new(vec![right, left])
            .unwrap()
            .solve_xyz(&[observations[1], observations[0]])
            .unwrap();

        assert_relative_eq!(forward, swapped, epsilon = 1e-9);
    }

    #[test]
    fn test_solve_xyz_batch_keeps_going_after_failure() {
        let (left, right) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();
        let point = Vector3::new(0.05, -0.05, 0.25);

        let frames = vec![
            observe(system.projection_matrices(), &point),
            vec![Vector2::new(1.0, 1.0)],
            observe(system.projection_matrices(), &point),
        ];
        let results = system.solve_xyz_batch(&frames);

        assert_eq!(results.len(), 3);
        assert_relative_eq!(*results[0].as_ref().unwrap(), point, epsilon = 1e-8);
        assert!(matches!(results[1], Err(CameraModelError::InvalidInput(_))));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_reprojection_residuals() {
        let (left, right) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();
        let point = Vector3::new(0.1, 0.2, 0.3);
        let mut observations = observe(system.projection_matrices(), &point);
        observations[1] += Vector2::new(3.0, 4.0);

        let residuals = system.reprojection_residuals(&point, &observations).unwrap();
        assert_relative_eq!(residuals[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(residuals[1], 5.0, epsilon = 1e-9);

        assert!(system
            .reprojection_residuals(&point, &observations[..1])
            .is_err());
    }

    #[test]
    fn test_rank_tolerance_is_configurable() {
        let (left, right) = stereo_pair();
        let point = Vector3::new(0.0, 0.1, 0.2);
        let observations = observe(&[left, right], &point);

        let strict = StereoVisionSystem::new(vec![left, right])
            .unwrap()
            .with_rank_tolerance(0.5);
        assert!(matches!(
            strict.solve_xyz(&observations),
            Err(CameraModelError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_load_from_yaml_files() {
        let system = StereoVisionSystem::load_from_yaml_files(&[
            "samples/camera1.yaml",
            "samples/camera2.yaml",
        ])
        .unwrap();
        assert_eq!(system.num_cameras(), 2);

        let observations = [
            Vector2::new(297.1363347669913, 234.71709709374753),
            Vector2::new(399.6087774889962, 220.109909642135),
        ];
        let xyz = system.solve_xyz(&observations).unwrap();
        assert_relative_eq!(xyz, Vector3::new(0.12, -0.08, 0.35), epsilon = 1e-6);
    }

    #[test]
    fn test_system_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StereoVisionSystem>();

        let (left, right) = stereo_pair();
        let system = StereoVisionSystem::new(vec![left, right]).unwrap();
        let points: Vec<Vector3<f64>> = (0..4)
            .map(|i| Vector3::new(0.1 * i as f64, -0.05 * i as f64, 0.2))
            .collect();

        std::thread::scope(|scope| {
            let handles: Vec<_> = points
                .iter()
                .map(|point| {
                    let system = &system;
                    scope.spawn(move || {
                        let observations = observe(system.projection_matrices(), point);
                        system.solve_xyz(&observations).unwrap()
                    })
                })
                .collect();
            for (handle, point) in handles.into_iter().zip(points.iter()) {
                assert_relative_eq!(handle.join().unwrap(), *point, epsilon = 1e-8);
            }
        });
    }
}
