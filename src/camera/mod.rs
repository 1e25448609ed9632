//! The `camera` module holds the projective camera model and the types shared
//! by calibration and triangulation.
//!
//! A calibrated camera is a [`ProjectionMatrix`]: a 3x4 matrix mapping homogeneous
//! world coordinates `[X, Y, Z, 1]` to homogeneous pixel coordinates `[u, v, w]`.
//! There is a single camera-model shape, so no trait hierarchy is needed here.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod projection_matrix;

pub use projection_matrix::ProjectionMatrix;

/// Minimum number of correspondences needed to estimate a [`ProjectionMatrix`].
pub const MIN_CORRESPONDENCES: usize = 6;

/// Default `|w|` below which a projection is treated as degenerate.
pub const DEFAULT_ZERO_THRESHOLD: f64 = 1e-9;

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Degenerate projection: |w| = {depth:e} is below the threshold {threshold:e}")]
    DegenerateProjection { depth: f64, threshold: f64 },
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Zero projection points")]
    ZeroProjectionPoints,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// A matched pair of an observed pixel and the world point that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Pixel coordinates `(x, y)`, already corrected for lens distortion.
    pub pixel: Vector2<f64>,
    /// World coordinates `(X, Y, Z)`.
    pub world: Vector3<f64>,
}

impl Correspondence {
    pub fn new(pixel: Vector2<f64>, world: Vector3<f64>) -> Self {
        Correspondence { pixel, world }
    }

    /// Builds a correspondence from loosely typed coordinate slices.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidInput`] if `pixel` does not have exactly 2
    ///   components, `world` does not have exactly 3, or any value is not finite.
    pub fn from_slices(pixel: &[f64], world: &[f64]) -> Result<Self, CameraModelError> {
        if pixel.len() != 2 {
            return Err(CameraModelError::InvalidInput(format!(
                "pixel must have 2 components, got {}",
                pixel.len()
            )));
        }
        if world.len() != 3 {
            return Err(CameraModelError::InvalidInput(format!(
                "world point must have 3 components, got {}",
                world.len()
            )));
        }
        let correspondence = Correspondence::new(
            Vector2::new(pixel[0], pixel[1]),
            Vector3::new(world[0], world[1], world[2]),
        );
        validation::validate_correspondence(&correspondence)?;
        Ok(correspondence)
    }
}

/// Options for [`ProjectionMatrix::project_with`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectOptions {
    /// Round both pixel coordinates to the nearest integer (ties to even).
    pub round_to_int: bool,
    /// Projections with `|w|` below this value fail with
    /// [`CameraModelError::DegenerateProjection`].
    pub zero_threshold: f64,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        ProjectOptions {
            round_to_int: false,
            zero_threshold: DEFAULT_ZERO_THRESHOLD,
        }
    }
}

/// Options for [`ProjectionMatrix::create_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOptions {
    /// Hartley-normalize pixel and world coordinates before the solve and map
    /// the result back afterwards. Off by default: the estimate then comes from
    /// the raw correspondences.
    pub hartley_conditioning: bool,
}

/// Common validation functions for camera inputs
pub mod validation {
    use super::*;

    pub fn validate_correspondence(
        correspondence: &Correspondence,
    ) -> Result<(), CameraModelError> {
        let finite = correspondence.pixel.iter().all(|v| v.is_finite())
            && correspondence.world.iter().all(|v| v.is_finite());
        if !finite {
            return Err(CameraModelError::InvalidInput(format!(
                "correspondence has non-finite coordinates: pixel {:?}, world {:?}",
                correspondence.pixel.as_slice(),
                correspondence.world.as_slice()
            )));
        }
        Ok(())
    }

    pub fn validate_observation(
        index: usize,
        observation: &Vector2<f64>,
    ) -> Result<(), CameraModelError> {
        if !observation.x.is_finite() || !observation.y.is_finite() {
            return Err(CameraModelError::InvalidInput(format!(
                "observation {index} is not finite: ({}, {})",
                observation.x, observation.y
            )));
        }
        Ok(())
    }
}
