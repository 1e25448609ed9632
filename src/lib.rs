//! Stereo Vision Library
//!
//! Projective calibration and triangulation for small multi-camera rigs.
//! This library provides:
//! - [`ProjectionMatrix`]: a 3x4 projective camera estimated from pixel/world
//!   correspondences, which projects world points to pixels
//! - [`StereoVisionSystem`]: a fixed set of calibrated cameras that
//!   triangulates a world point from one pixel observation per camera
//!
//! Frame capture, corner detection, lens undistortion and marker tracking
//! happen upstream; this crate only consumes their pixel coordinates.

pub mod camera;
pub mod geometry;
pub mod linalg;
pub mod stereo;

// Re-export commonly used types
pub use camera::{
    CalibrationOptions, CameraModelError, Correspondence, ProjectOptions, ProjectionMatrix,
};
pub use geometry::ReprojectionError;
pub use stereo::StereoVisionSystem;
