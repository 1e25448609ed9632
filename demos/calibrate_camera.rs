//! Camera Calibration Driver
//!
//! Estimates a camera's projection matrix from a CSV file of undistorted pixel
//! coordinates and their known world coordinates, reports the reprojection
//! error and saves the matrix as YAML.
//!
//! The CSV needs the header `x,y,X,Y,Z`.
//!
//! Usage:
//! ```bash
//! cargo run --example calibrate_camera -- \
//!   --correspondences output_calibrate_system/camera1_correspondences.csv \
//!   --output output_calibrate_system/camera1.yaml
//! ```

use clap::Parser;
use log::{info, warn};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use stereo_vision::camera::{Correspondence, ProjectionMatrix};
use stereo_vision::geometry::ReprojectionError;

/// Projection matrix calibration tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CSV file with one `x,y,X,Y,Z` correspondence per row
    #[arg(short = 'c', long)]
    correspondences: PathBuf,

    /// Path of the YAML file to write the projection matrix to
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// RMSE in pixels above which the calibration is reported as suspicious
    #[arg(long, default_value = "2.0")]
    max_rmse: f64,
}

#[derive(Debug, Deserialize)]
struct CorrespondenceRow {
    x: f64,
    y: f64,
    #[serde(rename = "X")]
    world_x: f64,
    #[serde(rename = "Y")]
    world_y: f64,
    #[serde(rename = "Z")]
    world_z: f64,
}

#[derive(Debug, Serialize)]
struct CalibrationReport {
    num_correspondences: usize,
    projection_matrix: ProjectionMatrix,
    reprojection_error: ReprojectionError,
    calibration_time_ms: f64,
}

fn load_correspondences(path: &Path) -> Result<Vec<Correspondence>, Box<dyn std::error::Error>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut correspondences = Vec::new();
    for row in reader.deserialize() {
        let row: CorrespondenceRow = row?;
        correspondences.push(Correspondence::new(
            Vector2::new(row.x, row.y),
            Vector3::new(row.world_x, row.world_y, row.world_z),
        ));
    }
    Ok(correspondences)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let cli = Cli::parse();

    info!("Loading correspondences from: {:?}", cli.correspondences);
    let correspondences = load_correspondences(&cli.correspondences)?;
    info!("Loaded {} correspondences", correspondences.len());

    let start = Instant::now();
    let projection_matrix = ProjectionMatrix::create(&correspondences)?;
    let calibration_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let reprojection_error = projection_matrix.reprojection_error(&correspondences)?;
    info!("{:?}", reprojection_error);
    if reprojection_error.rmse > cli.max_rmse {
        warn!(
            "Reprojection RMSE {:.3} px exceeds {:.3} px; check the correspondences for outliers",
            reprojection_error.rmse, cli.max_rmse
        );
    }

    let output = cli
        .output
        .to_str()
        .ok_or("output path is not valid UTF-8")?;
    projection_matrix.save_to_yaml(output)?;
    info!("Saved projection matrix to: {}", output);

    let report = CalibrationReport {
        num_correspondences: correspondences.len(),
        projection_matrix,
        reprojection_error,
        calibration_time_ms,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
