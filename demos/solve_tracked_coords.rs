//! Tracked Coordinates Solver
//!
//! Triangulates the 3D trajectory of a tracked marker from its pixel
//! coordinates in every camera of a calibrated rig.
//!
//! The coordinates CSV needs a `timestamp` column followed by `x_i,y_i` columns
//! for every camera `i` (1-based, in the order of `--projection-matrix`). The
//! output CSV holds `timestamp,X,Y,Z`. Frames that cannot be triangulated are
//! logged and skipped.
//!
//! Usage:
//! ```bash
//! cargo run --example solve_tracked_coords -- \
//!   --projection-matrix samples/camera1.yaml \
//!   --projection-matrix samples/camera2.yaml \
//!   --coordinates output_track_red_square/red_square_coordinates.csv \
//!   --output output_solve_tracked_coords/trajectory.csv
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info, warn};
use nalgebra::Vector2;
use serde::Serialize;
use std::path::PathBuf;
use stereo_vision::StereoVisionSystem;

/// Marker triangulation tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Projection matrix YAML file, once per camera, in column order
    #[arg(short = 'p', long = "projection-matrix", required = true, num_args = 1)]
    projection_matrices: Vec<String>,

    /// CSV file with the tracked pixel coordinates
    #[arg(short = 'c', long)]
    coordinates: PathBuf,

    /// CSV file to write the triangulated coordinates to
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Per-camera reprojection residual, in pixels, above which a frame is flagged
    #[arg(long, default_value = "5.0")]
    max_residual: f64,
}

#[derive(Debug, Serialize)]
struct TrajectoryRow {
    timestamp: String,
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "Z")]
    z: f64,
}

/// Column index of `x_i` and `y_i` for every camera.
fn coordinate_columns(
    headers: &csv::StringRecord,
    num_cameras: usize,
) -> Result<Vec<(usize, usize)>, Box<dyn std::error::Error>> {
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| format!("coordinates CSV has no '{name}' column"))
    };
    (1..=num_cameras)
        .map(|i| -> Result<(usize, usize), Box<dyn std::error::Error>> {
            Ok((find(&format!("x_{i}"))?, find(&format!("y_{i}"))?))
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .start()?;

    let cli = Cli::parse();

    let paths: Vec<&str> = cli.projection_matrices.iter().map(String::as_str).collect();
    let system = StereoVisionSystem::load_from_yaml_files(&paths)?;

    let mut reader = csv::Reader::from_path(&cli.coordinates)?;
    let headers = reader.headers()?.clone();
    let timestamp_column = headers
        .iter()
        .position(|h| h.trim() == "timestamp")
        .ok_or("coordinates CSV has no 'timestamp' column")?;
    let columns = coordinate_columns(&headers, system.num_cameras())?;

    if let Some(parent) = cli.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(&cli.output)?;

    let mut solved = 0usize;
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let timestamp = record.get(timestamp_column).unwrap_or_default().to_string();

        let observations = columns
            .iter()
            .map(|&(x_col, y_col)| -> Result<Vector2<f64>, std::num::ParseFloatError> {
                let x: f64 = record.get(x_col).unwrap_or_default().trim().parse()?;
                let y: f64 = record.get(y_col).unwrap_or_default().trim().parse()?;
                Ok(Vector2::new(x, y))
            })
            .collect::<Result<Vec<_>, _>>();
        let observations = match observations {
            Ok(observations) => observations,
            Err(e) => {
                warn!("Skipping frame '{}': {}", timestamp, e);
                skipped += 1;
                continue;
            }
        };

        let xyz = match system.solve_xyz(&observations) {
            Ok(xyz) => xyz,
            Err(e) => {
                error!("Skipping frame '{}': {}", timestamp, e);
                skipped += 1;
                continue;
            }
        };

        if let Ok(residuals) = system.reprojection_residuals(&xyz, &observations) {
            if residuals.iter().any(|&r| r > cli.max_residual) {
                warn!(
                    "Frame '{}' has large reprojection residuals {:?}; the cameras may be tracking different features",
                    timestamp, residuals
                );
            }
        }

        writer.serialize(TrajectoryRow {
            timestamp,
            x: xyz.x,
            y: xyz.y,
            z: xyz.z,
        })?;
        solved += 1;
    }
    writer.flush()?;

    info!(
        "Triangulated {} frames ({} skipped) into {:?}",
        solved, skipped, cli.output
    );

    Ok(())
}
