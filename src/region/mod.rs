//! Planar region-of-interest extraction.
//!
//! Four steps over any cloud snapshot: statistical outlier removal, RANSAC
//! plane fit, construction of a square region on the fitted plane around
//! the cloud centroid, and cropping to that square. Each step is exposed on
//! its own; [`extract_planar_region`] chains them.

use crate::cloud::PointCloud;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub mod crop;
pub mod outliers;
pub mod plane;

pub use crop::{filter_square, CropMode};
pub use outliers::remove_statistical_outliers;
pub use plane::{create_square_on_plane, fit_plane_ransac, PlaneModel, SquareRegion};

/// Errors from region extraction.
#[derive(Error, Debug, Clone)]
pub enum RegionError {
    #[error("cannot extract a region from an empty cloud")]
    EmptyCloud,

    #[error("plane fit needs at least 3 points, found {found}")]
    InsufficientPoints { found: usize },

    #[error("no plane reached the inlier threshold within {iterations} iterations")]
    PlaneNotFound { iterations: usize },

    #[error("degenerate plane: {message}")]
    DegeneratePlane { message: String },
}

/// Tunables for the extraction chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Neighbors examined per point by the outlier filter.
    pub nb_neighbors: usize,
    /// Standard-deviation multiplier classifying a point as an outlier.
    pub std_ratio: f64,
    /// RANSAC inlier distance threshold.
    pub distance_threshold: f64,
    /// RANSAC iteration budget.
    pub ransac_iterations: usize,
    /// RANSAC sampling seed, for reproducible runs.
    pub seed: u64,
    /// Side length of the extracted square.
    pub side_length: f64,
    pub crop_mode: CropMode,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            nb_neighbors: 20,
            std_ratio: 2.0,
            distance_threshold: 0.01,
            ransac_iterations: 1000,
            seed: 1_234_567,
            side_length: 90.0,
            crop_mode: CropMode::BoundingBox,
        }
    }
}

/// Everything the extraction produced, intermediate models included.
#[derive(Debug, Clone)]
pub struct RegionExtraction {
    /// The cropped cloud, colors preserved.
    pub cloud: PointCloud,
    pub plane: PlaneModel,
    pub square: SquareRegion,
    pub outliers_removed: usize,
}

/// Run the full chain: outlier removal, plane fit, square construction,
/// crop.
pub fn extract_planar_region(
    cloud: &PointCloud,
    config: &RegionConfig,
) -> Result<RegionExtraction, RegionError> {
    if cloud.is_empty() {
        return Err(RegionError::EmptyCloud);
    }

    let (filtered, outliers_removed) =
        remove_statistical_outliers(cloud, config.nb_neighbors, config.std_ratio);
    info!(
        kept = filtered.len(),
        removed = outliers_removed,
        "statistical outlier removal"
    );

    let plane = fit_plane_ransac(&filtered, config)?;
    info!(a = plane.a, b = plane.b, c = plane.c, d = plane.d, "fitted plane");

    let center = filtered.centroid().ok_or(RegionError::EmptyCloud)?;
    let square = create_square_on_plane(&center, &plane.normal(), config.side_length)?;

    let cropped = filter_square(&filtered, &square, config.crop_mode);
    info!(
        total = filtered.len(),
        inside = cropped.len(),
        mode = ?config.crop_mode,
        "cropped to square region"
    );

    Ok(RegionExtraction {
        cloud: cropped,
        plane,
        square,
        outliers_removed,
    })
}
