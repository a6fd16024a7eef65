//! Geo-registration: from per-image marker detections to a metric,
//! ground-truth-anchored cloud.
//!
//! The stages compose left to right: [`project_detection`] lifts a 2-D
//! detection into world space through the image's depth map and pose,
//! [`aggregate_estimates`] fuses per-view estimates with a component-wise
//! median, [`solve_similarity`] anchors the fused estimates to the surveyed
//! coordinates, and [`refine_plane_alignment`] removes the residual tilt the
//! primary solve leaves behind.

use crate::depth::DepthError;
use thiserror::Error;

pub mod aggregate;
pub mod project;
pub mod refine;
pub mod similarity;

pub use aggregate::{aggregate_estimates, AggregatedMarker};
pub use project::{project_detection, Estimate3D};
pub use refine::{refine_plane_alignment, snap_to_cloud, MarkerSnap, PlaneRefinement};
pub use similarity::{solve_similarity, SimilarityTransform};

/// Errors from projection, solving and refinement.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Depth sampling failed for one detection; the detection is dropped.
    #[error("cannot project marker {code} in image '{image}': {source}")]
    Projection {
        code: u32,
        image: String,
        #[source]
        source: DepthError,
    },

    #[error("similarity solve needs at least 3 correspondences, found {found}")]
    Underdetermined { found: usize },

    #[error("source and target correspondence counts differ ({source_len} vs {target_len})")]
    CorrespondenceMismatch {
        source_len: usize,
        target_len: usize,
    },

    /// The correspondences span a line (or a point); the rotation about the
    /// spanned axis cannot be recovered.
    #[error("correspondences are degenerate (collinear or coincident)")]
    DegenerateConfiguration,

    #[error("plane refinement needs at least 3 marker positions, found {found}")]
    InsufficientMarkers { found: usize },

    #[error("cannot build a spatial index over an empty cloud")]
    EmptyCloud,

    #[error("cloud transform failed: {0}")]
    Cloud(String),
}
