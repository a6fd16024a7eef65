//! Crate-level error and result types.
//!
//! Each module defines its own `thiserror` enum with full context; this type
//! aggregates them for callers that drive the whole pipeline and do not need
//! to match on stage-specific detail.

use crate::{
    camera::CameraError, cloud::CloudError, depth::DepthError, marker::MarkerError,
    reconstruction::ReconstructionError, region::RegionError, registration::RegistrationError,
};
use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Result type used by the pipeline entry points.
pub type AnchorResult<T> = Result<T, AnchorError>;

/// Top-level error for the geoanchor library.
#[derive(Debug, Clone, Error)]
pub enum AnchorError {
    /// Camera parameter parsing or validation failed
    #[error("camera parameters: {0}")]
    Camera(String),

    /// Depth map decoding or sampling failed
    #[error("depth map: {0}")]
    Depth(String),

    /// Marker detection input was malformed
    #[error("marker input: {0}")]
    Marker(String),

    /// Point cloud I/O or transform failed
    #[error("point cloud: {0}")]
    Cloud(String),

    /// Registration solve or refinement failed
    #[error("registration: {0}")]
    Registration(String),

    /// Planar region extraction failed
    #[error("region extraction: {0}")]
    Region(String),

    /// External reconstruction process failed
    #[error("reconstruction: {0}")]
    Reconstruction(String),

    /// Invalid caller-supplied input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem error outside any specific stage
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AnchorError {
    fn from(err: std::io::Error) -> Self {
        AnchorError::Io(err.to_string())
    }
}

impl From<ParseFloatError> for AnchorError {
    fn from(err: ParseFloatError) -> Self {
        AnchorError::InvalidInput(format!("failed to parse float: {err}"))
    }
}

impl From<ParseIntError> for AnchorError {
    fn from(err: ParseIntError) -> Self {
        AnchorError::InvalidInput(format!("failed to parse integer: {err}"))
    }
}

impl From<CameraError> for AnchorError {
    fn from(err: CameraError) -> Self {
        AnchorError::Camera(err.to_string())
    }
}

impl From<DepthError> for AnchorError {
    fn from(err: DepthError) -> Self {
        AnchorError::Depth(err.to_string())
    }
}

impl From<MarkerError> for AnchorError {
    fn from(err: MarkerError) -> Self {
        AnchorError::Marker(err.to_string())
    }
}

impl From<CloudError> for AnchorError {
    fn from(err: CloudError) -> Self {
        AnchorError::Cloud(err.to_string())
    }
}

impl From<RegistrationError> for AnchorError {
    fn from(err: RegistrationError) -> Self {
        AnchorError::Registration(err.to_string())
    }
}

impl From<RegionError> for AnchorError {
    fn from(err: RegionError) -> Self {
        AnchorError::Region(err.to_string())
    }
}

impl From<ReconstructionError> for AnchorError {
    fn from(err: ReconstructionError) -> Self {
        AnchorError::Reconstruction(err.to_string())
    }
}
