//! Residual refinement after the primary similarity solve.
//!
//! Measurement noise in the fused marker estimates leaves the anchored
//! cloud with a small residual tilt: the control markers were surveyed on a
//! horizontal plane, but the plane through their located positions in the
//! cloud is not quite horizontal. The refinement locates each reference
//! marker's nearest cloud point through a k-d tree, fits a plane through
//! those positions, and rotates the whole cloud about their centroid so the
//! fitted normal lands on the canonical z-axis.

use super::RegistrationError;
use crate::cloud::PointCloud;
use crate::marker::ReferenceMarkers;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix3, Point3, Rotation3, SymmetricEigen, Unit, Vector3};
use tracing::{debug, info};

/// Threshold on `1 − n̂·ẑ` below which the cloud counts as already level.
const ALIGNED_TOL: f64 = 1e-12;

/// A reference marker matched to its nearest dense-cloud point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSnap {
    pub code: u32,
    /// Surveyed coordinate (already in the target frame).
    pub reference: Point3<f64>,
    /// Closest point of the anchored cloud.
    pub nearest: Point3<f64>,
    /// Euclidean residual between the two.
    pub distance: f64,
}

/// Result of the plane-alignment pass.
#[derive(Debug, Clone)]
pub struct PlaneRefinement {
    pub cloud: PointCloud,
    pub rotation: Rotation3<f64>,
    /// Marker centroid the rotation pivots about.
    pub pivot: Point3<f64>,
    /// Unit normal of the marker plane before refinement.
    pub normal: Vector3<f64>,
}

/// Locate, for each reference marker, the nearest point of the anchored
/// cloud. The snaps serve as residual diagnostics and as the marker
/// positions for [`refine_plane_alignment`].
pub fn snap_to_cloud(
    references: &ReferenceMarkers,
    cloud: &PointCloud,
) -> Result<Vec<MarkerSnap>, RegistrationError> {
    if cloud.is_empty() {
        return Err(RegistrationError::EmptyCloud);
    }

    let mut tree: KdTree<f64, 3> = KdTree::new();
    for (idx, p) in cloud.positions().iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], idx as u64);
    }

    let snaps = references
        .iter()
        .map(|(code, reference)| {
            let found =
                tree.nearest_one::<SquaredEuclidean>(&[reference.x, reference.y, reference.z]);
            let nearest = cloud.positions()[found.item as usize];
            let distance = found.distance.sqrt();
            debug!(code, distance, "snapped reference marker to cloud");
            MarkerSnap {
                code,
                reference: *reference,
                nearest,
                distance,
            }
        })
        .collect();

    Ok(snaps)
}

/// Rotate `cloud` so the plane through `marker_positions` becomes
/// horizontal.
///
/// The plane normal comes from the eigenvector of the smallest eigenvalue
/// of the centered position covariance; the cloud is then rotated by the
/// axis-angle rotation taking that normal onto ẑ, about the marker
/// centroid so the markers stay put.
pub fn refine_plane_alignment(
    cloud: &PointCloud,
    marker_positions: &[Point3<f64>],
) -> Result<PlaneRefinement, RegistrationError> {
    if marker_positions.len() < 3 {
        return Err(RegistrationError::InsufficientMarkers {
            found: marker_positions.len(),
        });
    }

    let inv_n = 1.0 / marker_positions.len() as f64;
    let centroid: Vector3<f64> = marker_positions
        .iter()
        .map(|p| p.coords)
        .sum::<Vector3<f64>>()
        * inv_n;
    let pivot = Point3::from(centroid);

    let mut covariance = Matrix3::zeros();
    for p in marker_positions {
        let c = p.coords - centroid;
        covariance += c * c.transpose() * inv_n;
    }

    let eigen = SymmetricEigen::new(covariance);
    let (mut min_idx, mut mid_value) = (0usize, f64::INFINITY);
    for i in 0..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    for i in 0..3 {
        if i != min_idx && eigen.eigenvalues[i] < mid_value {
            mid_value = eigen.eigenvalues[i];
        }
    }
    // Collinear markers leave two near-zero eigenvalues and no usable plane.
    let max_value = eigen.eigenvalues.max();
    if max_value <= f64::EPSILON || mid_value / max_value <= 1e-9 {
        return Err(RegistrationError::DegenerateConfiguration);
    }

    let mut normal: Vector3<f64> = eigen.eigenvectors.column(min_idx).into_owned();
    normal.normalize_mut();
    // Pick the hemisphere that gives the smaller correction.
    if normal.z < 0.0 {
        normal = -normal;
    }

    let z = Vector3::z();
    let cos_angle = normal.dot(&z).clamp(-1.0, 1.0);
    let rotation = if 1.0 - cos_angle < ALIGNED_TOL {
        Rotation3::identity()
    } else {
        let axis = Unit::new_normalize(normal.cross(&z));
        Rotation3::from_axis_angle(&axis, cos_angle.acos())
    };

    info!(
        tilt_deg = cos_angle.acos().to_degrees(),
        "levelling marker plane onto the horizontal"
    );

    let rotated = cloud
        .rotate_about(&rotation, &pivot)
        .map_err(|err| RegistrationError::Cloud(err.to_string()))?;

    Ok(PlaneRefinement {
        cloud: rotated,
        rotation,
        pivot,
        normal,
    })
}
