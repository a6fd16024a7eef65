//! Point cloud snapshots.
//!
//! Clouds are immutable: every pipeline stage consumes one snapshot and
//! produces a new one (raw → aligned → refined → cropped), which keeps the
//! intermediate states inspectable. Colors ride along untouched through
//! every geometric operation.

use nalgebra::{Point3, Rotation3};
use thiserror::Error;

use crate::registration::SimilarityTransform;

pub mod ply;

pub use ply::{read_ply, write_ply, PlyFormat};

/// Errors from cloud construction, transforms and PLY I/O.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("point {index} has a non-finite position")]
    InvalidGeometry { index: usize },

    #[error("cloud has {points} points but {colors} colors")]
    ColorCountMismatch { points: usize, colors: usize },

    #[error("ply header error at line {line}: {message}")]
    Header { line: usize, message: String },

    #[error("ply parse error at vertex {vertex}: {message}")]
    Parse { vertex: usize, message: String },

    #[error("ply data truncated: expected {expected} vertices, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unsupported ply feature: {0}")]
    Unsupported(String),
}

/// An ordered set of 3-D points with optional per-point RGB color.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    positions: Vec<Point3<f64>>,
    colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    /// Build a cloud, checking the color count against the point count.
    pub fn new(
        positions: Vec<Point3<f64>>,
        colors: Option<Vec<[u8; 3]>>,
    ) -> Result<Self, CloudError> {
        if let Some(ref colors) = colors {
            if colors.len() != positions.len() {
                return Err(CloudError::ColorCountMismatch {
                    points: positions.len(),
                    colors: colors.len(),
                });
            }
        }
        Ok(Self { positions, colors })
    }

    pub fn from_positions(positions: Vec<Point3<f64>>) -> Self {
        Self {
            positions,
            colors: None,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Point3<f64>] {
        &self.positions
    }

    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Arithmetic mean of the positions; `None` for an empty cloud.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.positions.is_empty() {
            return None;
        }
        let sum = self
            .positions
            .iter()
            .fold(nalgebra::Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3::from(sum / self.positions.len() as f64))
    }

    /// New cloud holding the points at `indices`, colors included.
    pub fn select(&self, indices: &[usize]) -> Self {
        let positions = indices.iter().map(|&i| self.positions[i]).collect();
        let colors = self
            .colors
            .as_ref()
            .map(|colors| indices.iter().map(|&i| colors[i]).collect());
        Self { positions, colors }
    }

    /// Apply a similarity transform to every position.
    ///
    /// Colors are cloned untouched. A non-finite input position means the
    /// upstream reconstruction is corrupt and fails the whole transform.
    pub fn apply_similarity(
        &self,
        transform: &SimilarityTransform,
    ) -> Result<Self, CloudError> {
        let mut positions = Vec::with_capacity(self.positions.len());
        for (index, p) in self.positions.iter().enumerate() {
            if !p.coords.iter().all(|c| c.is_finite()) {
                return Err(CloudError::InvalidGeometry { index });
            }
            positions.push(transform.apply(p));
        }
        Ok(Self {
            positions,
            colors: self.colors.clone(),
        })
    }

    /// Rotate every position about `pivot`.
    pub fn rotate_about(
        &self,
        rotation: &Rotation3<f64>,
        pivot: &Point3<f64>,
    ) -> Result<Self, CloudError> {
        let mut positions = Vec::with_capacity(self.positions.len());
        for (index, p) in self.positions.iter().enumerate() {
            if !p.coords.iter().all(|c| c.is_finite()) {
                return Err(CloudError::InvalidGeometry { index });
            }
            positions.push(pivot + rotation * (p - pivot));
        }
        Ok(Self {
            positions,
            colors: self.colors.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Unit, Vector3};

    #[test]
    fn test_color_count_checked() {
        let result = PointCloud::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)],
            Some(vec![[255, 0, 0]]),
        );
        assert!(matches!(
            result,
            Err(CloudError::ColorCountMismatch {
                points: 2,
                colors: 1
            })
        ));
    }

    #[test]
    fn test_centroid() {
        let cloud = PointCloud::from_positions(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 4.0, -2.0),
        ]);
        assert_relative_eq!(cloud.centroid().unwrap(), Point3::new(1.0, 2.0, -1.0));
        assert!(PointCloud::default().centroid().is_none());
    }

    #[test]
    fn test_select_keeps_colors() {
        let cloud = PointCloud::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
            ],
            Some(vec![[1, 1, 1], [2, 2, 2], [3, 3, 3]]),
        )
        .unwrap();

        let picked = cloud.select(&[2, 0]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.positions()[0], Point3::new(2.0, 0.0, 0.0));
        assert_eq!(picked.colors().unwrap(), &[[3, 3, 3], [1, 1, 1]]);
    }

    #[test]
    fn test_apply_similarity() {
        let cloud = PointCloud::new(
            vec![Point3::new(1.0, 0.0, 0.0)],
            Some(vec![[9, 9, 9]]),
        )
        .unwrap();
        let transform = SimilarityTransform {
            scale: 2.0,
            rotation: Matrix3::identity(),
            translation: Vector3::new(0.0, 0.0, 1.0),
        };

        let out = cloud.apply_similarity(&transform).unwrap();
        assert_relative_eq!(out.positions()[0], Point3::new(2.0, 0.0, 1.0));
        assert_eq!(out.colors().unwrap(), &[[9, 9, 9]]);
    }

    #[test]
    fn test_nan_position_is_invalid_geometry() {
        let cloud = PointCloud::from_positions(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(f64::NAN, 0.0, 0.0),
        ]);
        let result = cloud.apply_similarity(&SimilarityTransform::identity());
        assert!(matches!(
            result,
            Err(CloudError::InvalidGeometry { index: 1 })
        ));
    }

    #[test]
    fn test_rotate_about_pivot() {
        let cloud = PointCloud::from_positions(vec![Point3::new(2.0, 1.0, 0.0)]);
        let rotation = Rotation3::from_axis_angle(
            &Unit::new_normalize(Vector3::z()),
            std::f64::consts::FRAC_PI_2,
        );
        let pivot = Point3::new(1.0, 1.0, 0.0);

        let out = cloud.rotate_about(&rotation, &pivot).unwrap();
        assert_relative_eq!(
            out.positions()[0],
            Point3::new(1.0, 2.0, 0.0),
            epsilon = 1e-12
        );
    }
}
