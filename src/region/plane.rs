//! RANSAC plane fitting and square-region construction.

use super::{RegionConfig, RegionError};
use crate::cloud::PointCloud;
use nalgebra::{Point3, Vector3};
use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};

/// Plane `ax + by + cz + d = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneModel {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl PlaneModel {
    /// Plane through three points; `None` when they are (nearly) collinear.
    pub fn from_points(p0: &Point3<f64>, p1: &Point3<f64>, p2: &Point3<f64>) -> Option<Self> {
        let normal = (p1 - p0).cross(&(p2 - p0));
        if normal.norm() < 1e-12 {
            return None;
        }
        let d = -normal.dot(&p0.coords);
        Some(Self {
            a: normal.x,
            b: normal.y,
            c: normal.z,
            d,
        })
    }

    pub fn normal(&self) -> Vector3<f64> {
        Vector3::new(self.a, self.b, self.c)
    }

    /// Same plane with a unit normal, so `distance` math stays direct.
    pub fn normalized(&self) -> Self {
        let norm = self.normal().norm();
        Self {
            a: self.a / norm,
            b: self.b / norm,
            c: self.c / norm,
            d: self.d / norm,
        }
    }

    /// Unsigned point-plane distance.
    pub fn distance(&self, p: &Point3<f64>) -> f64 {
        (self.a * p.x + self.b * p.y + self.c * p.z + self.d).abs() / self.normal().norm()
    }
}

/// Fit a plane by random-sample consensus.
///
/// Draws 3-point samples for a fixed iteration budget and keeps the plane
/// with the most points within `distance_threshold`; ties keep the
/// first-found model. Sampling is seeded, so a run is reproducible.
pub fn fit_plane_ransac(
    cloud: &PointCloud,
    config: &RegionConfig,
) -> Result<PlaneModel, RegionError> {
    let points = cloud.positions();
    if points.len() < 3 {
        return Err(RegionError::InsufficientPoints {
            found: points.len(),
        });
    }

    let indices: Vec<usize> = (0..points.len()).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut best: Option<(PlaneModel, usize)> = None;
    for _ in 0..config.ransac_iterations {
        let sample: Vec<usize> = indices
            .as_slice()
            .choose_multiple(&mut rng, 3)
            .copied()
            .collect();

        let Some(candidate) =
            PlaneModel::from_points(&points[sample[0]], &points[sample[1]], &points[sample[2]])
        else {
            continue;
        };

        let inliers = points
            .iter()
            .filter(|p| candidate.distance(p) <= config.distance_threshold)
            .count();

        if best.as_ref().is_none_or(|(_, best_count)| inliers > *best_count) {
            best = Some((candidate, inliers));
        }
    }

    match best {
        Some((model, _)) => Ok(model.normalized()),
        None => Err(RegionError::PlaneNotFound {
            iterations: config.ransac_iterations,
        }),
    }
}

/// An axis-aligned square lifted onto a plane.
///
/// Vertices are ordered top-right, top-left, bottom-left, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareRegion {
    pub vertices: [Point3<f64>; 4],
}

impl SquareRegion {
    /// xy bounds of the vertices: `(min_x, max_x, min_y, max_y)`.
    pub fn bounding_rectangle(&self) -> (f64, f64, f64, f64) {
        let xs = self.vertices.iter().map(|v| v.x);
        let ys = self.vertices.iter().map(|v| v.y);
        (
            xs.clone().fold(f64::INFINITY, f64::min),
            xs.fold(f64::NEG_INFINITY, f64::max),
            ys.clone().fold(f64::INFINITY, f64::min),
            ys.fold(f64::NEG_INFINITY, f64::max),
        )
    }
}

/// Build a square of `side_length` centered at `center` and lying on the
/// plane through `center` with the given normal.
///
/// The corner x/y offsets are `±side/2`; each corner's z comes from solving
/// the plane equation, which requires the normal's z component to be
/// nonzero — a plane perpendicular to the ground cannot carry a square
/// parameterized over x/y and fails with `DegeneratePlane`.
pub fn create_square_on_plane(
    center: &Point3<f64>,
    normal: &Vector3<f64>,
    side_length: f64,
) -> Result<SquareRegion, RegionError> {
    let norm = normal.norm();
    if norm < 1e-12 {
        return Err(RegionError::DegeneratePlane {
            message: "zero-length normal".to_string(),
        });
    }
    let unit = normal / norm;
    if unit.z.abs() < 1e-6 {
        return Err(RegionError::DegeneratePlane {
            message: format!(
                "normal z component {:.2e} is too small to solve for z",
                unit.z
            ),
        });
    }

    let half = side_length / 2.0;
    let corners_xy = [
        (half, half),   // top right
        (-half, half),  // top left
        (-half, -half), // bottom left
        (half, -half),  // bottom right
    ];

    let d = -unit.dot(&center.coords);
    let vertices = corners_xy.map(|(dx, dy)| {
        let x = center.x + dx;
        let y = center.y + dy;
        let z = (-d - unit.x * x - unit.y * y) / unit.z;
        Point3::new(x, y, z)
    });

    Ok(SquareRegion { vertices })
}
