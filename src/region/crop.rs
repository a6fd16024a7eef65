//! Square-region cropping.

use super::plane::SquareRegion;
use crate::cloud::PointCloud;
use nalgebra::{Point3, Vector2};
use serde::{Deserialize, Serialize};

/// How points are tested against the square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// Keep points whose x/y fall inside the axis-aligned bounding
    /// rectangle of the square's vertices. On a tilted plane this retains
    /// points outside the square's true rotated boundary — the historical
    /// behavior downstream consumers expect.
    #[default]
    BoundingBox,
    /// Keep points whose in-plane projection falls inside the square's
    /// actual boundary.
    Polygon,
}

/// Crop `cloud` to the square. Colors follow their points.
pub fn filter_square(cloud: &PointCloud, square: &SquareRegion, mode: CropMode) -> PointCloud {
    let keep: Vec<usize> = match mode {
        CropMode::BoundingBox => {
            let (min_x, max_x, min_y, max_y) = square.bounding_rectangle();
            cloud
                .positions()
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    p.x >= min_x && p.x <= max_x && p.y >= min_y && p.y <= max_y
                })
                .map(|(i, _)| i)
                .collect()
        }
        CropMode::Polygon => {
            let frame = PlaneFrame::from_square(square);
            let polygon = square.vertices.map(|v| frame.project(&v));
            cloud
                .positions()
                .iter()
                .enumerate()
                .filter(|(_, p)| inside_convex_polygon(&polygon, &frame.project(p)))
                .map(|(i, _)| i)
                .collect()
        }
    };
    cloud.select(&keep)
}

/// 2-D coordinate frame spanning the square's plane.
struct PlaneFrame {
    origin: Point3<f64>,
    e1: nalgebra::Vector3<f64>,
    e2: nalgebra::Vector3<f64>,
}

impl PlaneFrame {
    fn from_square(square: &SquareRegion) -> Self {
        let [tr, tl, bl, _] = square.vertices;
        let origin = Point3::from((tr.coords + bl.coords) / 2.0);
        let e1 = (tr - tl).normalize();
        let normal = (tr - tl).cross(&(bl - tl)).normalize();
        let e2 = normal.cross(&e1);
        Self { origin, e1, e2 }
    }

    /// Drop the out-of-plane component.
    fn project(&self, p: &Point3<f64>) -> Vector2<f64> {
        let rel = p - self.origin;
        Vector2::new(rel.dot(&self.e1), rel.dot(&self.e2))
    }
}

/// Convex containment by consistent edge-cross signs; boundary counts as
/// inside.
fn inside_convex_polygon(polygon: &[Vector2<f64>; 4], q: &Vector2<f64>) -> bool {
    let mut sign = 0.0f64;
    for i in 0..4 {
        let a = polygon[i];
        let b = polygon[(i + 1) % 4];
        let edge = b - a;
        let to_q = q - a;
        let cross = edge.x * to_q.y - edge.y * to_q.x;
        if cross.abs() < 1e-12 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::create_square_on_plane;
    use nalgebra::Vector3;

    fn horizontal_square() -> SquareRegion {
        create_square_on_plane(&Point3::origin(), &Vector3::z(), 90.0).unwrap()
    }

    #[test]
    fn test_bbox_crop_on_horizontal_square() {
        let cloud = PointCloud::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(44.9, -44.9, 3.0), // z does not matter for the crop
                Point3::new(45.1, 0.0, 0.0),
                Point3::new(0.0, -60.0, 0.0),
            ],
            Some(vec![[1, 0, 0], [2, 0, 0], [3, 0, 0], [4, 0, 0]]),
        )
        .unwrap();

        let cropped = filter_square(&cloud, &horizontal_square(), CropMode::BoundingBox);
        assert_eq!(cropped.len(), 2);
        assert_eq!(cropped.colors().unwrap(), &[[1, 0, 0], [2, 0, 0]]);
    }

    /// On a tilted plane the bbox keeps off-plane points whose in-plane
    /// projection lands outside the square's true boundary.
    #[test]
    fn test_polygon_tighter_than_bbox_on_tilted_plane() {
        let normal = Vector3::new(0.5, 0.0, 1.0);
        let square = create_square_on_plane(&Point3::origin(), &normal, 90.0).unwrap();

        // x/y inside the bbox, but 50 units above the plane: projecting
        // along the tilted normal pushes it past the square's edge.
        let probe = Point3::new(-44.0, 0.0, 50.0);
        let cloud = PointCloud::from_positions(vec![probe, Point3::origin()]);

        let bbox = filter_square(&cloud, &square, CropMode::BoundingBox);
        let polygon = filter_square(&cloud, &square, CropMode::Polygon);

        assert_eq!(bbox.len(), 2);
        assert_eq!(polygon.len(), 1);
        assert_eq!(polygon.positions()[0], Point3::origin());
    }

    #[test]
    fn test_polygon_boundary_counts_as_inside() {
        let square = horizontal_square();
        let cloud = PointCloud::from_positions(vec![
            Point3::new(45.0, 0.0, 0.0),
            Point3::new(45.0, 45.0, 0.0),
        ]);
        let cropped = filter_square(&cloud, &square, CropMode::Polygon);
        assert_eq!(cropped.len(), 2);
    }
}
