//! Back-projection of marker detections into world space.

use super::RegistrationError;
use crate::camera::CameraParameters;
use crate::depth::DepthMap;
use crate::marker::MarkerDetection;
use nalgebra::Point3;

/// One single-view world-space estimate of a marker's position.
///
/// Transient: produced here, consumed by the aggregation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate3D {
    pub code: u32,
    pub position: Point3<f64>,
    /// Image the estimate came from, for diagnostics.
    pub image: String,
}

/// Lift a detection into world space.
///
/// The pixel is unprojected through the pinhole intrinsics at the sampled
/// depth, `p_cam = d · [(u − cx)/fx, (v − cy)/fy, 1]`, then mapped to the
/// world frame with the inverse of the image's world-to-camera pose,
/// `p_world = Rᵀ(p_cam − t)`.
///
/// Depth sampling uses the hole-filling fallback of [`DepthMap::sample`];
/// when even that fails the error carries the marker code and image name so
/// the caller can drop just this detection.
pub fn project_detection(
    detection: &MarkerDetection,
    depth_map: &DepthMap,
    camera: &CameraParameters,
    depth_window: usize,
) -> Result<Estimate3D, RegistrationError> {
    let depth = depth_map
        .sample(detection.u, detection.v, depth_window)
        .map_err(|source| RegistrationError::Projection {
            code: detection.code,
            image: camera.name.clone(),
            source,
        })?;

    let intr = &camera.intrinsics;
    let p_cam = Point3::new(
        (detection.u - intr.cx) / intr.fx * depth,
        (detection.v - intr.cy) / intr.fy * depth,
        depth,
    );

    Ok(Estimate3D {
        code: detection.code,
        position: camera.camera_to_world(&p_cam),
        image: camera.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use crate::depth::DepthError;
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Unit, Vector3};

    fn test_camera() -> CameraParameters {
        let rotation = Rotation3::from_axis_angle(
            &Unit::new_normalize(Vector3::new(0.2, -0.4, 1.0)),
            0.37,
        );
        CameraParameters {
            image_id: 1,
            name: "IMG_0001.JPG".to_string(),
            rotation: *rotation.matrix(),
            translation: Vector3::new(0.3, -0.1, 4.0),
            intrinsics: Intrinsics {
                fx: 1200.0,
                fy: 1180.0,
                cx: 320.0,
                cy: 240.0,
                width: 640,
                height: 480,
            },
        }
    }

    /// Project a world point forward through the camera, then recover it.
    #[test]
    fn test_projection_round_trip() {
        let camera = test_camera();
        let p_world = Point3::new(0.4, -0.2, 0.9);

        let p_cam = camera.world_to_camera(&p_world);
        assert!(p_cam.z > 0.0);
        let u = camera.intrinsics.fx * p_cam.x / p_cam.z + camera.intrinsics.cx;
        let v = camera.intrinsics.fy * p_cam.y / p_cam.z + camera.intrinsics.cy;

        let mut grid = vec![0.0f32; 640 * 480];
        grid.fill(p_cam.z as f32);
        let depth_map = DepthMap::from_grid(640, 480, grid).unwrap();

        let detection = MarkerDetection {
            code: 119,
            u,
            v,
            score: 0.99,
        };
        let estimate = project_detection(&detection, &depth_map, &camera, 7).unwrap();

        assert_eq!(estimate.code, 119);
        assert_eq!(estimate.image, "IMG_0001.JPG");
        // f32 depth storage limits the attainable accuracy.
        assert_relative_eq!(estimate.position, p_world, epsilon = 1e-5);
    }

    #[test]
    fn test_projection_uses_depth_fallback() {
        let camera = test_camera();
        // Depth 2.0 everywhere except a hole at the detection pixel.
        let mut grid = vec![2.0f32; 640 * 480];
        grid[100 * 640 + 200] = 0.0;
        let depth_map = DepthMap::from_grid(640, 480, grid).unwrap();

        let detection = MarkerDetection {
            code: 85,
            u: 200.0,
            v: 100.0,
            score: 0.95,
        };
        let estimate = project_detection(&detection, &depth_map, &camera, 7).unwrap();

        // The median of the window is the surrounding depth.
        let p_cam = camera.world_to_camera(&estimate.position);
        assert_relative_eq!(p_cam.z, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_projection_error_carries_context() {
        let camera = test_camera();
        let depth_map = DepthMap::from_grid(640, 480, vec![0.0; 640 * 480]).unwrap();

        let detection = MarkerDetection {
            code: 31,
            u: 10.0,
            v: 10.0,
            score: 0.95,
        };
        let err = project_detection(&detection, &depth_map, &camera, 7).unwrap_err();
        match err {
            RegistrationError::Projection {
                code: 31,
                image,
                source: DepthError::NoValidDepth { .. },
            } => assert_eq!(image, "IMG_0001.JPG"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
