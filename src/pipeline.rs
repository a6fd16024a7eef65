//! Stage orchestration for a full geo-registration run.
//!
//! The per-image work (detection, depth load, back-projection) is
//! embarrassingly parallel and fans out across the rayon pool; every worker
//! only reads the shared camera store and produces independent estimates.
//! Everything from aggregation onward needs the merged estimate set and
//! runs single-threaded.
//!
//! Per-image failures are recovered by omission — an image that cannot
//! contribute simply contributes nothing — with the reason logged. A depth
//! map that does not exist is an expected skip (the stereo stage does not
//! cover every image); a depth map that exists but fails to decode is that
//! image's failure. Run-level failures (no solvable transform, unreadable
//! cloud) abort with context.

use crate::camera::{CameraParameters, CameraStore};
use crate::cloud::{read_ply, write_ply, PlyFormat, PointCloud};
use crate::config::PipelineConfig;
use crate::depth::DepthMap;
use crate::error::{AnchorError, AnchorResult};
use crate::marker::{MarkerDetector, ReferenceMarkers};
use crate::registration::{
    aggregate_estimates, project_detection, refine_plane_alignment, snap_to_cloud,
    solve_similarity, AggregatedMarker, Estimate3D, MarkerSnap, SimilarityTransform,
};
use nalgebra::{Point3, Rotation3};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Everything a completed run reports back.
#[derive(Debug)]
pub struct RegistrationOutcome {
    pub transform: SimilarityTransform,
    /// Fused marker estimates in the reconstruction frame, with view counts.
    pub markers: BTreeMap<u32, AggregatedMarker>,
    /// Residuals of the reference markers against the anchored cloud.
    pub snaps: Vec<MarkerSnap>,
    /// Secondary plane-alignment rotation.
    pub refinement_rotation: Rotation3<f64>,
    /// Fully refined cloud, ready for region extraction.
    pub cloud: PointCloud,
    pub aligned_path: PathBuf,
    pub refined_path: PathBuf,
}

/// Detect, back-project and fuse marker positions across the image set.
pub fn estimate_marker_positions(
    detector: &dyn MarkerDetector,
    store: &CameraStore,
    config: &PipelineConfig,
) -> BTreeMap<u32, AggregatedMarker> {
    let images: Vec<(&String, &CameraParameters)> = store.iter().collect();
    let image_count = images.len();

    let estimates: Vec<Estimate3D> = images
        .into_par_iter()
        .flat_map(|(name, camera)| collect_image_estimates(detector, name, camera, config))
        .collect();

    info!(
        images = image_count,
        estimates = estimates.len(),
        "collected single-view marker estimates"
    );
    aggregate_estimates(estimates)
}

/// One image's estimates; failures degrade to an empty contribution.
fn collect_image_estimates(
    detector: &dyn MarkerDetector,
    name: &str,
    camera: &CameraParameters,
    config: &PipelineConfig,
) -> Vec<Estimate3D> {
    let image_path = config.image_dir.join(name);
    let detections = match detector.detect(&image_path, &config.detection) {
        Ok(detections) => detections,
        Err(err) => {
            warn!(image = name, %err, "marker detection failed; skipping image");
            return Vec::new();
        }
    };

    let threshold = config.detection.score_threshold;
    let accepted: Vec<_> = detections
        .into_iter()
        .filter(|d| d.score >= threshold)
        .collect();
    if accepted.is_empty() {
        return Vec::new();
    }

    let depth_path = config.depth_map_path(name);
    if !depth_path.exists() {
        // Not present is an expected skip, distinct from a decode failure.
        debug!(image = name, "no depth map; skipping image");
        return Vec::new();
    }
    let depth_map = match DepthMap::load(&depth_path, config.depth_resolution) {
        Ok(map) => map,
        Err(err) => {
            warn!(image = name, %err, "invalid depth map; skipping image");
            return Vec::new();
        }
    };

    accepted
        .iter()
        .filter_map(
            |detection| match project_detection(detection, &depth_map, camera, config.depth_window)
            {
                Ok(estimate) => Some(estimate),
                Err(err) => {
                    debug!(image = name, code = detection.code, %err, "dropping detection");
                    None
                }
            },
        )
        .collect()
}

/// Solve the similarity transform from fused estimates to the surveyed
/// coordinates and apply it to the cloud.
///
/// Only codes present in both the estimates and the reference set
/// contribute; pairing follows ascending code order, so a run is
/// deterministic.
pub fn register_cloud(
    cloud: &PointCloud,
    markers: &BTreeMap<u32, AggregatedMarker>,
    references: &ReferenceMarkers,
) -> AnchorResult<(PointCloud, SimilarityTransform)> {
    let mut source: Vec<Point3<f64>> = Vec::new();
    let mut target: Vec<Point3<f64>> = Vec::new();
    for (&code, marker) in markers {
        if let Some(reference) = references.get(code) {
            source.push(marker.position);
            target.push(*reference);
        } else {
            warn!(code, "estimated marker has no surveyed coordinate");
        }
    }
    info!(pairs = source.len(), "solving similarity transform");

    let transform = solve_similarity(&source, &target)?;
    info!(%transform, "anchored reconstruction to survey frame");

    let aligned = cloud.apply_similarity(&transform)?;
    Ok((aligned, transform))
}

/// Run the whole pipeline: cameras, markers, solve, transform, snap,
/// refine. Writes the aligned and refined cloud snapshots under the
/// configured output directory.
pub fn run(
    config: &PipelineConfig,
    detector: &dyn MarkerDetector,
    references: &ReferenceMarkers,
) -> AnchorResult<RegistrationOutcome> {
    std::fs::create_dir_all(&config.output_dir)?;

    let store = CameraStore::load(&config.images_txt, &config.cameras_txt, config.record_policy)?;
    if store.is_empty() {
        return Err(AnchorError::InvalidInput(
            "camera files contain no registered images".to_string(),
        ));
    }
    info!(images = store.len(), "loaded camera parameters");

    let markers = estimate_marker_positions(detector, &store, config);
    for (code, marker) in &markers {
        info!(
            code,
            views = marker.views,
            x = marker.position.x,
            y = marker.position.y,
            z = marker.position.z,
            "fused marker estimate"
        );
    }

    let cloud = read_ply(&config.dense_cloud)?;
    info!(points = cloud.len(), "loaded dense cloud");

    let (aligned, transform) = register_cloud(&cloud, &markers, references)?;
    let aligned_path = config.output_dir.join("aligned.ply");
    write_ply(&aligned_path, &aligned, PlyFormat::BinaryLittleEndian)?;

    let snaps = snap_to_cloud(references, &aligned)?;
    for snap in &snaps {
        info!(code = snap.code, residual = snap.distance, "marker residual");
    }

    let marker_positions: Vec<Point3<f64>> = snaps.iter().map(|s| s.nearest).collect();
    let refinement = refine_plane_alignment(&aligned, &marker_positions)?;
    let refined_path = config.output_dir.join("aligned_rotated.ply");
    write_ply(&refined_path, &refinement.cloud, PlyFormat::BinaryLittleEndian)?;

    Ok(RegistrationOutcome {
        transform,
        markers,
        snaps,
        refinement_rotation: refinement.rotation,
        cloud: refinement.cloud,
        aligned_path,
        refined_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn marker(x: f64, y: f64, z: f64, views: usize) -> AggregatedMarker {
        AggregatedMarker {
            position: Point3::new(x, y, z),
            views,
        }
    }

    #[test]
    fn test_register_cloud_pairs_by_code() {
        // Estimates are the survey square at half scale; code 7 has no
        // surveyed counterpart and must be ignored.
        let mut markers = BTreeMap::new();
        markers.insert(119, marker(0.0, 0.0, 0.0, 3));
        markers.insert(85, marker(129.5, 0.0, 0.0, 2));
        markers.insert(31, marker(129.5, 129.5, 0.0, 4));
        markers.insert(59, marker(0.0, 129.5, 0.0, 2));
        markers.insert(7, marker(777.0, 777.0, 777.0, 1));

        let references: ReferenceMarkers = [
            (119, Point3::new(0.0, 0.0, 0.0)),
            (85, Point3::new(259.0, 0.0, 0.0)),
            (31, Point3::new(259.0, 259.0, 0.0)),
            (59, Point3::new(0.0, 259.0, 0.0)),
        ]
        .into_iter()
        .collect();

        let cloud = PointCloud::from_positions(vec![Point3::new(64.75, 64.75, 0.0)]);
        let (aligned, transform) = register_cloud(&cloud, &markers, &references).unwrap();

        assert_relative_eq!(transform.scale, 2.0, epsilon = 1e-9);
        assert_relative_eq!(
            aligned.positions()[0],
            Point3::new(129.5, 129.5, 0.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_register_cloud_underdetermined() {
        let mut markers = BTreeMap::new();
        markers.insert(119, marker(0.0, 0.0, 0.0, 1));
        markers.insert(85, marker(1.0, 0.0, 0.0, 1));

        let references: ReferenceMarkers = [
            (119, Point3::new(0.0, 0.0, 0.0)),
            (85, Point3::new(259.0, 0.0, 0.0)),
        ]
        .into_iter()
        .collect();

        let cloud = PointCloud::from_positions(vec![Point3::origin()]);
        let result = register_cloud(&cloud, &markers, &references);
        assert!(matches!(result, Err(AnchorError::Registration(_))));
    }
}
