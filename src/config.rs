//! Pipeline configuration.
//!
//! Every tunable lives in an explicit struct passed into the stage entry
//! points; there is no process-wide state. Configurations are plain serde
//! types so a whole run can be described by one JSON file.

use crate::error::{AnchorError, AnchorResult};
use crate::marker::DetectionConfig;
use crate::region::RegionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How to treat an input record that fails parsing or validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Abort the load on the first bad record.
    #[default]
    Strict,
    /// Drop the record with a warning and keep going.
    SkipInvalid,
}

/// Inputs, outputs and tunables for a full geo-registration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the capture images (used to resolve detector input paths).
    pub image_dir: PathBuf,
    /// Pose records written by the reconstruction (`images.txt`).
    pub images_txt: PathBuf,
    /// Intrinsics records written by the reconstruction (`cameras.txt`).
    pub cameras_txt: PathBuf,
    /// Directory of per-image binary depth maps.
    pub depth_map_dir: PathBuf,
    /// Directory of per-image marker detection sidecar files.
    pub detections_dir: PathBuf,
    /// Fused dense point cloud.
    pub dense_cloud: PathBuf,
    /// Surveyed marker coordinates, JSON `code -> [x, y, z]`.
    pub reference_markers: PathBuf,
    /// Directory for the per-stage cloud snapshots.
    pub output_dir: PathBuf,
    /// Resolution every depth map must match.
    pub depth_resolution: (usize, usize),
    /// Odd window size for the depth hole-filling fallback.
    pub depth_window: usize,
    /// Policy for malformed or invalid camera records.
    pub record_policy: RecordPolicy,
    pub detection: DetectionConfig,
    pub region: RegionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::new(),
            images_txt: PathBuf::new(),
            cameras_txt: PathBuf::new(),
            depth_map_dir: PathBuf::new(),
            detections_dir: PathBuf::new(),
            dense_cloud: PathBuf::new(),
            reference_markers: PathBuf::new(),
            output_dir: PathBuf::new(),
            depth_resolution: (6960, 4640),
            depth_window: 7,
            record_policy: RecordPolicy::Strict,
            detection: DetectionConfig::default(),
            region: RegionConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a configuration from a JSON file.
    pub fn from_json(path: &Path) -> AnchorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|err| {
            AnchorError::InvalidInput(format!("config {}: {err}", path.display()))
        })
    }

    /// Depth map path for one image, following the stereo stage's
    /// `<image name>.geometric.bin` naming.
    pub fn depth_map_path(&self, image_name: &str) -> PathBuf {
        self.depth_map_dir.join(format!("{image_name}.geometric.bin"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.depth_resolution, (6960, 4640));
        assert_eq!(config.depth_window, 7);
        assert_eq!(config.record_policy, RecordPolicy::Strict);
    }

    #[test]
    fn test_from_json_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "dense_cloud": "/data/run1/fused.ply",
                "depth_resolution": [640, 480],
                "record_policy": "skip_invalid"
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json(&path).unwrap();
        assert_eq!(config.dense_cloud, PathBuf::from("/data/run1/fused.ply"));
        assert_eq!(config.depth_resolution, (640, 480));
        assert_eq!(config.record_policy, RecordPolicy::SkipInvalid);
        // Untouched fields keep their defaults.
        assert_eq!(config.depth_window, 7);
    }

    #[test]
    fn test_depth_map_path() {
        let config = PipelineConfig {
            depth_map_dir: PathBuf::from("/ws/stereo/depth_maps"),
            ..Default::default()
        };
        assert_eq!(
            config.depth_map_path("IMG_0001.JPG"),
            PathBuf::from("/ws/stereo/depth_maps/IMG_0001.JPG.geometric.bin")
        );
    }
}
