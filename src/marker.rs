//! Coded-marker records and the detector seam.
//!
//! The symbol decoder that locates coded circular targets in an image is an
//! external capability: this crate only defines the [`MarkerDetector`] trait
//! and validates the *shape* of what comes back (finite coordinates, sane
//! scores). [`JsonDetectionSource`] adapts precomputed per-image sidecar
//! files for batch runs; tests substitute in-memory fakes.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from marker inputs.
#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("detection in '{image}' is malformed: {message}")]
    InvalidDetection { image: String, message: String },

    #[error("reference marker code '{code}' is not an integer")]
    InvalidCode { code: String },
}

/// One decoded target in one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    /// Decoded integer identifier.
    pub code: u32,
    /// Pixel centroid, horizontal.
    pub u: f64,
    /// Pixel centroid, vertical.
    pub v: f64,
    /// Decoder confidence in `[0, 1]`.
    pub score: f64,
}

/// Parameters forwarded to the decoder, plus the acceptance threshold
/// applied to its output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Decoder neighborhood size.
    pub window: usize,
    /// Minimum correlation score for a detection to be used.
    pub score_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window: 8,
            score_threshold: 0.9,
        }
    }
}

/// Capability interface over the external marker decoder.
///
/// `Sync` because the pipeline fans detection out across images on a thread
/// pool; implementations must not keep per-call mutable state.
pub trait MarkerDetector: Sync {
    /// Locate and decode every coded target visible in `image`.
    fn detect(
        &self,
        image: &Path,
        config: &DetectionConfig,
    ) -> Result<Vec<MarkerDetection>, MarkerError>;
}

/// Shape-check oracle output before it enters the pipeline.
pub fn validate_detections(
    image: &str,
    detections: &[MarkerDetection],
) -> Result<(), MarkerError> {
    for det in detections {
        if !det.u.is_finite() || !det.v.is_finite() {
            return Err(MarkerError::InvalidDetection {
                image: image.to_string(),
                message: format!("code {} has a non-finite centroid", det.code),
            });
        }
        if !det.score.is_finite() || !(0.0..=1.0).contains(&det.score) {
            return Err(MarkerError::InvalidDetection {
                image: image.to_string(),
                message: format!("code {} has score {} outside [0, 1]", det.code, det.score),
            });
        }
    }
    Ok(())
}

/// Detector adapter over per-image JSON sidecar files
/// (`<dir>/<image name>.json`, an array of detection records).
///
/// The decoder already ran with its own parameters when the sidecars were
/// written, so the per-run detection config is not consulted here. A
/// missing sidecar means the decoder found nothing for that image and is an
/// empty result, not an error; a present-but-malformed sidecar is an error.
#[derive(Debug, Clone)]
pub struct JsonDetectionSource {
    dir: PathBuf,
}

impl JsonDetectionSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl MarkerDetector for JsonDetectionSource {
    fn detect(
        &self,
        image: &Path,
        _config: &DetectionConfig,
    ) -> Result<Vec<MarkerDetection>, MarkerError> {
        let name = image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let path = self.dir.join(format!("{name}.json"));

        if !path.exists() {
            debug!(image = name, "no detection sidecar; treating as empty");
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&path)?;
        let detections: Vec<MarkerDetection> =
            serde_json::from_str(&content).map_err(|source| MarkerError::Json {
                path: path.display().to_string(),
                source,
            })?;
        validate_detections(name, &detections)?;
        Ok(detections)
    }
}

/// Immutable map from marker code to surveyed real-world coordinate.
#[derive(Debug, Clone, Default)]
pub struct ReferenceMarkers {
    coords: BTreeMap<u32, Point3<f64>>,
}

impl ReferenceMarkers {
    /// Load from a JSON object `{"119": [0.0, 0.0, 0.0], ...}`.
    pub fn from_json(path: &Path) -> Result<Self, MarkerError> {
        let content = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, [f64; 3]> =
            serde_json::from_str(&content).map_err(|source| MarkerError::Json {
                path: path.display().to_string(),
                source,
            })?;

        let mut coords = BTreeMap::new();
        for (key, [x, y, z]) in raw {
            let code = key
                .parse::<u32>()
                .map_err(|_| MarkerError::InvalidCode { code: key })?;
            coords.insert(code, Point3::new(x, y, z));
        }
        Ok(Self { coords })
    }

    pub fn insert(&mut self, code: u32, coord: Point3<f64>) {
        self.coords.insert(code, coord);
    }

    pub fn get(&self, code: u32) -> Option<&Point3<f64>> {
        self.coords.get(&code)
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Point3<f64>)> {
        self.coords.iter().map(|(&code, coord)| (code, coord))
    }
}

impl FromIterator<(u32, Point3<f64>)> for ReferenceMarkers {
    fn from_iter<I: IntoIterator<Item = (u32, Point3<f64>)>>(iter: I) -> Self {
        Self {
            coords: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_non_finite_centroid() {
        let detections = [MarkerDetection {
            code: 119,
            u: f64::NAN,
            v: 10.0,
            score: 0.95,
        }];
        assert!(matches!(
            validate_detections("IMG_0001.JPG", &detections),
            Err(MarkerError::InvalidDetection { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_score() {
        let detections = [MarkerDetection {
            code: 85,
            u: 1.0,
            v: 2.0,
            score: 1.5,
        }];
        assert!(validate_detections("IMG_0001.JPG", &detections).is_err());
    }

    #[test]
    fn test_json_detection_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("IMG_0001.JPG.json"),
            r#"[{"code": 119, "u": 100.5, "v": 200.25, "score": 0.97}]"#,
        )
        .unwrap();

        let source = JsonDetectionSource::new(dir.path().to_path_buf());
        let config = DetectionConfig::default();
        let detections = source
            .detect(Path::new("/captures/IMG_0001.JPG"), &config)
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].code, 119);

        // No sidecar: empty, not an error.
        let empty = source
            .detect(Path::new("/captures/IMG_0002.JPG"), &config)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_json_detection_source_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IMG_0003.JPG.json"), "not json").unwrap();

        let source = JsonDetectionSource::new(dir.path().to_path_buf());
        assert!(matches!(
            source.detect(Path::new("IMG_0003.JPG"), &DetectionConfig::default()),
            Err(MarkerError::Json { .. })
        ));
    }

    #[test]
    fn test_reference_markers_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.json");
        std::fs::write(
            &path,
            r#"{"119": [0, 0, 0], "85": [259, 0, 0], "31": [259, 259, 0], "59": [0, 259, 0]}"#,
        )
        .unwrap();

        let markers = ReferenceMarkers::from_json(&path).unwrap();
        assert_eq!(markers.len(), 4);
        assert_eq!(markers.get(85), Some(&Point3::new(259.0, 0.0, 0.0)));
        assert_eq!(markers.get(7), None);
    }

    #[test]
    fn test_reference_markers_bad_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.json");
        std::fs::write(&path, r#"{"twelve": [0, 0, 0]}"#).unwrap();

        assert!(matches!(
            ReferenceMarkers::from_json(&path),
            Err(MarkerError::InvalidCode { .. })
        ));
    }
}
