//! Camera parameter store.
//!
//! Parses the pose and intrinsics text files written by the reconstruction
//! stage (`images.txt` / `cameras.txt`) into a per-image lookup structure.
//!
//! Pose convention: the stored rotation `R` and translation `t` map world
//! coordinates into the camera frame, `p_cam = R · p_world + t`. The inverse
//! used for back-projection is `p_world = Rᵀ · (p_cam − t)`.
//!
//! The rotation matrix is built from the *raw* quaternion coefficients of the
//! record and then validated against `‖RᵀR − I‖ < 1e-4` and `det R ≈ +1`, so
//! a corrupted record is rejected instead of being silently renormalized.

use crate::config::RecordPolicy;
use nalgebra::{Matrix3, Point3, Vector3};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Frobenius-norm tolerance for the rotation orthonormality check.
const ORTHONORMALITY_TOL: f64 = 1e-4;

/// Errors from camera parameter parsing and validation.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("image '{image}' references unknown camera id {camera_id}")]
    UnknownCameraId { image: String, camera_id: u32 },

    #[error("camera {camera_id} uses unsupported model '{model}' (undistorted workspaces emit PINHOLE)")]
    UnsupportedModel { camera_id: u32, model: String },

    #[error("image '{image}' has a non-orthonormal rotation")]
    NonOrthonormalRotation { image: String },

    #[error("duplicate image name '{name}'")]
    DuplicateImage { name: String },
}

/// Pinhole intrinsics of one camera record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

/// Pose and intrinsics of a single registered image.
#[derive(Debug, Clone)]
pub struct CameraParameters {
    pub image_id: u32,
    pub name: String,
    /// World-to-camera rotation.
    pub rotation: Matrix3<f64>,
    /// World-to-camera translation.
    pub translation: Vector3<f64>,
    pub intrinsics: Intrinsics,
}

impl CameraParameters {
    /// Map a world-frame point into the camera frame.
    pub fn world_to_camera(&self, p_world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p_world.coords + self.translation)
    }

    /// Map a camera-frame point into the world frame: `Rᵀ · (p_cam − t)`.
    pub fn camera_to_world(&self, p_cam: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation.transpose() * (p_cam.coords - self.translation))
    }
}

/// Per-image camera parameter lookup, keyed by image file name.
#[derive(Debug, Clone, Default)]
pub struct CameraStore {
    cameras: HashMap<String, CameraParameters>,
}

impl CameraStore {
    /// Load and join the pose and intrinsics files.
    ///
    /// `policy` decides whether a record that fails validation aborts the
    /// load (`Strict`) or drops that image with a warning (`SkipInvalid`).
    pub fn load(
        images_txt: &Path,
        cameras_txt: &Path,
        policy: RecordPolicy,
    ) -> Result<Self, CameraError> {
        let intrinsics = parse_cameras(&std::fs::read_to_string(cameras_txt)?)?;
        let store = parse_images(&std::fs::read_to_string(images_txt)?, &intrinsics, policy)?;
        Ok(store)
    }

    pub fn get(&self, image_name: &str) -> Option<&CameraParameters> {
        self.cameras.get(image_name)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CameraParameters)> {
        self.cameras.iter()
    }
}

/// Rotation matrix from raw (unnormalized) quaternion coefficients.
///
/// For a unit quaternion this is the standard conversion; for anything else
/// the result fails the orthonormality check downstream, which is the point.
fn rotation_from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64) -> Matrix3<f64> {
    Matrix3::new(
        1.0 - 2.0 * (qy * qy + qz * qz),
        2.0 * (qx * qy - qz * qw),
        2.0 * (qx * qz + qy * qw),
        2.0 * (qx * qy + qz * qw),
        1.0 - 2.0 * (qx * qx + qz * qz),
        2.0 * (qy * qz - qx * qw),
        2.0 * (qx * qz - qy * qw),
        2.0 * (qy * qz + qx * qw),
        1.0 - 2.0 * (qx * qx + qy * qy),
    )
}

fn is_orthonormal(r: &Matrix3<f64>) -> bool {
    let defect = (r.transpose() * r - Matrix3::identity()).norm();
    defect < ORTHONORMALITY_TOL && (r.determinant() - 1.0).abs() < ORTHONORMALITY_TOL
}

fn parse_field<T: std::str::FromStr>(
    field: &str,
    line: usize,
    what: &str,
) -> Result<T, CameraError> {
    field.parse().map_err(|_| CameraError::Parse {
        line,
        message: format!("invalid {what}: '{field}'"),
    })
}

/// Parse the intrinsics table: `CAMERA_ID MODEL WIDTH HEIGHT PARAMS…`.
fn parse_cameras(content: &str) -> Result<HashMap<u32, Intrinsics>, CameraError> {
    let mut table = HashMap::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_num = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return Err(CameraError::Parse {
                line: line_num,
                message: format!("expected at least 4 fields, found {}", parts.len()),
            });
        }

        let camera_id: u32 = parse_field(parts[0], line_num, "camera id")?;
        let model = parts[1];
        let width: u32 = parse_field(parts[2], line_num, "width")?;
        let height: u32 = parse_field(parts[3], line_num, "height")?;
        let params: Vec<f64> = parts[4..]
            .iter()
            .map(|p| parse_field(p, line_num, "camera parameter"))
            .collect::<Result<_, _>>()?;

        let (fx, fy, cx, cy) = match model {
            "PINHOLE" if params.len() >= 4 => (params[0], params[1], params[2], params[3]),
            "SIMPLE_PINHOLE" if params.len() >= 3 => (params[0], params[0], params[1], params[2]),
            "PINHOLE" | "SIMPLE_PINHOLE" => {
                return Err(CameraError::Parse {
                    line: line_num,
                    message: format!("model {model} is missing intrinsic parameters"),
                });
            }
            other => {
                return Err(CameraError::UnsupportedModel {
                    camera_id,
                    model: other.to_string(),
                });
            }
        };

        table.insert(
            camera_id,
            Intrinsics {
                fx,
                fy,
                cx,
                cy,
                width,
                height,
            },
        );
    }

    Ok(table)
}

/// Parse the pose file. Each pose line
/// `IMAGE_ID QW QX QY QZ TX TY TZ CAMERA_ID NAME` is followed by a 2-D
/// observation line that is skipped unconditionally (it may be empty).
fn parse_images(
    content: &str,
    intrinsics: &HashMap<u32, Intrinsics>,
    policy: RecordPolicy,
) -> Result<CameraStore, CameraError> {
    let lines: Vec<&str> = content.lines().collect();
    let mut cameras = HashMap::new();

    let mut i = 0;
    while i < lines.len() {
        let line_num = i + 1;
        let line = lines[i].trim();
        if line.is_empty() || line.starts_with('#') {
            i += 1;
            continue;
        }
        // The observation line belongs to this record even when empty.
        i += 2;

        match parse_pose_line(line, line_num, intrinsics) {
            Ok(params) => {
                if cameras.contains_key(&params.name) {
                    return Err(CameraError::DuplicateImage { name: params.name });
                }
                cameras.insert(params.name.clone(), params);
            }
            Err(err) => match policy {
                RecordPolicy::Strict => return Err(err),
                RecordPolicy::SkipInvalid => {
                    warn!(line = line_num, %err, "skipping invalid image record");
                }
            },
        }
    }

    Ok(CameraStore { cameras })
}

fn parse_pose_line(
    line: &str,
    line_num: usize,
    intrinsics: &HashMap<u32, Intrinsics>,
) -> Result<CameraParameters, CameraError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 10 {
        return Err(CameraError::Parse {
            line: line_num,
            message: format!("expected 10 fields in pose record, found {}", parts.len()),
        });
    }

    let image_id: u32 = parse_field(parts[0], line_num, "image id")?;
    let qw: f64 = parse_field(parts[1], line_num, "quaternion w")?;
    let qx: f64 = parse_field(parts[2], line_num, "quaternion x")?;
    let qy: f64 = parse_field(parts[3], line_num, "quaternion y")?;
    let qz: f64 = parse_field(parts[4], line_num, "quaternion z")?;
    let tx: f64 = parse_field(parts[5], line_num, "translation x")?;
    let ty: f64 = parse_field(parts[6], line_num, "translation y")?;
    let tz: f64 = parse_field(parts[7], line_num, "translation z")?;
    let camera_id: u32 = parse_field(parts[8], line_num, "camera id")?;
    // Image names may contain spaces.
    let name = parts[9..].join(" ");

    let rotation = rotation_from_quaternion(qw, qx, qy, qz);
    if !is_orthonormal(&rotation) {
        return Err(CameraError::NonOrthonormalRotation { image: name });
    }

    let intr = intrinsics
        .get(&camera_id)
        .copied()
        .ok_or(CameraError::UnknownCameraId {
            image: name.clone(),
            camera_id,
        })?;

    Ok(CameraParameters {
        image_id,
        name,
        rotation,
        translation: Vector3::new(tx, ty, tz),
        intrinsics: intr,
    })
}
