//! Driver for the external dense-reconstruction pipeline.
//!
//! The reconstruction itself (feature extraction through stereo fusion) is
//! an external COLMAP-compatible executable; this module only sequences its
//! stages and locates the file outputs the registration consumes. Nothing
//! here interprets the reconstruction's internals.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Errors from driving the external reconstruction.
#[derive(Error, Debug)]
pub enum ReconstructionError {
    #[error("failed to run {stage}: {source}")]
    Spawn {
        stage: &'static str,
        source: std::io::Error,
    },

    #[error("{stage} exited with {status}")]
    Failed {
        stage: &'static str,
        status: std::process::ExitStatus,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage} did not produce expected output {path}")]
    MissingOutput { stage: &'static str, path: PathBuf },
}

/// Where the reconstruction runs and what it runs on.
#[derive(Debug, Clone)]
pub struct ReconstructionConfig {
    /// The reconstruction executable.
    pub binary: PathBuf,
    /// Directory of capture images.
    pub image_dir: PathBuf,
    /// Workspace directory; created if absent.
    pub workspace_dir: PathBuf,
}

/// File outputs consumed by the registration stages.
#[derive(Debug, Clone)]
pub struct ReconstructionOutputs {
    pub sparse_dir: PathBuf,
    pub dense_dir: PathBuf,
    /// Per-image binary depth maps.
    pub depth_map_dir: PathBuf,
    /// Fused dense point cloud.
    pub fused_cloud: PathBuf,
}

/// Run the fixed stage sequence: feature extraction, exhaustive matching,
/// sparse mapping, undistortion, patch-match stereo, stereo fusion.
///
/// Each stage's exit status is checked before the next starts; the fused
/// cloud and the depth map directory are verified to exist before
/// returning.
pub fn run_dense_reconstruction(
    config: &ReconstructionConfig,
) -> Result<ReconstructionOutputs, ReconstructionError> {
    let workspace = &config.workspace_dir;
    let database = workspace.join("database.db");
    let sparse_dir = workspace.join("sparse");
    let dense_dir = workspace.join("dense");
    let fused_cloud = dense_dir.join("fused.ply");
    std::fs::create_dir_all(&sparse_dir)?;
    std::fs::create_dir_all(&dense_dir)?;

    run_stage(
        config,
        "feature_extractor",
        &[
            "--database_path",
            &database.to_string_lossy(),
            "--image_path",
            &config.image_dir.to_string_lossy(),
        ],
    )?;
    run_stage(
        config,
        "exhaustive_matcher",
        &["--database_path", &database.to_string_lossy()],
    )?;
    run_stage(
        config,
        "mapper",
        &[
            "--database_path",
            &database.to_string_lossy(),
            "--image_path",
            &config.image_dir.to_string_lossy(),
            "--output_path",
            &sparse_dir.to_string_lossy(),
        ],
    )?;
    run_stage(
        config,
        "image_undistorter",
        &[
            "--image_path",
            &config.image_dir.to_string_lossy(),
            "--input_path",
            &sparse_dir.join("0").to_string_lossy(),
            "--output_path",
            &dense_dir.to_string_lossy(),
        ],
    )?;
    run_stage(
        config,
        "patch_match_stereo",
        &["--workspace_path", &dense_dir.to_string_lossy()],
    )?;
    run_stage(
        config,
        "stereo_fusion",
        &[
            "--workspace_path",
            &dense_dir.to_string_lossy(),
            "--output_path",
            &fused_cloud.to_string_lossy(),
        ],
    )?;

    let depth_map_dir = dense_dir.join("stereo").join("depth_maps");
    for (stage, path) in [
        ("stereo_fusion", &fused_cloud),
        ("patch_match_stereo", &depth_map_dir),
    ] {
        if !path.exists() {
            return Err(ReconstructionError::MissingOutput {
                stage,
                path: path.clone(),
            });
        }
    }

    Ok(ReconstructionOutputs {
        sparse_dir,
        dense_dir,
        depth_map_dir,
        fused_cloud,
    })
}

fn run_stage(
    config: &ReconstructionConfig,
    stage: &'static str,
    args: &[&str],
) -> Result<(), ReconstructionError> {
    info!(stage, "running reconstruction stage");
    let started = Instant::now();

    let status = Command::new(&config.binary)
        .arg(stage)
        .args(args)
        .status()
        .map_err(|source| ReconstructionError::Spawn { stage, source })?;

    if !status.success() {
        return Err(ReconstructionError::Failed { stage, status });
    }
    info!(stage, elapsed_s = started.elapsed().as_secs_f64(), "stage finished");
    Ok(())
}

/// Standard depth map location inside a dense workspace.
pub fn depth_map_dir(dense_dir: &Path) -> PathBuf {
    dense_dir.join("stereo").join("depth_maps")
}
