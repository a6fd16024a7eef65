use clap::Parser;
use geoanchor::init_logger;
use geoanchor::reconstruction::{run_dense_reconstruction, ReconstructionConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "run_reconstruction")]
#[command(about = "Drive the external dense-reconstruction pipeline end to end")]
struct Args {
    /// Reconstruction executable
    #[arg(long, default_value = "colmap")]
    binary: PathBuf,

    /// Directory of capture images
    #[arg(short, long)]
    image_dir: PathBuf,

    /// Workspace directory for all reconstruction outputs
    #[arg(short, long)]
    workspace: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();

    let config = ReconstructionConfig {
        binary: args.binary,
        image_dir: args.image_dir,
        workspace_dir: args.workspace,
    };
    let outputs = run_dense_reconstruction(&config)?;

    info!(
        fused = %outputs.fused_cloud.display(),
        depth_maps = %outputs.depth_map_dir.display(),
        sparse = %outputs.sparse_dir.display(),
        "reconstruction complete"
    );
    Ok(())
}
