use clap::Parser;
use geoanchor::config::PipelineConfig;
use geoanchor::init_logger;
use geoanchor::marker::{JsonDetectionSource, ReferenceMarkers};
use geoanchor::pipeline;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "register_cloud")]
#[command(about = "Anchor a dense reconstruction to surveyed marker coordinates")]
struct Args {
    /// Pipeline configuration JSON (paths, resolutions, thresholds)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the output directory from the configuration
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();

    let mut config = PipelineConfig::from_json(&args.config)?;
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }

    let references = ReferenceMarkers::from_json(&config.reference_markers)?;
    info!(markers = references.len(), "loaded surveyed marker coordinates");

    let detector = JsonDetectionSource::new(config.detections_dir.clone());
    let outcome = pipeline::run(&config, &detector, &references)?;

    info!("{}", outcome.transform);
    for (code, marker) in &outcome.markers {
        info!(code, views = marker.views, "marker contribution");
    }
    for snap in &outcome.snaps {
        info!(code = snap.code, residual = snap.distance, "marker residual");
    }
    info!(
        aligned = %outcome.aligned_path.display(),
        refined = %outcome.refined_path.display(),
        "wrote cloud snapshots"
    );
    Ok(())
}
