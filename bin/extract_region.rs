use clap::Parser;
use geoanchor::cloud::{read_ply, write_ply, PlyFormat};
use geoanchor::init_logger;
use geoanchor::region::{extract_planar_region, CropMode, RegionConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "extract_region")]
#[command(about = "Cut a planar square region out of a registered point cloud")]
struct Args {
    /// Input PLY cloud
    input: PathBuf,

    /// Output PLY cloud
    output: PathBuf,

    /// Neighbors examined per point by the outlier filter
    #[arg(long, default_value = "20")]
    nb_neighbors: usize,

    /// Standard-deviation multiplier for outlier classification
    #[arg(long, default_value = "2.0")]
    std_ratio: f64,

    /// RANSAC inlier distance threshold
    #[arg(long, default_value = "0.01")]
    distance_threshold: f64,

    /// RANSAC iteration budget
    #[arg(long, default_value = "1000")]
    iterations: usize,

    /// Side length of the extracted square
    #[arg(long, default_value = "90.0")]
    side_length: f64,

    /// Test true in-plane containment instead of the xy bounding box
    #[arg(long)]
    polygon: bool,

    /// Write ascii PLY instead of binary
    #[arg(long)]
    ascii: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logger();
    let args = Args::parse();

    let config = RegionConfig {
        nb_neighbors: args.nb_neighbors,
        std_ratio: args.std_ratio,
        distance_threshold: args.distance_threshold,
        ransac_iterations: args.iterations,
        side_length: args.side_length,
        crop_mode: if args.polygon {
            CropMode::Polygon
        } else {
            CropMode::BoundingBox
        },
        ..Default::default()
    };

    let cloud = read_ply(&args.input)?;
    info!(points = cloud.len(), input = %args.input.display(), "loaded cloud");

    let extraction = extract_planar_region(&cloud, &config)?;
    info!(
        a = extraction.plane.a,
        b = extraction.plane.b,
        c = extraction.plane.c,
        d = extraction.plane.d,
        "plane model"
    );
    info!(
        removed = extraction.outliers_removed,
        kept = extraction.cloud.len(),
        "extraction finished"
    );

    let format = if args.ascii {
        PlyFormat::Ascii
    } else {
        PlyFormat::BinaryLittleEndian
    };
    write_ply(&args.output, &extraction.cloud, format)?;
    info!(output = %args.output.display(), "wrote region cloud");
    Ok(())
}
