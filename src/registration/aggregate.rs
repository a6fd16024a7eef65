//! Multi-view fusion of single-view marker estimates.

use super::Estimate3D;
use nalgebra::Point3;
use std::collections::BTreeMap;
use tracing::debug;

/// A marker position fused across every view that saw it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedMarker {
    pub position: Point3<f64>,
    /// Number of contributing views, for confidence reporting.
    pub views: usize,
}

/// Fuse estimates per marker code with a component-wise median.
///
/// The median tolerates a single view with a bad detection or depth sample
/// without needing an outlier threshold. Codes that gathered no estimates
/// are simply absent from the result — markers out of frame for a whole
/// capture are normal, not an error.
pub fn aggregate_estimates(
    estimates: impl IntoIterator<Item = Estimate3D>,
) -> BTreeMap<u32, AggregatedMarker> {
    let mut groups: BTreeMap<u32, Vec<Point3<f64>>> = BTreeMap::new();
    for estimate in estimates {
        groups.entry(estimate.code).or_default().push(estimate.position);
    }

    groups
        .into_iter()
        .map(|(code, positions)| {
            let views = positions.len();
            let mut xs: Vec<f64> = positions.iter().map(|p| p.x).collect();
            let mut ys: Vec<f64> = positions.iter().map(|p| p.y).collect();
            let mut zs: Vec<f64> = positions.iter().map(|p| p.z).collect();
            let fused = Point3::new(median(&mut xs), median(&mut ys), median(&mut zs));
            debug!(code, views, x = fused.x, y = fused.y, z = fused.z, "fused marker");
            (code, AggregatedMarker { position: fused, views })
        })
        .collect()
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).expect("estimates are finite"));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}
