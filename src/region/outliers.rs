//! Statistical outlier removal.

use crate::cloud::PointCloud;
use kiddo::{KdTree, SquaredEuclidean};

/// Drop points whose mean distance to their `nb_neighbors` nearest
/// neighbors exceeds the population mean by more than `std_ratio` standard
/// deviations. Returns the filtered cloud (colors preserved) and the number
/// of points removed.
///
/// A second pass over an already-filtered cloud removes nothing further
/// when the survivors form a homogeneous neighborhood structure, which
/// makes the filter safe to re-run.
pub fn remove_statistical_outliers(
    cloud: &PointCloud,
    nb_neighbors: usize,
    std_ratio: f64,
) -> (PointCloud, usize) {
    let n = cloud.len();
    // Need at least one neighbor besides the point itself.
    let k = nb_neighbors.min(n.saturating_sub(1));
    if k == 0 {
        return (cloud.clone(), 0);
    }

    let mut tree: KdTree<f64, 3> = KdTree::new();
    for (idx, p) in cloud.positions().iter().enumerate() {
        tree.add(&[p.x, p.y, p.z], idx as u64);
    }

    let mut mean_distances = Vec::with_capacity(n);
    for (idx, p) in cloud.positions().iter().enumerate() {
        // k+1 results include the query point itself.
        let neighbors = tree.nearest_n::<SquaredEuclidean>(&[p.x, p.y, p.z], k + 1);
        let mut sum = 0.0;
        let mut count = 0usize;
        for neighbor in neighbors {
            if neighbor.item as usize != idx {
                sum += neighbor.distance.sqrt();
                count += 1;
            }
        }
        mean_distances.push(if count > 0 { sum / count as f64 } else { 0.0 });
    }

    let mean = mean_distances.iter().sum::<f64>() / n as f64;
    let variance = mean_distances
        .iter()
        .map(|d| (d - mean) * (d - mean))
        .sum::<f64>()
        / n as f64;
    let threshold = mean + std_ratio * variance.sqrt();

    let keep: Vec<usize> = mean_distances
        .iter()
        .enumerate()
        .filter(|(_, &d)| d <= threshold)
        .map(|(i, _)| i)
        .collect();

    let removed = n - keep.len();
    (cloud.select(&keep), removed)
}
