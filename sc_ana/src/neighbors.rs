//! Nearest-neighbor graphs over the PCA projection, including the
//! batch-balanced variant used for batch-effect correction, and the fuzzy
//! connectivity weights derived from them.

use ndarray::ArrayView2;
use rayon::prelude::*;
use sc_types::ScError;
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};

/// Per-cell nearest neighbors, each list sorted by ascending distance.
pub struct NeighborGraph {
    pub neighbors: Vec<Vec<(usize, f64)>>,
}

impl NeighborGraph {
    pub fn n_cells(&self) -> usize {
        self.neighbors.len()
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn row(proj: &ArrayView2<f64>, i: usize) -> Vec<f64> {
    proj.row(i).to_vec()
}

/// Exact k-nearest-neighbor search by brute force.
pub fn knn(proj: ArrayView2<f64>, k: usize) -> NeighborGraph {
    let n = proj.nrows();
    let k = k.min(n.saturating_sub(1));
    let neighbors = (0..n)
        .into_par_iter()
        .map(|i| {
            let a = row(&proj, i);
            let mut dists: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, euclidean(&a, &row(&proj, j))))
                .collect();
            dists.sort_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal));
            dists.truncate(k);
            dists
        })
        .collect();
    NeighborGraph { neighbors }
}

/// Batch-balanced k-nearest neighbors: each cell draws
/// `neighbors_within_batch` nearest neighbors from every batch separately,
/// so all batches contribute equally to every neighborhood.
pub fn batch_balanced_knn(
    proj: ArrayView2<f64>,
    batches: &[usize],
    neighbors_within_batch: usize,
) -> Result<NeighborGraph, ScError> {
    let n = proj.nrows();
    if batches.len() != n {
        return Err(ScError::DimensionMismatch {
            expected: n,
            actual: batches.len(),
        });
    }
    let n_batches = batches.iter().copied().max().map_or(0, |b| b + 1);
    let mut by_batch: Vec<Vec<usize>> = vec![Vec::new(); n_batches];
    for (cell, &batch) in batches.iter().enumerate() {
        by_batch[batch].push(cell);
    }

    let neighbors = (0..n)
        .into_par_iter()
        .map(|i| {
            let a = row(&proj, i);
            let mut merged = Vec::with_capacity(neighbors_within_batch * n_batches);
            for members in &by_batch {
                let mut dists: Vec<(usize, f64)> = members
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| (j, euclidean(&a, &row(&proj, j))))
                    .collect();
                dists.sort_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal));
                dists.truncate(neighbors_within_batch);
                merged.extend(dists);
            }
            merged.sort_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal));
            merged
        })
        .collect();
    Ok(NeighborGraph { neighbors })
}

fn smooth_bandwidth(distances: &[f64], target: f64) -> f64 {
    let rho = distances.first().copied().unwrap_or(0.0);
    let mut lo = 1e-10_f64;
    let mut hi = 1e4_f64;
    for _ in 0..64 {
        let mid = (lo + hi) / 2.0;
        let sum: f64 = distances
            .iter()
            .map(|&d| {
                let shifted = (d - rho).max(0.0);
                (-shifted / mid).exp()
            })
            .sum();
        if sum > target {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    (lo + hi) / 2.0
}

/// Fuzzy connectivity weights for a neighbor graph: per-cell bandwidths
/// chosen by binary search against log2(k), exponential membership
/// weights, symmetrized by w + wT - w∘wT. Returns a symmetric sparse
/// matrix.
pub fn connectivities(graph: &NeighborGraph) -> CsMat<f64> {
    let n = graph.n_cells();
    let mut directed: HashMap<(usize, usize), f64> = HashMap::new();
    for (i, neighbors) in graph.neighbors.iter().enumerate() {
        if neighbors.is_empty() {
            continue;
        }
        let dists: Vec<f64> = neighbors.iter().map(|&(_, d)| d).collect();
        let rho = dists[0];
        let target = (neighbors.len().max(2) as f64).log2();
        let sigma = smooth_bandwidth(&dists, target).max(1e-10);
        for &(j, d) in neighbors {
            let w = if d <= rho {
                1.0
            } else {
                (-(d - rho) / sigma).exp()
            };
            directed.insert((i, j), w);
        }
    }

    let mut tri = TriMat::new((n, n));
    let mut done: HashSet<(usize, usize)> = HashSet::new();
    for (&(i, j), &w_ij) in &directed {
        let key = if i < j { (i, j) } else { (j, i) };
        if !done.insert(key) {
            continue;
        }
        let w_ji = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let sym = w_ij + w_ji - w_ij * w_ji;
        if sym > 0.0 {
            tri.add_triplet(key.0, key.1, sym);
            tri.add_triplet(key.1, key.0, sym);
        }
    }
    tri.to_csr()
}
