//! Principal component analysis via randomized subspace iteration.
//!
//! Factorizes the centered matrix with a blocked power iteration
//! (Gram-Schmidt re-orthonormalization each step) followed by a Jacobi
//! eigensolve of the small projected Gram matrix, so no external linear
//! algebra backend is required.

use log::warn;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use sc_types::ScError;

const POWER_ITERATIONS: usize = 8;
const JACOBI_SWEEPS: usize = 64;

/// PCA output: the projected data, component loadings and per-component
/// explained-variance ratios (descending).
pub struct PcaResult {
    /// cells x components projection.
    pub transformed: Array2<f64>,
    /// genes x components loadings, orthonormal columns.
    pub components: Array2<f64>,
    /// Fraction of total variance captured by each component.
    pub variance_ratio: Array1<f64>,
}

fn orthonormalize_columns(m: &mut Array2<f64>) {
    let k = m.ncols();
    for j in 0..k {
        for prev in 0..j {
            let dot = m.column(j).dot(&m.column(prev));
            let prev_col = m.column(prev).to_owned();
            m.column_mut(j).zip_mut_with(&prev_col, |v, &p| *v -= dot * p);
        }
        let norm = m.column(j).dot(&m.column(j)).sqrt();
        if norm > 1e-12 {
            m.column_mut(j).mapv_inplace(|v| v / norm);
        } else {
            m.column_mut(j).fill(0.0);
        }
    }
}

/// Eigendecomposition of a small symmetric matrix by cyclic Jacobi
/// rotations. Returns (eigenvalues, eigenvectors as columns), unordered.
fn jacobi_eigh(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    for _ in 0..JACOBI_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off < 1e-24 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < 1e-18 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for i in 0..n {
                    let aip = a[[i, p]];
                    let aiq = a[[i, q]];
                    a[[i, p]] = c * aip - s * aiq;
                    a[[i, q]] = s * aip + c * aiq;
                }
                for i in 0..n {
                    let api = a[[p, i]];
                    let aqi = a[[q, i]];
                    a[[p, i]] = c * api - s * aqi;
                    a[[q, i]] = s * api + c * aqi;
                }
                for i in 0..n {
                    let vip = v[[i, p]];
                    let viq = v[[i, q]];
                    v[[i, p]] = c * vip - s * viq;
                    v[[i, q]] = s * vip + c * viq;
                }
            }
        }
    }
    ((0..n).map(|i| a[[i, i]]).collect(), v)
}

/// Compute the leading `n_comps` principal components of `x`
/// (cells x genes). Columns are centered internally; `seed` fixes the
/// random range-finding sketch.
pub fn run_pca(x: &ArrayView2<f64>, n_comps: usize, seed: u64) -> Result<PcaResult, ScError> {
    let n_cells = x.nrows();
    let n_genes = x.ncols();
    if n_cells < 2 {
        return Err(ScError::InvalidInput(
            "PCA needs at least 2 cells".into(),
        ));
    }
    if n_comps == 0 {
        return Err(ScError::InvalidInput("n_comps must be positive".into()));
    }
    let min_dim = n_cells.min(n_genes);
    let k = if n_comps > min_dim {
        warn!(
            "matrix shape ({n_cells}, {n_genes}) < requested PCs {n_comps}, reducing to {min_dim}"
        );
        min_dim
    } else {
        n_comps
    };

    let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_genes));
    let centered = x.to_owned() - &means.view().insert_axis(Axis(0));

    let mut rng = SmallRng::seed_from_u64(seed);
    let mut q = Array2::<f64>::zeros((n_genes, k));
    for value in q.iter_mut() {
        *value = StandardNormal.sample(&mut rng);
    }
    orthonormalize_columns(&mut q);

    for _ in 0..POWER_ITERATIONS {
        let mut z = centered.dot(&q);
        orthonormalize_columns(&mut z);
        q = centered.t().dot(&z);
        orthonormalize_columns(&mut q);
    }

    let b = centered.dot(&q);
    let gram = b.t().dot(&b);
    let (eigvals, eigvecs) = jacobi_eigh(gram);

    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| {
        eigvals[b]
            .partial_cmp(&eigvals[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let eigvecs_sorted = eigvecs.select(Axis(1), &order);
    let eigvals_sorted: Vec<f64> = order.iter().map(|&i| eigvals[i].max(0.0)).collect();

    let components = q.dot(&eigvecs_sorted);
    let transformed = centered.dot(&components);

    let total_variance: f64 = centered.iter().map(|&v| v * v).sum();
    let variance_ratio = Array1::from(
        eigvals_sorted
            .iter()
            .map(|&ev| if total_variance > 0.0 { ev / total_variance } else { 0.0 })
            .collect::<Vec<_>>(),
    );

    Ok(PcaResult {
        transformed,
        components,
        variance_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_cluster_data() -> Array2<f64> {
        // two groups far apart along all coordinates, plus small
        // deterministic jitter so the matrix has full column rank
        let mut x = Array2::<f64>::zeros((20, 5));
        for i in 0..20 {
            let offset = if i < 10 { 0.0 } else { 50.0 };
            for j in 0..5 {
                let jitter = ((i * 7 + j * 13) % 11) as f64 * 0.037;
                x[[i, j]] = offset + (i as f64 * 0.1) + (j as f64) + jitter;
            }
        }
        x
    }

    #[test]
    fn variance_ratios_descend_and_bound() {
        let x = two_cluster_data();
        let result = run_pca(&x.view(), 3, 0).unwrap();
        let vr = &result.variance_ratio;
        assert_eq!(vr.len(), 3);
        for i in 1..vr.len() {
            assert!(vr[i] <= vr[i - 1] + 1e-12);
        }
        assert!(vr.sum() <= 1.0 + 1e-9);
        // one direction dominates this data
        assert!(vr[0] > 0.99);
    }

    #[test]
    fn components_are_orthonormal() {
        let x = two_cluster_data();
        let result = run_pca(&x.view(), 3, 0).unwrap();
        let gram = result.components.t().dot(&result.components);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (gram[[i, j]] - expected).abs() < 1e-8,
                    "gram[{i},{j}] = {}",
                    gram[[i, j]]
                );
            }
        }
    }

    #[test]
    fn projection_separates_clusters() {
        let x = two_cluster_data();
        let result = run_pca(&x.view(), 2, 7).unwrap();
        let pc1: Vec<f64> = result.transformed.column(0).to_vec();
        let first = pc1[..10].iter().sum::<f64>() / 10.0;
        let second = pc1[10..].iter().sum::<f64>() / 10.0;
        assert!((first - second).abs() > 10.0);
    }

    #[test]
    fn deterministic_for_a_seed() {
        let x = two_cluster_data();
        let a = run_pca(&x.view(), 2, 42).unwrap();
        let b = run_pca(&x.view(), 2, 42).unwrap();
        assert_eq!(a.transformed, b.transformed);
    }

    #[test]
    fn requested_components_are_capped() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.5]];
        let result = run_pca(&x.view(), 10, 0).unwrap();
        assert_eq!(result.transformed.ncols(), 2);
    }

    #[test]
    fn degenerate_inputs_error() {
        let x = Array2::<f64>::zeros((1, 3));
        assert!(run_pca(&x.view(), 1, 0).is_err());
        let x = Array2::<f64>::zeros((3, 3));
        assert!(run_pca(&x.view(), 0, 0).is_err());
    }
}
