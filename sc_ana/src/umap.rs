//! 2D embedding of the neighbor graph by stochastic gradient descent on
//! the fuzzy-topology cross entropy (the UMAP objective).

use ndarray::{Array2, ArrayView2};
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use sc_types::ScError;
use sprs::CsMat;

const GRADIENT_CLIP: f64 = 4.0;

/// Embedding parameters. The defaults match the usual library settings;
/// the pipeline overrides `min_dist` and `spread`.
#[derive(Debug, Clone)]
pub struct UmapParams {
    pub n_components: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub learning_rate: f64,
    pub n_epochs: usize,
    pub negative_sample_rate: usize,
    pub seed: u64,
}

impl Default for UmapParams {
    fn default() -> Self {
        UmapParams {
            n_components: 2,
            min_dist: 0.1,
            spread: 1.0,
            learning_rate: 1.0,
            n_epochs: 200,
            negative_sample_rate: 5,
            seed: 0,
        }
    }
}

/// Fit the (a, b) parameters of the low-dimensional membership curve
/// 1 / (1 + a d^(2b)) to the target shaped by `min_dist` and `spread`,
/// by Gauss-Newton least squares.
fn fit_ab_params(min_dist: f64, spread: f64) -> (f64, f64) {
    let n_points = 300;
    let max_d = 3.0 * spread + min_dist;
    let mut a = 1.0_f64;
    let mut b = 1.0_f64;

    for _ in 0..100 {
        let mut jtj_00 = 0.0;
        let mut jtj_01 = 0.0;
        let mut jtj_11 = 0.0;
        let mut jtr_0 = 0.0;
        let mut jtr_1 = 0.0;
        for k in 0..n_points {
            let d = (k as f64 + 0.5) * max_d / n_points as f64;
            let target = if d <= min_dist {
                1.0
            } else {
                (-(d - min_dist) / spread).exp()
            };
            let d2b = d.powf(2.0 * b);
            let denom = 1.0 + a * d2b;
            let residual = 1.0 / denom - target;
            let df_da = -d2b / (denom * denom);
            let df_db = if d > 1e-12 {
                -a * d2b * 2.0 * d.ln() / (denom * denom)
            } else {
                0.0
            };
            jtj_00 += df_da * df_da;
            jtj_01 += df_da * df_db;
            jtj_11 += df_db * df_db;
            jtr_0 += df_da * residual;
            jtr_1 += df_db * residual;
        }
        let det = jtj_00 * jtj_11 - jtj_01 * jtj_01;
        if det.abs() < 1e-20 {
            break;
        }
        let da = -(jtj_11 * jtr_0 - jtj_01 * jtr_1) / det;
        let db = -(jtj_00 * jtr_1 - jtj_01 * jtr_0) / det;
        a = (a + da).max(0.001);
        b = (b + db).max(0.001);
        if da.abs() < 1e-8 && db.abs() < 1e-8 {
            break;
        }
    }
    (a, b)
}

fn edges_from_connectivities(conn: &CsMat<f64>) -> Vec<(usize, usize, f64)> {
    conn.iter()
        .filter(|&(&w, (i, j))| i < j && w > 0.0)
        .map(|(&w, (i, j))| (i, j, w))
        .collect()
}

/// Embed cells into `n_components` dimensions. `init` supplies the
/// initial coordinates (typically the leading principal components);
/// `conn` is the symmetric fuzzy connectivity graph.
pub fn embed(
    conn: &CsMat<f64>,
    init: ArrayView2<f64>,
    params: &UmapParams,
) -> Result<Array2<f64>, ScError> {
    let n_cells = conn.rows();
    if init.nrows() != n_cells {
        return Err(ScError::DimensionMismatch {
            expected: n_cells,
            actual: init.nrows(),
        });
    }
    let dim = params.n_components;
    if dim == 0 || dim > init.ncols() {
        return Err(ScError::InvalidInput(format!(
            "cannot embed into {dim} dimensions from a {}-column initialization",
            init.ncols()
        )));
    }

    // initialize from the leading columns, rescaled to a small range for
    // SGD stability
    let mut embedding = init.slice(ndarray::s![.., ..dim]).to_owned();
    let max_abs = embedding.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    if max_abs > 0.0 {
        embedding.mapv_inplace(|v| v * 10.0 / max_abs);
    }

    let edges = edges_from_connectivities(conn);
    if edges.is_empty() || params.n_epochs == 0 {
        return Ok(embedding);
    }

    let (a, b) = fit_ab_params(params.min_dist, params.spread);
    let max_weight = edges.iter().fold(0.0_f64, |m, &(_, _, w)| m.max(w));
    let epochs_per_sample: Vec<f64> = edges
        .iter()
        .map(|&(_, _, w)| {
            let normalized = w / max_weight;
            if normalized > 0.0 {
                1.0 / normalized
            } else {
                params.n_epochs as f64 + 1.0
            }
        })
        .collect();
    let mut epoch_of_next_sample = epochs_per_sample.clone();

    let mut rng = SmallRng::seed_from_u64(params.seed);
    for epoch in 0..params.n_epochs {
        let lr = params.learning_rate * (1.0 - epoch as f64 / params.n_epochs as f64);
        for (edge_idx, &(i, j, _)) in edges.iter().enumerate() {
            if epoch_of_next_sample[edge_idx] > epoch as f64 {
                continue;
            }
            epoch_of_next_sample[edge_idx] += epochs_per_sample[edge_idx];

            let mut dist_sq = 0.0;
            for d in 0..dim {
                let diff = embedding[[i, d]] - embedding[[j, d]];
                dist_sq += diff * diff;
            }
            let dist_sq = dist_sq.max(1e-10);
            let attract = -2.0 * a * b * dist_sq.powf(b - 1.0) / (1.0 + a * dist_sq.powf(b));
            for d in 0..dim {
                let diff = embedding[[i, d]] - embedding[[j, d]];
                let grad = (attract * diff).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                embedding[[i, d]] += lr * grad;
                embedding[[j, d]] -= lr * grad;
            }

            for _ in 0..params.negative_sample_rate {
                let neg = rng.gen_range(0..n_cells);
                if neg == i {
                    continue;
                }
                let mut neg_dist_sq = 0.0;
                for d in 0..dim {
                    let diff = embedding[[i, d]] - embedding[[neg, d]];
                    neg_dist_sq += diff * diff;
                }
                let neg_dist_sq = neg_dist_sq.max(1e-10);
                let repulse =
                    2.0 * b / ((0.001 + neg_dist_sq) * (1.0 + a * neg_dist_sq.powf(b)));
                for d in 0..dim {
                    let diff = embedding[[i, d]] - embedding[[neg, d]];
                    let grad = (repulse * diff).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                    embedding[[i, d]] += lr * grad;
                }
            }
        }
    }

    Ok(embedding)
}
