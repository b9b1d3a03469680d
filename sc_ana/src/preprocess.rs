//! Gene filtering, library-size normalization, covariate regression and
//! unit-variance scaling.

use log::info;
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use sc_types::{AnnMatrix, ScError};

/// New matrix keeping only the genes where `keep` is true.
pub fn retain_genes(matrix: &AnnMatrix, keep: &[bool]) -> Result<AnnMatrix, ScError> {
    if keep.len() != matrix.n_genes() {
        return Err(ScError::DimensionMismatch {
            expected: matrix.n_genes(),
            actual: keep.len(),
        });
    }
    let indices: Vec<usize> = (0..matrix.n_genes()).filter(|&g| keep[g]).collect();
    Ok(matrix.select_genes(&indices))
}

/// Drop genes detected in fewer than `min_cells` cells.
pub fn filter_genes_min_cells(matrix: &AnnMatrix, min_cells: usize) -> AnnMatrix {
    let nnz = matrix.gene_nnz();
    let indices: Vec<usize> = (0..matrix.n_genes())
        .filter(|&g| nnz[g] >= min_cells)
        .collect();
    info!(
        "gene filter (min {} cells): {} -> {} genes",
        min_cells,
        matrix.n_genes(),
        indices.len()
    );
    matrix.select_genes(&indices)
}

/// Scale every cell so its total count becomes `target_sum`. Cells with a
/// zero total are left untouched.
pub fn normalize_total(matrix: &mut AnnMatrix, target_sum: f64) -> Result<(), ScError> {
    let factors: Vec<f64> = matrix
        .cell_sums()
        .into_iter()
        .map(|s| if s > 0.0 { target_sum / s } else { 1.0 })
        .collect();
    matrix.scale_cells(&factors)
}

/// Natural-log transform ln(1 + x) of every stored value.
pub fn log1p(matrix: &mut AnnMatrix) {
    matrix.map_values(f64::ln_1p);
}

fn invert_small(m: &Array2<f64>) -> Option<Array2<f64>> {
    // Gauss-Jordan with partial pivoting; good enough for the handful of
    // covariates passed to regress_out.
    let n = m.nrows();
    let mut aug = Array2::<f64>::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }
    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = aug[[col, col]].abs();
        for row in (col + 1)..n {
            if aug[[row, col]].abs() > pivot_val {
                pivot_val = aug[[row, col]].abs();
                pivot_row = row;
            }
        }
        if pivot_val < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..2 * n {
                aug.swap([col, j], [pivot_row, j]);
            }
        }
        let pivot = aug[[col, col]];
        for j in 0..2 * n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[[row, col]];
            if factor != 0.0 {
                for j in 0..2 * n {
                    aug[[row, j]] -= factor * aug[[col, j]];
                }
            }
        }
    }
    let mut inv = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            inv[[i, j]] = aug[[i, n + j]];
        }
    }
    Some(inv)
}

/// Replace each gene's expression by the residual of an ordinary
/// least-squares fit on the given covariates (plus intercept).
pub fn regress_out(x: &mut Array2<f64>, covariates: &[Vec<f64>]) -> Result<(), ScError> {
    if covariates.is_empty() {
        return Ok(());
    }
    let n_cells = x.nrows();
    let n_genes = x.ncols();
    for cov in covariates {
        if cov.len() != n_cells {
            return Err(ScError::DimensionMismatch {
                expected: n_cells,
                actual: cov.len(),
            });
        }
    }

    let n_cols = covariates.len() + 1;
    let mut design = Array2::<f64>::zeros((n_cells, n_cols));
    for i in 0..n_cells {
        design[[i, 0]] = 1.0;
    }
    for (k, cov) in covariates.iter().enumerate() {
        for i in 0..n_cells {
            design[[i, k + 1]] = cov[i];
        }
    }

    let xtx = design.t().dot(&design);
    let xtx_inv = invert_small(&xtx)
        .ok_or_else(|| ScError::InvalidInput("singular design matrix in regression".into()))?;

    let residuals: Vec<Vec<f64>> = {
        let xr = &*x;
        (0..n_genes)
            .into_par_iter()
            .map(|gene| {
                let y = xr.column(gene);
                let xty = design.t().dot(&y);
                let beta = xtx_inv.dot(&xty);
                let fitted = design.dot(&beta);
                y.iter()
                    .zip(fitted.iter())
                    .map(|(&obs, &fit)| obs - fit)
                    .collect()
            })
            .collect()
    };
    for (gene, residual) in residuals.into_iter().enumerate() {
        for (cell, value) in residual.into_iter().enumerate() {
            x[[cell, gene]] = value;
        }
    }
    Ok(())
}

/// Standardize each gene to zero mean and unit variance (population
/// variance; constant genes are only centered), then truncate values above
/// `max_value`.
pub fn scale_clip(x: &mut Array2<f64>, max_value: f64) {
    let n_cells = x.nrows();
    if n_cells == 0 {
        return;
    }
    let n = n_cells as f64;
    for mut column in x.axis_iter_mut(Axis(1)) {
        let mean = column.sum() / n;
        let var = column.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let sd = var.sqrt();
        if sd > 0.0 {
            column.mapv_inplace(|v| ((v - mean) / sd).min(max_value));
        } else {
            column.mapv_inplace(|v| (v - mean).min(max_value));
        }
    }
}

/// Build covariate vectors from numeric obs columns.
pub fn obs_covariates(matrix: &AnnMatrix, keys: &[String]) -> Result<Vec<Vec<f64>>, ScError> {
    keys.iter()
        .map(|key| Ok(matrix.obs().f64_column(key)?.to_vec()))
        .collect()
}
