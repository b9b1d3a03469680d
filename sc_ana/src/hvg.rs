//! Highly-variable-gene selection by binned normalized dispersion.

use log::info;
use ndarray::{Array, Array1};
use ndarray_stats::interpolate::Linear;
use ndarray_stats::Quantile1dExt;
use noisy_float::types::{n64, N64};
use sc_types::{AnnMatrix, Column, ScError};
use std::cmp::Ordering;

const DISPERSION_BINS: usize = 20;

/// Selected genes and the per-gene normalized dispersion used to rank
/// them (NaN for genes with no defined dispersion).
pub struct HvgResult {
    pub normalized_dispersion: Vec<f64>,
    pub selected: Vec<usize>,
}

fn median_n64(values: &mut Vec<N64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable();
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1].raw() + values[n / 2].raw()) / 2.0
    } else {
        values[n / 2].raw()
    }
}

fn binned_median(
    binned: &[f64],
    values: &[f64],
    bin_edges: &[N64],
) -> (Vec<f64>, Vec<usize>) {
    let max_index = bin_edges.len() - 1;
    let mut bin_indices = Vec::with_capacity(values.len());
    let mut binned_values = vec![Vec::new(); max_index];
    for (i, &v) in binned.iter().enumerate() {
        let idx = match bin_edges[1..max_index].binary_search(&n64(v)) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        bin_indices.push(idx);
        if values[i].is_finite() {
            binned_values[idx].push(n64(values[i]));
        }
    }
    let medians = binned_values
        .into_iter()
        .map(|mut vec| median_n64(&mut vec))
        .collect();
    (medians, bin_indices)
}

fn gene_mean_var(matrix: &AnnMatrix) -> (Vec<f64>, Vec<f64>) {
    let n = matrix.n_cells() as f64;
    let mut sums = vec![0.0; matrix.n_genes()];
    let mut sq_sums = vec![0.0; matrix.n_genes()];
    for row in matrix.x().outer_iterator() {
        for (gene, &v) in row.iter() {
            sums[gene] += v;
            sq_sums[gene] += v * v;
        }
    }
    let means: Vec<f64> = sums.iter().map(|&s| s / n).collect();
    let vars: Vec<f64> = sq_sums
        .iter()
        .zip(&means)
        .map(|(&sq, &m)| sq / n - m * m)
        .collect();
    (means, vars)
}

/// Rank genes by dispersion normalized against genes of similar mean
/// expression and select the top `n_top_genes`.
///
/// Genes are binned by mean-expression quantiles; within each bin the
/// dispersion is centered on the bin median and scaled by the bin's
/// median absolute deviation.
pub fn select_highly_variable(
    matrix: &AnnMatrix,
    n_top_genes: usize,
) -> Result<HvgResult, ScError> {
    if matrix.n_cells() < 2 {
        return Err(ScError::InvalidInput(
            "highly-variable-gene selection needs at least 2 cells".into(),
        ));
    }
    let n_genes = matrix.n_genes();
    let (means, vars) = gene_mean_var(matrix);
    let dispersion: Vec<f64> = means
        .iter()
        .zip(&vars)
        .map(|(&m, &v)| if m > 0.0 { (v - m) / (m * m) } else { f64::NAN })
        .collect();

    let qs = Array::linspace(0.0, 1.0, DISPERSION_BINS + 1).mapv(n64);
    let mut quantiles = Array1::from(means.iter().map(|&m| n64(m)).collect::<Vec<_>>())
        .quantiles_mut(&qs, &Linear)
        .map(ndarray::ArrayBase::into_raw_vec)
        .unwrap_or_default();
    quantiles.dedup();

    let normalized = if quantiles.len() <= 1 {
        dispersion.clone()
    } else {
        let (medians, bin_indices) = binned_median(&means, &dispersion, &quantiles);
        let centered: Vec<f64> = dispersion
            .iter()
            .zip(&bin_indices)
            .map(|(&d, &b)| d - medians[b])
            .collect();
        let deviations: Vec<f64> = centered.iter().map(|&d| d.abs()).collect();
        let (mads, bin_indices) = binned_median(&means, &deviations, &quantiles);
        centered
            .iter()
            .zip(&bin_indices)
            .map(|(&d, &b)| d / mads[b].max(1e-12))
            .collect()
    };

    // sort in reverse, such that NaNs land at the end
    let mut ranked: Vec<usize> = (0..n_genes).collect();
    ranked.sort_by(|&a, &b| {
        let da = normalized[a];
        let db = normalized[b];
        if da.is_nan() && db.is_nan() {
            Ordering::Equal
        } else if da.is_nan() {
            Ordering::Less
        } else if db.is_nan() {
            Ordering::Greater
        } else {
            da.partial_cmp(&db).unwrap()
        }
        .reverse()
    });
    ranked.truncate(n_top_genes.min(n_genes));
    let mut selected = ranked;
    selected.sort_unstable();

    info!(
        "selected {} of {} genes as highly variable",
        selected.len(),
        n_genes
    );
    Ok(HvgResult {
        normalized_dispersion: normalized,
        selected,
    })
}

/// Store `highly_variable` and `dispersions_norm` var columns.
pub fn annotate_highly_variable(matrix: &mut AnnMatrix, result: &HvgResult) -> Result<(), ScError> {
    let mut flags = vec![false; matrix.n_genes()];
    for &g in &result.selected {
        flags[g] = true;
    }
    matrix.var_mut().insert("highly_variable", Column::Bool(flags))?;
    matrix.var_mut().insert(
        "dispersions_norm",
        Column::F64(result.normalized_dispersion.clone()),
    )?;
    Ok(())
}
