//! Per-group outlier cell detection.
//!
//! Cells are judged against the mean and standard deviation of their own
//! annotation group (e.g. cell type) along three measures: detected genes,
//! mitochondrial-read percentage and ribosomal-read percentage.

use crate::qc::{prefix_mask, MITO_PREFIX, RIBO_PREFIXES};
use sc_types::{AnnMatrix, ScError};
use std::collections::BTreeMap;

fn mean_sd(cells: &[usize], values: &[f64]) -> (f64, f64) {
    if cells.is_empty() {
        return (0.0, 0.0);
    }
    let n = cells.len() as f64;
    let mean = cells.iter().map(|&i| values[i]).sum::<f64>() / n;
    let var = cells
        .iter()
        .map(|&i| {
            let d = values[i] - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

/// Identify outlier cells within each group of `obs[feature]`.
///
/// For every distinct group value (in sorted order), three measures are
/// computed per member cell: number of detected genes, percentage of reads
/// from `MT-` genes and percentage of reads from `RPS`/`RPL` genes. A cell
/// is flagged when its detected-gene count falls strictly outside
/// mean ± `fd`·sd (population sd), or when either percentage lies strictly
/// above mean + `fd`·sd.
///
/// The returned barcodes are the concatenation of the three flag lists per
/// group, preserving cell order within each list and NOT deduplicated: a
/// cell failing several criteria appears several times. Callers that need
/// membership tests should collect the result into a set.
///
/// A group with a single member has sd 0 and can never be flagged. An
/// empty matrix yields an empty list. The grouping column must exist and
/// hold strings.
pub fn flag_group_outliers(
    matrix: &AnnMatrix,
    feature: &str,
    fd: f64,
) -> Result<Vec<String>, ScError> {
    let group_labels = matrix.obs().str_column(feature)?;

    let genes_detected: Vec<f64> = matrix.cell_nnz().into_iter().map(|n| n as f64).collect();
    let totals = matrix.cell_sums();
    let mito_mask = prefix_mask(matrix.gene_ids(), &[MITO_PREFIX]);
    let ribo_mask = prefix_mask(matrix.gene_ids(), &RIBO_PREFIXES);
    let mito_sums = matrix.masked_cell_sums(&mito_mask)?;
    let ribo_sums = matrix.masked_cell_sums(&ribo_mask)?;
    let pct = |sums: &[f64]| -> Vec<f64> {
        sums.iter()
            .zip(&totals)
            .map(|(&s, &t)| if t > 0.0 { 100.0 * s / t } else { 0.0 })
            .collect()
    };
    let pct_mito = pct(&mito_sums);
    let pct_ribo = pct(&ribo_sums);

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (cell, label) in group_labels.iter().enumerate() {
        groups.entry(label).or_default().push(cell);
    }

    let barcodes = matrix.barcodes();
    let mut flagged = Vec::new();
    for cells in groups.values() {
        let (gene_mean, gene_sd) = mean_sd(cells, &genes_detected);
        let (mito_mean, mito_sd) = mean_sd(cells, &pct_mito);
        let (ribo_mean, ribo_sd) = mean_sd(cells, &pct_ribo);

        for &cell in cells {
            let g = genes_detected[cell];
            if g < gene_mean - fd * gene_sd || g > gene_mean + fd * gene_sd {
                flagged.push(barcodes[cell].clone());
            }
        }
        for &cell in cells {
            if pct_mito[cell] > mito_mean + fd * mito_sd {
                flagged.push(barcodes[cell].clone());
            }
        }
        for &cell in cells {
            if pct_ribo[cell] > ribo_mean + fd * ribo_sd {
                flagged.push(barcodes[cell].clone());
            }
        }
    }
    Ok(flagged)
}
