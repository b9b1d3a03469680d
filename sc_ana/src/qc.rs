//! Per-cell and per-gene quality-control metrics.

use sc_types::{AnnMatrix, Column, ScError};

/// Gene-identifier prefix marking mitochondrial genes.
pub const MITO_PREFIX: &str = "MT-";
/// Gene-identifier prefixes marking ribosomal genes.
pub const RIBO_PREFIXES: [&str; 2] = ["RPS", "RPL"];

/// Boolean mask over `gene_ids` for identifiers starting with any of the
/// given prefixes.
pub fn prefix_mask(gene_ids: &[String], prefixes: &[&str]) -> Vec<bool> {
    gene_ids
        .iter()
        .map(|id| prefixes.iter().any(|p| id.starts_with(p)))
        .collect()
}

/// Store a boolean var column `flag` marking genes whose identifier starts
/// with any of `prefixes`. A prefix set matching zero genes means the
/// input does not follow the expected naming convention and is rejected.
pub fn flag_genes_by_prefix(
    matrix: &mut AnnMatrix,
    flag: &str,
    prefixes: &[&str],
) -> Result<usize, ScError> {
    let mask = prefix_mask(matrix.gene_ids(), prefixes);
    let n_flagged = mask.iter().filter(|&&m| m).count();
    if n_flagged == 0 {
        return Err(ScError::InvalidInput(format!(
            "no gene identifiers match prefixes {prefixes:?} for flag '{flag}'"
        )));
    }
    matrix.var_mut().insert(flag, Column::Bool(mask))?;
    Ok(n_flagged)
}

/// Compute per-cell metrics (`n_genes_by_counts`, `total_counts`, and
/// `pct_counts_<flag>` for every requested boolean var flag) and per-gene
/// metrics (`n_cells_by_counts`, `total_counts`), storing them in the
/// obs/var tables.
pub fn calculate_qc_metrics(matrix: &mut AnnMatrix, qc_flags: &[&str]) -> Result<(), ScError> {
    let totals = matrix.cell_sums();
    let n_genes: Vec<i64> = matrix.cell_nnz().into_iter().map(|n| n as i64).collect();

    let mut pct_columns = Vec::with_capacity(qc_flags.len());
    for &flag in qc_flags {
        let mask = matrix.var().bool_column(flag)?.to_vec();
        let flagged = matrix.masked_cell_sums(&mask)?;
        let pct: Vec<f64> = flagged
            .iter()
            .zip(&totals)
            .map(|(&f, &t)| if t > 0.0 { 100.0 * f / t } else { 0.0 })
            .collect();
        pct_columns.push((format!("pct_counts_{flag}"), pct));
    }

    let gene_totals = matrix.gene_sums();
    let gene_cells: Vec<i64> = matrix.gene_nnz().into_iter().map(|n| n as i64).collect();

    let obs = matrix.obs_mut();
    obs.insert("n_genes_by_counts", Column::I64(n_genes))?;
    obs.insert("total_counts", Column::F64(totals))?;
    for (name, pct) in pct_columns {
        obs.insert(&name, Column::F64(pct))?;
    }

    let var = matrix.var_mut();
    var.insert("n_cells_by_counts", Column::I64(gene_cells))?;
    var.insert("total_counts", Column::F64(gene_totals))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> AnnMatrix {
        AnnMatrix::from_triplets(
            3,
            4,
            &[
                (0, 0, 6.0),
                (0, 1, 2.0),
                (0, 2, 2.0),
                (1, 1, 5.0),
                (1, 3, 5.0),
            ],
            vec!["c0".into(), "c1".into(), "c2".into()],
            vec![
                "MT-ND1".into(),
                "RPS6".into(),
                "RPL13".into(),
                "ACTB".into(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn prefix_flags_and_metrics() {
        let mut m = matrix();
        assert_eq!(flag_genes_by_prefix(&mut m, "mt", &[MITO_PREFIX]).unwrap(), 1);
        assert_eq!(flag_genes_by_prefix(&mut m, "rbs", &RIBO_PREFIXES).unwrap(), 2);
        calculate_qc_metrics(&mut m, &["mt", "rbs"]).unwrap();

        assert_eq!(m.obs().i64_column("n_genes_by_counts").unwrap(), &[3, 2, 0]);
        assert_eq!(m.obs().f64_column("total_counts").unwrap(), &[10.0, 10.0, 0.0]);
        let pct_mt = m.obs().f64_column("pct_counts_mt").unwrap();
        assert_eq!(pct_mt, &[60.0, 0.0, 0.0]);
        let pct_rbs = m.obs().f64_column("pct_counts_rbs").unwrap();
        assert_eq!(pct_rbs, &[40.0, 50.0, 0.0]);

        assert_eq!(m.var().i64_column("n_cells_by_counts").unwrap(), &[1, 2, 1, 1]);
    }

    #[test]
    fn zero_total_cell_gets_zero_percentages() {
        let mut m = matrix();
        flag_genes_by_prefix(&mut m, "mt", &[MITO_PREFIX]).unwrap();
        calculate_qc_metrics(&mut m, &["mt"]).unwrap();
        assert_eq!(m.obs().f64_column("pct_counts_mt").unwrap()[2], 0.0);
    }

    #[test]
    fn unmatched_prefix_is_rejected() {
        let mut m = matrix();
        let err = flag_genes_by_prefix(&mut m, "mt", &["mt-"]).unwrap_err();
        assert!(matches!(err, ScError::InvalidInput(_)));
    }

    #[test]
    fn metrics_require_existing_flag() {
        let mut m = matrix();
        assert!(matches!(
            calculate_qc_metrics(&mut m, &["mt"]).unwrap_err(),
            ScError::MissingVarColumn(_)
        ));
    }
}
