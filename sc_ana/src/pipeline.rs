//! The end-to-end analysis driver: outlier removal, QC, cell-cycle
//! scoring, gene filtering, normalization, HVG selection, regression,
//! scaling, PCA, batch-balanced neighbors, clustering sweep and UMAP,
//! with every artifact persisted into one output directory.

use crate::io::csv;
use crate::{hvg, louvain, neighbors, outlier, pca, preprocess, qc, score, umap};
use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;
use ndarray::s;
use ndarray::Array2;
use sc_types::Column;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

/// All tunable parameters of the analysis. The defaults reproduce the
/// hard-coded settings of the original study pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// obs column partitioning cells for outlier detection.
    pub group_key: String,
    /// Standard-deviation multiplier for the outlier filter.
    pub outlier_fd: f64,
    /// Keep genes detected in at least this many cells.
    pub min_cells_per_gene: usize,
    /// Per-cell total after library-size normalization.
    pub target_sum: f64,
    /// Number of highly variable genes to keep.
    pub n_top_genes: usize,
    /// Reference pool size for gene-set scoring.
    pub score_reference_size: usize,
    /// Numeric obs columns regressed out of the expression matrix.
    pub regress_keys: Vec<String>,
    /// Upper clip after unit-variance scaling.
    pub scale_max_value: f64,
    /// Number of principal components.
    pub n_comps: usize,
    /// obs column holding the batch (donor) label.
    pub batch_key: String,
    /// Principal components used for the neighbor graph.
    pub n_neighbor_pcs: usize,
    /// Neighbors drawn from each batch per cell.
    pub neighbors_within_batch: usize,
    /// Clustering resolution sweep: start (inclusive).
    pub sweep_start: f64,
    /// Clustering resolution sweep: stop (exclusive).
    pub sweep_stop: f64,
    /// Clustering resolution sweep: step.
    pub sweep_step: f64,
    /// Resolution of the designated final clustering.
    pub final_resolution: f64,
    /// UMAP minimum distance.
    pub umap_min_dist: f64,
    /// UMAP spread.
    pub umap_spread: f64,
    /// UMAP optimization epochs.
    pub umap_epochs: usize,
    /// Seed for every stochastic stage.
    pub seed: u64,
    /// Gzip the output matrix.
    pub gzip_output: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            group_key: "celltype".into(),
            outlier_fd: 3.0,
            min_cells_per_gene: 10,
            target_sum: 1e4,
            n_top_genes: 2000,
            score_reference_size: 50,
            regress_keys: vec![
                "total_counts".into(),
                "S_score".into(),
                "G2M_score".into(),
            ],
            scale_max_value: 10.0,
            n_comps: 50,
            batch_key: "individual".into(),
            n_neighbor_pcs: 17,
            neighbors_within_batch: 3,
            sweep_start: 1.0,
            sweep_stop: 1.9,
            sweep_step: 0.05,
            final_resolution: 1.75,
            umap_min_dist: 0.3,
            umap_spread: 2.0,
            umap_epochs: 200,
            seed: 0,
            gzip_output: false,
        }
    }
}

impl AnalysisConfig {
    /// Resolutions of the clustering sweep, rounded to 3 decimals.
    pub fn sweep_resolutions(&self) -> Vec<f64> {
        let mut resolutions = Vec::new();
        let mut r = self.sweep_start;
        while r < self.sweep_stop - 1e-9 {
            resolutions.push((r * 1000.0).round() / 1000.0);
            r += self.sweep_step;
        }
        resolutions
    }
}

/// Render a parameter the way it appears in output names: up to three
/// decimals with trailing zeros trimmed, always keeping one decimal
/// (1.75, 0.3, 2.0, 1.05).
pub fn fmt_param(value: f64) -> String {
    let mut s = format!("{value:.3}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.push('0');
    }
    s
}

fn dense_to_sparse(x: &Array2<f64>) -> CsMat<f64> {
    let mut tri = TriMat::new((x.nrows(), x.ncols()));
    for ((i, j), &v) in x.indexed_iter() {
        if v != 0.0 {
            tri.add_triplet(i, j, v);
        }
    }
    tri.to_csr()
}

fn batch_ids(labels: &[String]) -> Vec<usize> {
    let unique: BTreeMap<&str, usize> = labels
        .iter()
        .map(String::as_str)
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(i, label)| (label, i))
        .collect();
    labels.iter().map(|label| unique[label.as_str()]).collect()
}

/// Run the full analysis on the bundle at `matrix_dir`, writing results
/// into a directory under `out_root` named after the final resolution,
/// minimum distance and spread. Returns the output directory.
pub fn run(
    matrix_dir: &Path,
    cycle_genes_path: &Path,
    out_root: &Path,
    config: &AnalysisConfig,
) -> Result<PathBuf> {
    let out_dir = out_root.join(format!(
        "{}_{}_{}",
        fmt_param(config.final_resolution),
        fmt_param(config.umap_min_dist),
        fmt_param(config.umap_spread)
    ));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    serde_json::to_writer_pretty(
        File::create(out_dir.join("parameters.json"))?,
        config,
    )
    .context("writing parameters.json")?;

    let matrix = sc_io::read_bundle(matrix_dir)?;
    matrix
        .obs()
        .str_column(&config.group_key)
        .with_context(|| format!("input is missing the '{}' annotation", config.group_key))?;
    matrix
        .obs()
        .str_column(&config.batch_key)
        .with_context(|| format!("input is missing the '{}' annotation", config.batch_key))?;

    // group-wise outlier removal; the filter returns duplicates, so
    // membership is tested against a set
    let flagged = outlier::flag_group_outliers(&matrix, &config.group_key, config.outlier_fd)?;
    let flagged: HashSet<&str> = flagged.iter().map(String::as_str).collect();
    let keep: Vec<usize> = (0..matrix.n_cells())
        .filter(|&i| !flagged.contains(matrix.barcodes()[i].as_str()))
        .collect();
    info!(
        "outlier filter ({}, fd={}): {} -> {} cells",
        config.group_key,
        config.outlier_fd,
        matrix.n_cells(),
        keep.len()
    );
    let mut matrix = matrix.select_cells(&keep);

    qc::flag_genes_by_prefix(&mut matrix, "mt", &[qc::MITO_PREFIX])?;
    qc::flag_genes_by_prefix(&mut matrix, "rbs", &qc::RIBO_PREFIXES)?;
    qc::calculate_qc_metrics(&mut matrix, &["mt", "rbs"])?;

    let cycle_genes = sc_io::read_cell_cycle_genes(cycle_genes_path)?;
    score::score_cell_cycle(
        &mut matrix,
        &cycle_genes.s_genes,
        &cycle_genes.g2m_genes,
        config.score_reference_size,
    )?;

    csv::save_qc_table(
        &out_dir.join("qc_metrics.csv"),
        &matrix,
        &[
            "n_genes_by_counts",
            "total_counts",
            "pct_counts_mt",
            "pct_counts_rbs",
            "S_score",
            "G2M_score",
            "phase",
        ],
    )?;

    // drop ribosomal and mitochondrial genes, then weakly detected genes
    let rbs = matrix.var().bool_column("rbs")?.to_vec();
    let keep_genes: Vec<bool> = rbs.iter().map(|&f| !f).collect();
    let matrix = preprocess::retain_genes(&matrix, &keep_genes)?;
    let mt = matrix.var().bool_column("mt")?.to_vec();
    let keep_genes: Vec<bool> = mt.iter().map(|&f| !f).collect();
    let matrix = preprocess::retain_genes(&matrix, &keep_genes)?;
    let mut matrix = preprocess::filter_genes_min_cells(&matrix, config.min_cells_per_gene);
    qc::calculate_qc_metrics(&mut matrix, &[])?;
    info!(
        "{} cells x {} genes after gene filtering",
        matrix.n_cells(),
        matrix.n_genes()
    );

    preprocess::normalize_total(&mut matrix, config.target_sum)?;
    preprocess::log1p(&mut matrix);

    let hvg_result = hvg::select_highly_variable(&matrix, config.n_top_genes)?;
    hvg::annotate_highly_variable(&mut matrix, &hvg_result)?;
    let dispersion_ids = matrix.gene_ids().to_vec();
    let dispersion = hvg_result.normalized_dispersion.clone();
    let mut matrix = matrix.select_genes(&hvg_result.selected);

    let covariates = preprocess::obs_covariates(&matrix, &config.regress_keys)?;
    let mut dense = matrix.to_dense();
    preprocess::regress_out(&mut dense, &covariates)?;
    preprocess::scale_clip(&mut dense, config.scale_max_value);

    let pca_result = pca::run_pca(&dense.view(), config.n_comps, config.seed)?;
    csv::save_pca(
        &out_dir,
        &pca_result,
        matrix.barcodes(),
        matrix.gene_ids(),
        &dispersion_ids,
        &dispersion,
    )?;

    let batches = batch_ids(matrix.obs().str_column(&config.batch_key)?);
    let n_pcs = config.n_neighbor_pcs.min(pca_result.transformed.ncols());
    let graph = neighbors::batch_balanced_knn(
        pca_result.transformed.slice(s![.., ..n_pcs]),
        &batches,
        config.neighbors_within_batch,
    )?;
    let conn = neighbors::connectivities(&graph);

    let resolutions = config.sweep_resolutions();
    info!(
        "clustering sweep at resolutions [{}]",
        resolutions.iter().map(|&r| fmt_param(r)).join(", ")
    );
    for &resolution in &resolutions {
        let labels: Vec<i64> = louvain::cluster_graph(&conn, resolution, config.seed)
            .into_iter()
            .map(|l| l + 1)
            .collect();
        let key = format!("graphclust_{}", fmt_param(resolution));
        csv::save_clustering(&out_dir, &key, matrix.barcodes(), &labels)?;
        matrix.obs_mut().insert(&key, Column::I64(labels))?;
    }

    let labels: Vec<i64> = louvain::cluster_graph(&conn, config.final_resolution, config.seed)
        .into_iter()
        .map(|l| l + 1)
        .collect();
    info!(
        "final clustering (resolution {}): {} clusters",
        fmt_param(config.final_resolution),
        labels.iter().max().copied().unwrap_or(0)
    );
    csv::save_clustering(&out_dir, "graphclust", matrix.barcodes(), &labels)?;
    matrix.obs_mut().insert("graphclust", Column::I64(labels))?;

    let umap_params = umap::UmapParams {
        min_dist: config.umap_min_dist,
        spread: config.umap_spread,
        n_epochs: config.umap_epochs,
        seed: config.seed,
        ..Default::default()
    };
    let embedding = umap::embed(&conn, pca_result.transformed.view(), &umap_params)?;
    csv::save_embedding(&out_dir, "umap", "UMAP", matrix.barcodes(), &embedding)?;
    matrix
        .obs_mut()
        .insert("umap_1", Column::F64(embedding.column(0).to_vec()))?;
    matrix
        .obs_mut()
        .insert("umap_2", Column::F64(embedding.column(1).to_vec()))?;

    matrix.replace_x(dense_to_sparse(&dense))?;
    sc_io::write_bundle(&out_dir, &matrix, config.gzip_output)?;
    info!("results written to {}", out_dir.display());
    Ok(out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sweep_matches_the_original_grid() {
        let config = AnalysisConfig::default();
        let resolutions = config.sweep_resolutions();
        assert_eq!(resolutions.len(), 18);
        assert_eq!(resolutions[0], 1.0);
        assert_eq!(resolutions[1], 1.05);
        assert_eq!(resolutions[17], 1.85);
    }

    #[test]
    fn parameter_formatting() {
        assert_eq!(fmt_param(1.75), "1.75");
        assert_eq!(fmt_param(0.3), "0.3");
        assert_eq!(fmt_param(2.0), "2.0");
        assert_eq!(fmt_param(1.0), "1.0");
        assert_eq!(fmt_param(1.05), "1.05");
        assert_eq!(fmt_param(1.849999999), "1.85");
    }

    #[test]
    fn batch_ids_are_stable_by_name() {
        let ids = batch_ids(&[
            "donor2".to_string(),
            "donor1".to_string(),
            "donor2".to_string(),
        ]);
        assert_eq!(ids, vec![1, 0, 1]);
    }

    #[test]
    fn config_json_round_trip() {
        let config = AnalysisConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let parsed: AnalysisConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.n_top_genes, config.n_top_genes);
        assert_eq!(parsed.final_resolution, config.final_resolution);

        // partial configs fall back to defaults
        let parsed: AnalysisConfig = serde_json::from_str("{\"n_comps\": 7}").unwrap();
        assert_eq!(parsed.n_comps, 7);
        assert_eq!(parsed.batch_key, "individual");
    }
}
