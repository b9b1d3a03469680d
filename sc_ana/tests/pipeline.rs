//! End-to-end driver test on a small synthetic dataset with two cell
//! types, two donors, mitochondrial/ribosomal genes and cell-cycle
//! markers.

use sc_ana::pipeline::{self, AnalysisConfig};
use sc_types::{AnnMatrix, Column};
use std::io::Write;
use std::path::Path;

const N_CELLS: usize = 40;

fn gene_ids() -> Vec<String> {
    let mut ids = Vec::new();
    for g in 0..8 {
        ids.push(format!("ALPHA{g}"));
    }
    for g in 0..8 {
        ids.push(format!("BETA{g}"));
    }
    for g in 0..8 {
        ids.push(format!("HOUSE{g}"));
    }
    ids.push("CCS1".into());
    ids.push("CCG1".into());
    ids.push("MT-ND1".into());
    ids.push("RPS4".into());
    ids.push("RPL7".into());
    ids
}

fn synthetic_matrix() -> AnnMatrix {
    let gene_ids = gene_ids();
    let n_genes = gene_ids.len();
    let mut triplets = Vec::new();
    for cell in 0..N_CELLS {
        let is_alpha = cell < N_CELLS / 2;
        for (gene, id) in gene_ids.iter().enumerate() {
            let jitter = ((cell * 13 + gene * 7) % 5) as f64;
            let count = if id.starts_with("ALPHA") {
                if is_alpha { 20.0 + jitter } else { 1.0 }
            } else if id.starts_with("BETA") {
                if is_alpha { 1.0 } else { 20.0 + jitter }
            } else if id.starts_with("HOUSE") {
                5.0 + jitter
            } else if id == "CCS1" {
                1.0 + ((cell * 3) % 6) as f64
            } else if id == "CCG1" {
                1.0 + ((cell * 5) % 4) as f64
            } else if id == "MT-ND1" {
                2.0
            } else {
                // ribosomal genes
                3.0 + (cell % 3) as f64
            };
            if count > 0.0 {
                triplets.push((cell, gene, count));
            }
        }
    }
    let barcodes = (0..N_CELLS).map(|i| format!("BC{i:03}")).collect();
    let mut matrix =
        AnnMatrix::from_triplets(N_CELLS, n_genes, &triplets, barcodes, gene_ids).unwrap();
    let celltypes: Vec<String> = (0..N_CELLS)
        .map(|i| if i < N_CELLS / 2 { "alpha".into() } else { "beta".into() })
        .collect();
    let donors: Vec<String> = (0..N_CELLS)
        .map(|i| if i % 2 == 0 { "donor1".into() } else { "donor2".into() })
        .collect();
    matrix
        .obs_mut()
        .insert("celltype", Column::Str(celltypes))
        .unwrap();
    matrix
        .obs_mut()
        .insert("individual", Column::Str(donors))
        .unwrap();
    matrix
}

fn write_cycle_genes(path: &Path) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "CCS1").unwrap();
    for i in 1..43 {
        writeln!(file, "SFILL{i}").unwrap();
    }
    writeln!(file, "CCG1").unwrap();
    for i in 0..5 {
        writeln!(file, "GFILL{i}").unwrap();
    }
}

fn test_config() -> AnalysisConfig {
    AnalysisConfig {
        min_cells_per_gene: 3,
        n_top_genes: 12,
        score_reference_size: 4,
        n_comps: 5,
        n_neighbor_pcs: 5,
        neighbors_within_batch: 3,
        sweep_start: 1.0,
        sweep_stop: 1.1,
        sweep_step: 0.05,
        final_resolution: 1.0,
        umap_epochs: 50,
        ..AnalysisConfig::default()
    }
}

#[test]
fn full_pipeline_produces_all_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("input");
    sc_io::write_bundle(&input_dir, &synthetic_matrix(), false).unwrap();
    let genes_path = dir.path().join("cycle_genes.txt");
    write_cycle_genes(&genes_path);
    let out_root = dir.path().join("write");

    let config = test_config();
    let out_dir = pipeline::run(&input_dir, &genes_path, &out_root, &config).unwrap();

    assert_eq!(out_dir, out_root.join("1.0_0.3_2.0"));
    for artifact in [
        "parameters.json",
        "qc_metrics.csv",
        "pca/projection.csv",
        "pca/variance.csv",
        "pca/dispersion.csv",
        "graphclust_1.0/clusters.csv",
        "graphclust_1.05/clusters.csv",
        "graphclust/clusters.csv",
        "umap/projection.csv",
        "matrix.mtx",
        "genes.tsv",
        "cells.tsv",
    ] {
        assert!(out_dir.join(artifact).exists(), "missing {artifact}");
    }

    let result = sc_io::read_bundle(&out_dir).unwrap();
    // tame data: the fd=3 outlier filter removes nothing
    assert_eq!(result.n_cells(), N_CELLS);
    // the matrix was reduced to the highly variable genes
    assert_eq!(result.n_genes(), config.n_top_genes);
    // no mitochondrial or ribosomal genes survive
    assert!(result
        .gene_ids()
        .iter()
        .all(|id| !id.starts_with("MT-") && !id.starts_with("RPS") && !id.starts_with("RPL")));

    let clusters = result.obs().i64_column("graphclust").unwrap();
    assert_eq!(clusters.len(), N_CELLS);
    // labels are 1-based
    assert!(clusters.iter().all(|&c| c >= 1));

    assert!(result.obs().contains("graphclust_1.0"));
    assert!(result.obs().contains("graphclust_1.05"));
    assert!(result.obs().contains("phase"));
    assert!(result.obs().contains("umap_1"));
    let umap_2 = result.obs().f64_column("umap_2").unwrap();
    assert!(umap_2.iter().all(|v| v.is_finite()));
}

#[test]
fn pipeline_fails_without_the_grouping_annotation() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("input");
    sc_io::write_bundle(&input_dir, &synthetic_matrix(), false).unwrap();
    let genes_path = dir.path().join("cycle_genes.txt");
    write_cycle_genes(&genes_path);

    let mut config = test_config();
    config.group_key = "annotation_that_does_not_exist".into();
    let err = pipeline::run(&input_dir, &genes_path, &dir.path().join("write"), &config)
        .unwrap_err();
    assert!(err.to_string().contains("annotation_that_does_not_exist"));
}

#[test]
fn pipeline_fails_on_missing_cycle_gene_file() {
    let dir = tempfile::tempdir().unwrap();
    let input_dir = dir.path().join("input");
    sc_io::write_bundle(&input_dir, &synthetic_matrix(), false).unwrap();

    let err = pipeline::run(
        &input_dir,
        &dir.path().join("no_such_file.txt"),
        &dir.path().join("write"),
        &test_config(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("no_such_file.txt"));
}
