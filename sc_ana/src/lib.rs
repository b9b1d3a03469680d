//! Exploratory single-cell RNA-seq analysis: per-group outlier filtering,
//! QC metrics, cell-cycle scoring, normalization, highly-variable-gene
//! selection, PCA, batch-balanced neighbor graphs, graph clustering and
//! 2D embedding, plus the driver that runs the whole sequence.

pub mod hvg;
pub mod io;
pub mod louvain;
pub mod neighbors;
pub mod outlier;
pub mod pca;
pub mod pipeline;
pub mod preprocess;
pub mod qc;
pub mod score;
pub mod umap;
