//! CSV output for QC tables, PCA results, cluster assignments and
//! embeddings.

use crate::pca::PcaResult;
use anyhow::{Context, Result};
use ndarray::Array2;
use sc_types::{AnnMatrix, Column};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

fn write_field(file: &mut impl Write, column: &Column, i: usize) -> Result<()> {
    match column {
        Column::Str(v) => write!(file, ",{}", v[i])?,
        Column::F64(v) => write!(file, ",{}", v[i])?,
        Column::I64(v) => write!(file, ",{}", v[i])?,
        Column::Bool(v) => write!(file, ",{}", v[i])?,
    }
    Ok(())
}

/// One row per cell: barcode plus the requested obs columns.
pub fn save_qc_table(path: &Path, matrix: &AnnMatrix, columns: &[&str]) -> Result<()> {
    let resolved: Vec<(&str, &Column)> = columns
        .iter()
        .map(|&name| {
            matrix
                .obs()
                .get(name)
                .map(|c| (name, c))
                .with_context(|| format!("obs column '{name}' not computed"))
        })
        .collect::<Result<_>>()?;
    let mut file = BufWriter::new(File::create(path)?);
    write!(file, "Barcode")?;
    for (name, _) in &resolved {
        write!(file, ",{name}")?;
    }
    writeln!(file)?;
    for (i, barcode) in matrix.barcodes().iter().enumerate() {
        write!(file, "{barcode}")?;
        for (_, column) in &resolved {
            write_field(&mut file, column, i)?;
        }
        writeln!(file)?;
    }
    Ok(())
}

/// PCA artifacts under `dir/pca/`: the cell projection, per-component
/// variance ratios, component loadings, and the per-gene normalized
/// dispersion used for feature selection.
pub fn save_pca(
    dir: &Path,
    result: &PcaResult,
    barcodes: &[String],
    hvg_ids: &[String],
    dispersion_ids: &[String],
    dispersion: &[f64],
) -> Result<()> {
    let component_dir = dir.join("pca");
    create_dir_all(&component_dir)?;
    let (num_bcs, num_pcs) = result.transformed.dim();
    {
        let path = component_dir.join("projection.csv");
        let mut file = BufWriter::new(File::create(path)?);
        write!(file, "Barcode")?;
        for i in 1..=num_pcs {
            write!(file, ",PC-{i}")?;
        }
        writeln!(file)?;
        for i in 0..num_bcs {
            write!(file, "{}", barcodes[i])?;
            for j in 0..num_pcs {
                write!(file, ",{}", result.transformed[[i, j]])?;
            }
            writeln!(file)?;
        }
    }
    {
        let path = component_dir.join("variance.csv");
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "PC,Proportion.Variance.Explained")?;
        for i in 0..num_pcs {
            writeln!(file, "{},{}", i + 1, result.variance_ratio[i])?;
        }
    }
    {
        let path = component_dir.join("components.csv");
        let mut file = BufWriter::new(File::create(path)?);
        write!(file, "PC")?;
        for id in hvg_ids {
            write!(file, ",{id}")?;
        }
        writeln!(file)?;
        for i in 0..num_pcs {
            write!(file, "{}", i + 1)?;
            for j in 0..hvg_ids.len() {
                write!(file, ",{}", result.components[[j, i]])?;
            }
            writeln!(file)?;
        }
    }
    {
        let path = component_dir.join("dispersion.csv");
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "Feature,Normalized.Dispersion")?;
        for (id, d) in dispersion_ids.iter().zip(dispersion) {
            writeln!(file, "{id},{d}")?;
        }
    }
    Ok(())
}

/// Cluster assignments under `dir/<key>/clusters.csv`, labels 1-based.
pub fn save_clustering(dir: &Path, key: &str, barcodes: &[String], labels: &[i64]) -> Result<()> {
    let clustering_dir = dir.join(key);
    create_dir_all(&clustering_dir)?;
    let path = clustering_dir.join("clusters.csv");
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "Barcode,Cluster")?;
    for (barcode, label) in barcodes.iter().zip(labels) {
        writeln!(file, "{barcode},{label}")?;
    }
    Ok(())
}

/// 2D (or higher) embedding under `dir/<name>/projection.csv`.
pub fn save_embedding(
    dir: &Path,
    name: &str,
    axis_prefix: &str,
    barcodes: &[String],
    embedding: &Array2<f64>,
) -> Result<()> {
    let embedding_dir = dir.join(name);
    create_dir_all(&embedding_dir)?;
    let path = embedding_dir.join("projection.csv");
    let mut file = BufWriter::new(File::create(path)?);
    let (num_bcs, num_components) = embedding.dim();
    write!(file, "Barcode")?;
    for i in 1..=num_components {
        write!(file, ",{axis_prefix}-{i}")?;
    }
    writeln!(file)?;
    for i in 0..num_bcs {
        write!(file, "{}", barcodes[i])?;
        for j in 0..num_components {
            write!(file, ",{}", embedding[[i, j]])?;
        }
        writeln!(file)?;
    }
    Ok(())
}
