//! The annotated-matrix directory bundle.
//!
//! A bundle is a directory holding `matrix.mtx` (or `matrix.mtx.gz`),
//! `genes.tsv` and `cells.tsv`. The TSV tables carry the identifier index
//! in their first column plus any number of annotation columns; column
//! types are inferred on read (integer, then float, then boolean, falling
//! back to string).

use crate::mtx;
use anyhow::{bail, Context, Result};
use log::info;
use sc_types::{AnnMatrix, AnnTable, Column, TableKind};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const MATRIX_NAMES: [&str; 2] = ["matrix.mtx", "matrix.mtx.gz"];

fn infer_column(values: Vec<String>) -> Column {
    if !values.is_empty() && values.iter().all(|v| v.parse::<i64>().is_ok()) {
        return Column::I64(values.iter().map(|v| v.parse().unwrap()).collect());
    }
    if !values.is_empty() && values.iter().all(|v| v.parse::<f64>().is_ok()) {
        return Column::F64(values.iter().map(|v| v.parse().unwrap()).collect());
    }
    if !values.is_empty() && values.iter().all(|v| v == "true" || v == "false") {
        return Column::Bool(values.iter().map(|v| v == "true").collect());
    }
    Column::Str(values)
}

fn read_table(path: &Path, kind: TableKind) -> Result<AnnTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    if headers.is_empty() {
        bail!("{}: empty header", path.display());
    }

    let mut index = Vec::new();
    let mut raw_columns: Vec<Vec<String>> = vec![Vec::new(); headers.len() - 1];
    for record in reader.records() {
        let record = record?;
        if record.len() != headers.len() {
            bail!(
                "{}: row with {} fields, header has {}",
                path.display(),
                record.len(),
                headers.len()
            );
        }
        index.push(record[0].to_string());
        for (i, field) in record.iter().skip(1).enumerate() {
            raw_columns[i].push(field.to_string());
        }
    }

    let mut table = AnnTable::new(kind, index);
    for (header, values) in headers.into_iter().skip(1).zip(raw_columns) {
        table.insert(&header, infer_column(values))?;
    }
    Ok(table)
}

fn write_table(path: &Path, table: &AnnTable, index_header: &str) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write!(writer, "{index_header}")?;
    for name in table.column_names() {
        write!(writer, "\t{name}")?;
    }
    writeln!(writer)?;
    let columns: Vec<&Column> = table
        .column_names()
        .map(|name| table.get(name).unwrap())
        .collect();
    for (i, id) in table.index().iter().enumerate() {
        write!(writer, "{id}")?;
        for column in &columns {
            match column {
                Column::Str(v) => write!(writer, "\t{}", v[i])?,
                Column::F64(v) => write!(writer, "\t{}", v[i])?,
                Column::I64(v) => write!(writer, "\t{}", v[i])?,
                Column::Bool(v) => write!(writer, "\t{}", v[i])?,
            }
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read an annotated-matrix bundle from `dir`.
pub fn read_bundle(dir: &Path) -> Result<AnnMatrix> {
    let matrix_path = MATRIX_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
        .with_context(|| format!("no matrix.mtx[.gz] in {}", dir.display()))?;

    let data = mtx::read_mtx(&matrix_path)?;
    let var = read_table(&dir.join("genes.tsv"), TableKind::Var)?;
    let obs = read_table(&dir.join("cells.tsv"), TableKind::Obs)?;

    if data.n_rows != var.len() {
        bail!(
            "matrix has {} genes but genes.tsv lists {}",
            data.n_rows,
            var.len()
        );
    }
    if data.n_cols != obs.len() {
        bail!(
            "matrix has {} cells but cells.tsv lists {}",
            data.n_cols,
            obs.len()
        );
    }

    // stored genes-by-cells; the in-memory matrix is cells-by-genes
    let mut tri = sprs::TriMat::new((obs.len(), var.len()));
    for (gene, cell, value) in data.triplets {
        tri.add_triplet(cell, gene, value);
    }
    let matrix = AnnMatrix::new(tri.to_csr(), obs, var)?;
    info!(
        "loaded {} cells x {} genes ({} entries) from {}",
        matrix.n_cells(),
        matrix.n_genes(),
        matrix.nnz(),
        dir.display()
    );
    Ok(matrix)
}

/// Write an annotated-matrix bundle into `dir`, creating it if needed.
pub fn write_bundle(dir: &Path, matrix: &AnnMatrix, gzip_matrix: bool) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let matrix_name = if gzip_matrix {
        "matrix.mtx.gz"
    } else {
        "matrix.mtx"
    };
    let triplets = matrix
        .x()
        .outer_iterator()
        .enumerate()
        .flat_map(|(cell, row)| {
            row.iter()
                .map(move |(gene, &v)| (gene, cell, v))
                .collect::<Vec<_>>()
        });
    mtx::write_mtx(
        &dir.join(matrix_name),
        matrix.n_genes(),
        matrix.n_cells(),
        triplets,
        matrix.nnz(),
    )?;
    write_table(&dir.join("genes.tsv"), matrix.var(), "gene_id")?;
    write_table(&dir.join("cells.tsv"), matrix.obs(), "barcode")?;
    Ok(())
}
