//! Matrix Market coordinate I/O.
//!
//! On disk the matrix is stored genes-by-cells (features as rows), the
//! common layout for feature-barcode matrices; the reader hands back raw
//! triplets and lets the bundle layer transpose into cells-by-genes.

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug)]
pub(crate) struct MtxData {
    pub n_rows: usize,
    pub n_cols: usize,
    /// (row, col, value), 0-based.
    pub triplets: Vec<(usize, usize, f64)>,
}

fn open_maybe_gz(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

pub(crate) fn read_mtx(path: &Path) -> Result<MtxData> {
    let reader = BufReader::new(open_maybe_gz(path)?);
    let mut lines = reader.lines().enumerate();

    let (_, banner) = lines
        .next()
        .with_context(|| format!("{} is empty", path.display()))?;
    let banner = banner?;
    if !banner.starts_with("%%MatrixMarket matrix coordinate") {
        bail!("{}: not a Matrix Market coordinate file", path.display());
    }
    if !banner.contains("general") {
        bail!("{}: only general matrices are supported", path.display());
    }

    // skip comment lines up to the size line
    let mut size_line = None;
    for (lineno, line) in lines.by_ref() {
        let line = line?;
        if line.starts_with('%') || line.trim().is_empty() {
            continue;
        }
        size_line = Some((lineno, line));
        break;
    }
    let (size_lineno, size_line) =
        size_line.with_context(|| format!("{}: missing size line", path.display()))?;
    let dims: Vec<&str> = size_line.split_whitespace().collect();
    if dims.len() != 3 {
        bail!(
            "{} line {}: expected 'rows cols nnz'",
            path.display(),
            size_lineno + 1
        );
    }
    let n_rows: usize = dims[0].parse()?;
    let n_cols: usize = dims[1].parse()?;
    let nnz: usize = dims[2].parse()?;

    let mut triplets = Vec::with_capacity(nnz);
    for (lineno, line) in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            bail!(
                "{} line {}: expected 'row col value'",
                path.display(),
                lineno + 1
            );
        }
        let row: usize = fields[0]
            .parse()
            .with_context(|| format!("{} line {}: bad row index", path.display(), lineno + 1))?;
        let col: usize = fields[1]
            .parse()
            .with_context(|| format!("{} line {}: bad column index", path.display(), lineno + 1))?;
        let value: f64 = fields[2]
            .parse()
            .with_context(|| format!("{} line {}: bad value", path.display(), lineno + 1))?;
        if row == 0 || row > n_rows || col == 0 || col > n_cols {
            bail!(
                "{} line {}: entry ({row}, {col}) outside {n_rows} x {n_cols}",
                path.display(),
                lineno + 1
            );
        }
        if value < 0.0 {
            bail!(
                "{} line {}: negative value {value}",
                path.display(),
                lineno + 1
            );
        }
        triplets.push((row - 1, col - 1, value));
    }
    if triplets.len() != nnz {
        bail!(
            "{}: size line declares {nnz} entries, found {}",
            path.display(),
            triplets.len()
        );
    }
    Ok(MtxData {
        n_rows,
        n_cols,
        triplets,
    })
}

/// Write a genes-by-cells coordinate file from 0-based triplets.
pub(crate) fn write_mtx(
    path: &Path,
    n_rows: usize,
    n_cols: usize,
    triplets: impl Iterator<Item = (usize, usize, f64)>,
    nnz: usize,
) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer: Box<dyn Write> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(BufWriter::new(GzEncoder::new(file, Compression::default())))
    } else {
        Box::new(BufWriter::new(file))
    };
    writeln!(writer, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(writer, "{n_rows} {n_cols} {nnz}")?;
    for (row, col, value) in triplets {
        writeln!(writer, "{} {} {}", row + 1, col + 1, value)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.mtx");
        let triplets = vec![(0usize, 0usize, 3.0f64), (1, 2, 2.5), (3, 1, 7.0)];
        write_mtx(&path, 4, 3, triplets.iter().copied(), triplets.len()).unwrap();
        let data = read_mtx(&path).unwrap();
        assert_eq!(data.n_rows, 4);
        assert_eq!(data.n_cols, 3);
        assert_eq!(data.triplets, triplets);
    }

    #[test]
    fn round_trip_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.mtx.gz");
        let triplets = vec![(2usize, 4usize, 1.0f64)];
        write_mtx(&path, 5, 5, triplets.iter().copied(), 1).unwrap();
        let data = read_mtx(&path).unwrap();
        assert_eq!(data.triplets, triplets);
    }

    #[test]
    fn rejects_bad_banner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.mtx");
        std::fs::write(&path, "junk\n1 1 0\n").unwrap();
        assert!(read_mtx(&path).is_err());
    }

    #[test]
    fn rejects_out_of_bounds_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.mtx");
        std::fs::write(
            &path,
            "%%MatrixMarket matrix coordinate real general\n2 2 1\n3 1 1.0\n",
        )
        .unwrap();
        let err = read_mtx(&path).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn rejects_nnz_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrix.mtx");
        std::fs::write(
            &path,
            "%%MatrixMarket matrix coordinate real general\n2 2 2\n1 1 1.0\n",
        )
        .unwrap();
        assert!(read_mtx(&path).is_err());
    }
}
