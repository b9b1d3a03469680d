//! The annotated cell-by-gene expression matrix.

use crate::{AnnTable, Column, ScError, TableKind};
use ndarray::Array2;
use sprs::{CsMat, TriMat};

/// A sparse cell-by-gene expression matrix together with its per-cell
/// (`obs`) and per-gene (`var`) annotation tables.
///
/// Rows are cells, columns are genes, CSR storage. The identifier sets of
/// the matrix and the annotation tables match exactly at all times; every
/// constructor and subsetting operation enforces this.
#[derive(Debug, Clone)]
pub struct AnnMatrix {
    x: CsMat<f64>,
    obs: AnnTable,
    var: AnnTable,
}

impl AnnMatrix {
    /// Build an annotated matrix, checking that the matrix shape matches
    /// the annotation tables.
    pub fn new(x: CsMat<f64>, obs: AnnTable, var: AnnTable) -> Result<Self, ScError> {
        if x.rows() != obs.len() {
            return Err(ScError::DimensionMismatch {
                expected: x.rows(),
                actual: obs.len(),
            });
        }
        if x.cols() != var.len() {
            return Err(ScError::DimensionMismatch {
                expected: x.cols(),
                actual: var.len(),
            });
        }
        Ok(AnnMatrix { x, obs, var })
    }

    /// Build from (cell, gene, value) triplets.
    pub fn from_triplets(
        n_cells: usize,
        n_genes: usize,
        triplets: &[(usize, usize, f64)],
        barcodes: Vec<String>,
        gene_ids: Vec<String>,
    ) -> Result<Self, ScError> {
        let mut tri = TriMat::new((n_cells, n_genes));
        for &(cell, gene, value) in triplets {
            tri.add_triplet(cell, gene, value);
        }
        AnnMatrix::new(
            tri.to_csr(),
            AnnTable::new(TableKind::Obs, barcodes),
            AnnTable::new(TableKind::Var, gene_ids),
        )
    }

    pub fn n_cells(&self) -> usize {
        self.x.rows()
    }

    pub fn n_genes(&self) -> usize {
        self.x.cols()
    }

    pub fn nnz(&self) -> usize {
        self.x.nnz()
    }

    pub fn x(&self) -> &CsMat<f64> {
        &self.x
    }

    pub fn obs(&self) -> &AnnTable {
        &self.obs
    }

    pub fn obs_mut(&mut self) -> &mut AnnTable {
        &mut self.obs
    }

    pub fn var(&self) -> &AnnTable {
        &self.var
    }

    pub fn var_mut(&mut self) -> &mut AnnTable {
        &mut self.var
    }

    /// Cell identifiers.
    pub fn barcodes(&self) -> &[String] {
        self.obs.index()
    }

    /// Gene identifiers.
    pub fn gene_ids(&self) -> &[String] {
        self.var.index()
    }

    /// Value at (cell, gene), 0 for entries not stored.
    pub fn get(&self, cell: usize, gene: usize) -> f64 {
        self.x.get(cell, gene).copied().unwrap_or(0.0)
    }

    /// Total stored value per cell.
    pub fn cell_sums(&self) -> Vec<f64> {
        self.x
            .outer_iterator()
            .map(|row| row.iter().map(|(_, &v)| v).sum())
            .collect()
    }

    /// Number of nonzero genes per cell.
    pub fn cell_nnz(&self) -> Vec<usize> {
        self.x
            .outer_iterator()
            .map(|row| row.iter().filter(|(_, &v)| v != 0.0).count())
            .collect()
    }

    /// Total stored value per gene.
    pub fn gene_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_genes()];
        for row in self.x.outer_iterator() {
            for (gene, &v) in row.iter() {
                sums[gene] += v;
            }
        }
        sums
    }

    /// Number of cells with a nonzero count per gene.
    pub fn gene_nnz(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_genes()];
        for row in self.x.outer_iterator() {
            for (gene, &v) in row.iter() {
                if v != 0.0 {
                    counts[gene] += 1;
                }
            }
        }
        counts
    }

    /// Per-cell sum restricted to the genes where `mask` is true.
    pub fn masked_cell_sums(&self, mask: &[bool]) -> Result<Vec<f64>, ScError> {
        if mask.len() != self.n_genes() {
            return Err(ScError::DimensionMismatch {
                expected: self.n_genes(),
                actual: mask.len(),
            });
        }
        Ok(self
            .x
            .outer_iterator()
            .map(|row| row.iter().filter(|(g, _)| mask[*g]).map(|(_, &v)| v).sum())
            .collect())
    }

    /// Multiply every stored value of each cell row by the matching factor.
    pub fn scale_cells(&mut self, factors: &[f64]) -> Result<(), ScError> {
        if factors.len() != self.n_cells() {
            return Err(ScError::DimensionMismatch {
                expected: self.n_cells(),
                actual: factors.len(),
            });
        }
        let mut tri = TriMat::new((self.n_cells(), self.n_genes()));
        for (cell, row) in self.x.outer_iterator().enumerate() {
            for (gene, &v) in row.iter() {
                tri.add_triplet(cell, gene, v * factors[cell]);
            }
        }
        self.x = tri.to_csr();
        Ok(())
    }

    /// Apply `f` to every stored value. Zeros stay unstored, so `f` should
    /// map 0 to 0 for the transform to be faithful.
    pub fn map_values<F: Fn(f64) -> f64>(&mut self, f: F) {
        self.x = self.x.map(|&v| f(v));
    }

    /// New matrix restricted to the given cells, annotations subset in
    /// lockstep.
    pub fn select_cells(&self, indices: &[usize]) -> AnnMatrix {
        let mut tri = TriMat::new((indices.len(), self.n_genes()));
        for (new_cell, &old_cell) in indices.iter().enumerate() {
            if let Some(row) = self.x.outer_view(old_cell) {
                for (gene, &v) in row.iter() {
                    tri.add_triplet(new_cell, gene, v);
                }
            }
        }
        AnnMatrix {
            x: tri.to_csr(),
            obs: self.obs.select(indices),
            var: self.var.clone(),
        }
    }

    /// New matrix restricted to the given genes, annotations subset in
    /// lockstep.
    pub fn select_genes(&self, indices: &[usize]) -> AnnMatrix {
        let mut gene_map = vec![usize::MAX; self.n_genes()];
        for (new_gene, &old_gene) in indices.iter().enumerate() {
            gene_map[old_gene] = new_gene;
        }
        let mut tri = TriMat::new((self.n_cells(), indices.len()));
        for (cell, row) in self.x.outer_iterator().enumerate() {
            for (gene, &v) in row.iter() {
                if gene_map[gene] != usize::MAX {
                    tri.add_triplet(cell, gene_map[gene], v);
                }
            }
        }
        AnnMatrix {
            x: tri.to_csr(),
            obs: self.obs.clone(),
            var: self.var.select(indices),
        }
    }

    /// Swap in a new value matrix of the same shape, keeping annotations.
    pub fn replace_x(&mut self, x: CsMat<f64>) -> Result<(), ScError> {
        if x.rows() != self.obs.len() {
            return Err(ScError::DimensionMismatch {
                expected: self.obs.len(),
                actual: x.rows(),
            });
        }
        if x.cols() != self.var.len() {
            return Err(ScError::DimensionMismatch {
                expected: self.var.len(),
                actual: x.cols(),
            });
        }
        self.x = x;
        Ok(())
    }

    /// Dense cells-by-genes copy of the matrix.
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.n_cells(), self.n_genes()));
        for (cell, row) in self.x.outer_iterator().enumerate() {
            for (gene, &v) in row.iter() {
                dense[[cell, gene]] = v;
            }
        }
        dense
    }
}
