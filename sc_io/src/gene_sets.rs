//! Cell-cycle marker gene lists.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Number of leading lines of the gene-list file holding S-phase markers;
/// everything after is a G2M-phase marker. Positional convention of the
/// published Regev-lab list.
pub const S_PHASE_LEN: usize = 43;

/// S-phase and G2M-phase marker gene identifiers.
#[derive(Debug, Clone)]
pub struct CellCycleGenes {
    pub s_genes: Vec<String>,
    pub g2m_genes: Vec<String>,
}

/// Read a cell-cycle gene list: one identifier per line, the first
/// [`S_PHASE_LEN`] lines S-phase, the remainder G2M. A missing or truncated
/// file is fatal.
pub fn read_cell_cycle_genes(path: &Path) -> Result<CellCycleGenes> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading cell-cycle gene list {}", path.display()))?;
    let genes: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if genes.len() <= S_PHASE_LEN {
        bail!(
            "{}: expected more than {S_PHASE_LEN} gene identifiers, found {}",
            path.display(),
            genes.len()
        );
    }
    let (s_genes, g2m_genes) = genes.split_at(S_PHASE_LEN);
    Ok(CellCycleGenes {
        s_genes: s_genes.to_vec(),
        g2m_genes: g2m_genes.to_vec(),
    })
}
