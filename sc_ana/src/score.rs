//! Gene-set scoring and cell-cycle phase assignment.

use log::warn;
use sc_types::{AnnMatrix, Column, ScError};
use std::collections::{HashMap, HashSet};
use strum::Display;

/// Cell-cycle phase assigned from S and G2M scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Phase {
    G1,
    S,
    G2M,
}

/// Score each cell for a gene signature: mean expression over the
/// signature genes minus mean expression over an expression-matched
/// reference pool.
///
/// The reference pool is drawn from a window of `n_reference` genes around
/// each signature gene in the ranking of genes by mean expression,
/// excluding the signature itself.
pub fn score_genes(matrix: &AnnMatrix, signature: &[usize], n_reference: usize) -> Vec<f64> {
    let n_cells = matrix.n_cells();
    let n_genes = matrix.n_genes();
    if signature.is_empty() || n_cells == 0 {
        return vec![0.0; n_cells];
    }

    let gene_sums = matrix.gene_sums();
    let gene_means: Vec<f64> = gene_sums.iter().map(|&s| s / n_cells as f64).collect();
    let mut ranked: Vec<usize> = (0..n_genes).collect();
    ranked.sort_by(|&a, &b| {
        gene_means[a]
            .partial_cmp(&gene_means[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let rank_of: HashMap<usize, usize> =
        ranked.iter().enumerate().map(|(r, &g)| (g, r)).collect();

    let signature_set: HashSet<usize> = signature.iter().copied().collect();
    let mut reference: HashSet<usize> = HashSet::new();
    for &gene in signature {
        let rank = rank_of[&gene];
        let start = rank.saturating_sub(n_reference / 2);
        let end = (rank + n_reference / 2 + 1).min(n_genes);
        for &candidate in &ranked[start..end] {
            if !signature_set.contains(&candidate) {
                reference.insert(candidate);
            }
        }
    }

    let mut sig_mask = vec![false; n_genes];
    for &g in signature {
        sig_mask[g] = true;
    }
    let mut ref_mask = vec![false; n_genes];
    for &g in &reference {
        ref_mask[g] = true;
    }
    // masks span exactly the gene axis, so these cannot fail
    let sig_sums = matrix
        .masked_cell_sums(&sig_mask)
        .unwrap_or_else(|_| vec![0.0; n_cells]);
    let ref_sums = matrix
        .masked_cell_sums(&ref_mask)
        .unwrap_or_else(|_| vec![0.0; n_cells]);

    let n_sig = signature_set.len() as f64;
    let n_ref = reference.len() as f64;
    (0..n_cells)
        .map(|cell| {
            let sig_mean = sig_sums[cell] / n_sig;
            let ref_mean = if n_ref > 0.0 { ref_sums[cell] / n_ref } else { 0.0 };
            sig_mean - ref_mean
        })
        .collect()
}

fn present_indices(matrix: &AnnMatrix, names: &[String], label: &str) -> Result<Vec<usize>, ScError> {
    let positions: HashMap<&str, usize> = matrix
        .gene_ids()
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let found: Vec<usize> = names
        .iter()
        .filter_map(|name| positions.get(name.as_str()).copied())
        .collect();
    let missing = names.len() - found.len();
    if missing > 0 {
        warn!("{missing} of {} {label} genes absent from the matrix", names.len());
    }
    if found.is_empty() {
        return Err(ScError::InvalidInput(format!(
            "none of the {label} genes are present in the matrix"
        )));
    }
    Ok(found)
}

/// Compute `S_score`, `G2M_score` and the derived `phase` per cell,
/// storing all three in obs. Genes absent from the matrix are dropped with
/// a warning; a list with no present genes is an error.
pub fn score_cell_cycle(
    matrix: &mut AnnMatrix,
    s_genes: &[String],
    g2m_genes: &[String],
    n_reference: usize,
) -> Result<(), ScError> {
    let s_idx = present_indices(matrix, s_genes, "S-phase")?;
    let g2m_idx = present_indices(matrix, g2m_genes, "G2M-phase")?;

    let s_scores = score_genes(matrix, &s_idx, n_reference);
    let g2m_scores = score_genes(matrix, &g2m_idx, n_reference);

    let phases: Vec<String> = s_scores
        .iter()
        .zip(&g2m_scores)
        .map(|(&s, &g2m)| {
            let phase = if s <= 0.0 && g2m <= 0.0 {
                Phase::G1
            } else if s > g2m {
                Phase::S
            } else {
                Phase::G2M
            };
            phase.to_string()
        })
        .collect();

    let obs = matrix.obs_mut();
    obs.insert("S_score", Column::F64(s_scores))?;
    obs.insert("G2M_score", Column::F64(g2m_scores))?;
    obs.insert("phase", Column::Str(phases))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(dense: &[&[f64]], gene_ids: &[&str]) -> AnnMatrix {
        let n_cells = dense.len();
        let n_genes = gene_ids.len();
        let mut triplets = Vec::new();
        for (cell, row) in dense.iter().enumerate() {
            for (gene, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    triplets.push((cell, gene, v));
                }
            }
        }
        AnnMatrix::from_triplets(
            n_cells,
            n_genes,
            &triplets,
            (0..n_cells).map(|i| format!("c{i}")).collect(),
            gene_ids.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn signature_cells_score_higher() {
        let m = matrix(
            &[
                &[10.0, 0.0, 1.0, 1.0],
                &[0.0, 10.0, 1.0, 1.0],
                &[0.0, 0.0, 1.0, 1.0],
            ],
            &["SIG", "OTHER", "H1", "H2"],
        );
        let scores = score_genes(&m, &[0], 2);
        assert!(scores[0] > scores[1]);
        assert!(scores[0] > scores[2]);
    }

    #[test]
    fn empty_signature_scores_zero() {
        let m = matrix(&[&[1.0, 2.0]], &["A", "B"]);
        assert_eq!(score_genes(&m, &[], 5), vec![0.0]);
    }

    #[test]
    fn phase_assignment() {
        // cell 0 expresses the S marker, cell 1 the G2M marker, cell 2
        // neither.
        let m = matrix(
            &[
                &[20.0, 0.0, 1.0, 1.0, 1.0],
                &[0.0, 20.0, 1.0, 1.0, 1.0],
                &[0.0, 0.0, 1.0, 1.0, 1.0],
            ],
            &["SMARK", "G2MMARK", "H1", "H2", "H3"],
        );
        let mut m = m;
        score_cell_cycle(
            &mut m,
            &["SMARK".to_string()],
            &["G2MMARK".to_string()],
            2,
        )
        .unwrap();
        let phases = m.obs().str_column("phase").unwrap();
        assert_eq!(phases[0], "S");
        assert_eq!(phases[1], "G2M");
        assert_eq!(phases[2], "G1");
        assert!(m.obs().f64_column("S_score").unwrap()[0] > 0.0);
    }

    #[test]
    fn absent_genes_are_dropped_not_fatal() {
        let mut m = matrix(
            &[&[5.0, 1.0, 1.0], &[0.0, 1.0, 1.0]],
            &["SMARK", "G2MMARK", "H1"],
        );
        score_cell_cycle(
            &mut m,
            &["SMARK".to_string(), "NOT_THERE".to_string()],
            &["G2MMARK".to_string()],
            2,
        )
        .unwrap();
        assert!(m.obs().contains("phase"));
    }

    #[test]
    fn fully_absent_list_is_an_error() {
        let mut m = matrix(&[&[1.0, 1.0]], &["A", "B"]);
        let err = score_cell_cycle(&mut m, &["X".to_string()], &["A".to_string()], 2).unwrap_err();
        assert!(matches!(err, ScError::InvalidInput(_)));
    }
}
