//! Graph-based community detection: multi-level Louvain modularity
//! optimization with a resolution parameter.

use log::info;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use sprs::CsMat;
use std::collections::BTreeMap;

const TOLERANCE: f64 = 1e-6;
const MAX_LEVELS: usize = 32;

struct Graph {
    /// adjacency lists, every undirected edge stored in both directions
    adj: Vec<Vec<(usize, f64)>>,
    /// aggregated intra-community weight per node (twice the internal
    /// undirected weight), zero on the original graph
    self_loops: Vec<f64>,
}

impl Graph {
    fn n_nodes(&self) -> usize {
        self.adj.len()
    }

    fn degrees(&self) -> Vec<f64> {
        self.adj
            .iter()
            .zip(&self.self_loops)
            .map(|(edges, &s)| edges.iter().map(|&(_, w)| w).sum::<f64>() + s)
            .collect()
    }

    fn from_connectivities(conn: &CsMat<f64>) -> Graph {
        let n = conn.rows();
        let mut adj = vec![Vec::new(); n];
        for (&w, (i, j)) in conn.iter() {
            if i != j && w > 0.0 {
                adj[i].push((j, w));
            }
        }
        Graph {
            adj,
            self_loops: vec![0.0; n],
        }
    }

    fn modularity(&self, membership: &[usize], resolution: f64) -> f64 {
        let k = self.degrees();
        let m2: f64 = k.iter().sum();
        if m2 == 0.0 {
            return 0.0;
        }
        let n_comms = membership.iter().copied().max().map_or(0, |c| c + 1);
        let mut internal = vec![0.0; n_comms];
        let mut sigma_tot = vec![0.0; n_comms];
        for i in 0..self.n_nodes() {
            let c = membership[i];
            sigma_tot[c] += k[i];
            internal[c] += self.self_loops[i];
            for &(j, w) in &self.adj[i] {
                if membership[j] == c {
                    internal[c] += w;
                }
            }
        }
        (0..n_comms)
            .map(|c| internal[c] / m2 - resolution * (sigma_tot[c] / m2) * (sigma_tot[c] / m2))
            .sum()
    }

    /// Contract communities into supernodes.
    fn aggregate(&self, membership: &[usize], n_comms: usize) -> Graph {
        let mut edges: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut self_loops = vec![0.0; n_comms];
        for i in 0..self.n_nodes() {
            let ci = membership[i];
            self_loops[ci] += self.self_loops[i];
            for &(j, w) in &self.adj[i] {
                let cj = membership[j];
                if ci == cj {
                    self_loops[ci] += w;
                } else {
                    *edges.entry((ci, cj)).or_insert(0.0) += w;
                }
            }
        }
        let mut adj = vec![Vec::new(); n_comms];
        for (&(ci, cj), &w) in &edges {
            adj[ci].push((cj, w));
        }
        Graph { adj, self_loops }
    }
}

fn shuffled_order(n: usize, rng: &mut SmallRng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        order.swap(i, j);
    }
    order
}

/// One Louvain level: repeated local moves until no node improves its
/// community. Returns whether anything moved and the membership found.
fn one_level(graph: &Graph, resolution: f64, rng: &mut SmallRng) -> (bool, Vec<usize>) {
    let n = graph.n_nodes();
    let k = graph.degrees();
    let m2: f64 = k.iter().sum();
    let mut membership: Vec<usize> = (0..n).collect();
    if m2 == 0.0 {
        return (false, membership);
    }
    let mut sigma_tot = k.clone();
    let mut moved_any = false;

    loop {
        let mut moved_in_pass = false;
        for &i in &shuffled_order(n, rng) {
            let c_old = membership[i];
            let mut neighbor_comms: BTreeMap<usize, f64> = BTreeMap::new();
            for &(j, w) in &graph.adj[i] {
                *neighbor_comms.entry(membership[j]).or_insert(0.0) += w;
            }
            sigma_tot[c_old] -= k[i];

            let w_old = neighbor_comms.get(&c_old).copied().unwrap_or(0.0);
            let mut best_comm = c_old;
            let mut best_gain = w_old - resolution * sigma_tot[c_old] * k[i] / m2;
            for (&c, &w_c) in &neighbor_comms {
                if c == c_old {
                    continue;
                }
                let gain = w_c - resolution * sigma_tot[c] * k[i] / m2;
                if gain > best_gain + 1e-12 {
                    best_gain = gain;
                    best_comm = c;
                }
            }

            sigma_tot[best_comm] += k[i];
            if best_comm != c_old {
                membership[i] = best_comm;
                moved_in_pass = true;
                moved_any = true;
            }
        }
        if !moved_in_pass {
            break;
        }
    }
    (moved_any, membership)
}

fn renumber(membership: &mut [usize]) -> usize {
    let mut remap: BTreeMap<usize, usize> = BTreeMap::new();
    for c in membership.iter_mut() {
        let next = remap.len();
        let id = *remap.entry(*c).or_insert(next);
        *c = id;
    }
    remap.len()
}

fn relabel_by_size(labels: &[usize]) -> Vec<i64> {
    let n_comms = labels.iter().copied().max().map_or(0, |c| c + 1);
    let mut sizes = vec![0usize; n_comms];
    for &c in labels {
        sizes[c] += 1;
    }
    let mut order: Vec<usize> = (0..n_comms).collect();
    order.sort_by_key(|&c| (std::cmp::Reverse(sizes[c]), c));
    let mut remap = vec![0i64; n_comms];
    for (rank, &c) in order.iter().enumerate() {
        remap[c] = rank as i64;
    }
    labels.iter().map(|&c| remap[c]).collect()
}

/// Cluster a symmetric connectivity graph, returning 0-based labels
/// ordered by descending community size. Higher `resolution` favors more,
/// smaller communities.
pub fn cluster_graph(conn: &CsMat<f64>, resolution: f64, seed: u64) -> Vec<i64> {
    let n = conn.rows();
    let mut graph = Graph::from_connectivities(conn);
    let mut labels: Vec<usize> = (0..n).collect();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut score = f64::NEG_INFINITY;

    for level in 0..MAX_LEVELS {
        let (moved, mut membership) = one_level(&graph, resolution, &mut rng);
        let n_comms = renumber(&mut membership);
        for label in labels.iter_mut() {
            *label = membership[*label];
        }
        let new_score = graph.modularity(&membership, resolution);
        info!(
            "louvain level {level}: {} communities, score {new_score:.6}",
            n_comms
        );
        if !moved || new_score - score <= TOLERANCE {
            break;
        }
        score = new_score;
        graph = graph.aggregate(&membership, n_comms);
    }

    relabel_by_size(&labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn graph_from_edges(n: usize, edges: &[(usize, usize, f64)]) -> CsMat<f64> {
        let mut tri = TriMat::new((n, n));
        for &(i, j, w) in edges {
            tri.add_triplet(i, j, w);
            tri.add_triplet(j, i, w);
        }
        tri.to_csr()
    }

    fn clique_edges(nodes: &[usize]) -> Vec<(usize, usize, f64)> {
        let mut edges = Vec::new();
        for (a, &i) in nodes.iter().enumerate() {
            for &j in &nodes[a + 1..] {
                edges.push((i, j, 1.0));
            }
        }
        edges
    }

    #[test]
    fn splits_two_cliques() {
        // a 6-clique and a 4-clique joined by one weak edge
        let mut edges = clique_edges(&[0, 1, 2, 3, 4, 5]);
        edges.extend(clique_edges(&[6, 7, 8, 9]));
        edges.push((5, 6, 0.01));
        let conn = graph_from_edges(10, &edges);
        let labels = cluster_graph(&conn, 1.0, 0);

        for i in 1..6 {
            assert_eq!(labels[i], labels[0]);
        }
        for i in 7..10 {
            assert_eq!(labels[i], labels[6]);
        }
        assert_ne!(labels[0], labels[6]);
        // the larger community is relabeled to 0
        assert_eq!(labels[0], 0);
        assert_eq!(labels[6], 1);
    }

    #[test]
    fn low_resolution_merges_everything() {
        let conn = graph_from_edges(6, &clique_edges(&[0, 1, 2, 3, 4, 5]));
        let labels = cluster_graph(&conn, 0.01, 0);
        assert!(labels.iter().all(|&l| l == 0));
    }

    #[test]
    fn high_resolution_shatters_the_graph() {
        let conn = graph_from_edges(6, &clique_edges(&[0, 1, 2, 3, 4, 5]));
        let labels = cluster_graph(&conn, 20.0, 0);
        let mut unique: Vec<i64> = labels.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn deterministic_for_a_seed() {
        let mut edges = clique_edges(&[0, 1, 2, 3]);
        edges.extend(clique_edges(&[4, 5, 6, 7]));
        edges.push((3, 4, 0.05));
        let conn = graph_from_edges(8, &edges);
        assert_eq!(cluster_graph(&conn, 1.2, 9), cluster_graph(&conn, 1.2, 9));
    }

    #[test]
    fn empty_graph_yields_singletons() {
        let conn: CsMat<f64> = TriMat::new((4, 4)).to_csr();
        let labels = cluster_graph(&conn, 1.0, 0);
        let mut unique = labels.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }
}
