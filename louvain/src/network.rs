use crate::Clustering;
use fxhash::FxHashMap;

/// Weighted, undirected network. Each node has a weight (its degree or strength for a fresh
/// network, the summed weight of its members for an aggregated one), and each edge is stored in
/// the adjacency lists of both endpoints.
#[derive(Debug, Clone, Default)]
pub struct Network {
    node_weights: Vec<f64>,
    adjacency: Vec<Vec<(usize, f64)>>,
    /// Weight of edges collapsed inside a node by aggregation
    self_loop_weight: f64,
}

impl Network {
    /// Create a new empty network
    pub fn new() -> Network {
        Network::default()
    }

    /// Build a network over `n_nodes` nodes from weighted edges. Edges are undirected:
    /// `(i, j)` and `(j, i)` are the same edge, and a repeated edge keeps its largest weight.
    /// Self edges and non-positive weights are ignored. Node weights are set to node strength.
    pub fn from_edges<I>(n_nodes: usize, edges: I) -> Network
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut unique: FxHashMap<(usize, usize), f64> = FxHashMap::default();
        for (i, j, w) in edges {
            assert!(i < n_nodes && j < n_nodes, "edge ({i}, {j}) outside of {n_nodes} nodes");
            if i == j || w <= 0.0 {
                continue;
            }
            let key = if i < j { (i, j) } else { (j, i) };
            let entry = unique.entry(key).or_insert(w);
            *entry = entry.max(w);
        }

        let mut edges = unique.into_iter().collect::<Vec<_>>();
        // hash order is arbitrary; sort so that neighbor order, and so clustering, is reproducible
        edges.sort_by(|a, b| a.0.cmp(&b.0));

        let mut adjacency = vec![Vec::new(); n_nodes];
        let mut node_weights = vec![0.0; n_nodes];
        for ((i, j), w) in edges {
            adjacency[i].push((j, w));
            adjacency[j].push((i, w));
            node_weights[i] += w;
            node_weights[j] += w;
        }

        Network {
            node_weights,
            adjacency,
            self_loop_weight: 0.0,
        }
    }

    /// Build an unweighted network, as from a k-nearest-neighbor list.
    pub fn from_adjacency<I: IntoIterator<Item = (usize, usize)>>(n_nodes: usize, adjacency: I) -> Network {
        Network::from_edges(n_nodes, adjacency.into_iter().map(|(i, j)| (i, j, 1.0)))
    }

    /// Number of nodes in the graph
    pub fn nodes(&self) -> usize {
        self.node_weights.len()
    }

    /// Number of distinct edges
    pub fn edges(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    /// Get the node weight of `node`.
    pub fn weight(&self, node: usize) -> f64 {
        self.node_weights[node]
    }

    /// Pairs of (adjacent node id, edge weight) for all neighbors of `node`.
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.adjacency[node].iter().copied()
    }

    /// Get the total weight of all nodes in the graph
    pub fn get_total_node_weight(&self) -> f64 {
        self.node_weights.iter().sum()
    }

    /// Total weight of all edges, including those collapsed into aggregated nodes.
    /// Each edge is counted once.
    pub fn get_total_edge_weight(&self) -> f64 {
        let doubled = self
            .adjacency
            .iter()
            .map(|adj| adj.iter().map(|&(_, w)| w).sum::<f64>())
            .sum::<f64>();
        doubled / 2.0 + self.self_loop_weight
    }

    /// Creates a reduced (or aggregate) network based on a clustering.
    /// Node `c` of the reduced network is cluster `c`; its weight is the summed weight of its
    /// members. The edge between two reduced nodes carries the summed weight of the edges
    /// between their clusters, and edges inside a cluster are kept as self-loop weight.
    pub fn create_reduced_network(&self, clustering: &Clustering) -> Network {
        let k = clustering.num_clusters();
        let mut node_weights = vec![0.0; k];
        for i in 0..self.nodes() {
            node_weights[clustering.get(i)] += self.node_weights[i];
        }

        let mut self_loop_weight = self.self_loop_weight;
        let mut between: FxHashMap<(usize, usize), f64> = FxHashMap::default();
        for i in 0..self.nodes() {
            let ci = clustering.get(i);
            for &(j, w) in &self.adjacency[i] {
                if j < i {
                    continue;
                }
                let cj = clustering.get(j);
                if ci == cj {
                    self_loop_weight += w;
                } else {
                    let key = if ci < cj { (ci, cj) } else { (cj, ci) };
                    *between.entry(key).or_insert(0.0) += w;
                }
            }
        }

        let mut edges = between.into_iter().collect::<Vec<_>>();
        edges.sort_by(|a, b| a.0.cmp(&b.0));
        let mut adjacency = vec![Vec::new(); k];
        for ((a, b), w) in edges {
            adjacency[a].push((b, w));
            adjacency[b].push((a, w));
        }

        Network {
            node_weights,
            adjacency,
            self_loop_weight,
        }
    }
}
