use crate::{Clustering, Network};

/// Newman-Girvan modularity of a clustering, generalized by a resolution parameter:
/// `Q = sum_c [ W_c / m - resolution * (K_c / 2m)^2 ]`, where `W_c` is the edge weight inside
/// cluster `c`, `K_c` the summed node weight of its members and `m` the total edge weight.
/// Node weights are expected to be node strengths, as `Network::from_edges` sets them.
/// Returns 0 for a network without edges.
pub fn modularity(resolution: f64, network: &Network, clustering: &Clustering) -> f64 {
    let m = network.get_total_edge_weight();
    if m <= 0.0 {
        return 0.0;
    }

    // edges already collapsed into nodes sit inside whichever cluster holds that node
    let mut internal = m - network.get_total_edge_weight_between(clustering);

    let mut cluster_weights = vec![0.0; clustering.num_clusters()];
    for i in 0..network.nodes() {
        cluster_weights[clustering.get(i)] += network.weight(i);
    }

    internal /= m;
    let expected = cluster_weights
        .iter()
        .map(|k| (k / (2.0 * m)).powi(2))
        .sum::<f64>();

    internal - resolution * expected
}

impl Network {
    /// Summed weight of edges whose endpoints lie in different clusters.
    pub fn get_total_edge_weight_between(&self, clustering: &Clustering) -> f64 {
        let mut between = 0.0;
        for i in 0..self.nodes() {
            for (j, w) in self.neighbors(i) {
                if j > i && clustering.get(i) != clustering.get(j) {
                    between += w;
                }
            }
        }
        between
    }
}
