use crate::{Clustering, Network, ZeroVec};
use rand::{seq::SliceRandom, Rng};
use std::collections::VecDeque;

#[derive(Default)]
pub(crate) struct LocalMoving {
    resolution: f64,
    cluster_weights: Vec<f64>,
    nodes_per_cluster: Vec<usize>,
    unused_clusters: Vec<usize>,
    edge_weight_per_cluster: Vec<f64>,
    neighboring_clusters: Vec<usize>,
    stable: Vec<bool>,
    queue: VecDeque<usize>,
}

impl LocalMoving {
    pub fn new(resolution: f64) -> Self {
        LocalMoving {
            resolution,
            ..LocalMoving::default()
        }
    }

    /// Move single nodes to the neighboring cluster with the largest modularity gain until no
    /// node wants to move. Returns true if any node changed cluster.
    pub fn iterate(&mut self, n: &Network, c: &mut Clustering, rng: &mut impl Rng) -> bool {
        let total_edge_weight = n.get_total_edge_weight();
        if n.nodes() == 0 || total_edge_weight <= 0.0 {
            return false;
        }

        self.cluster_weights.zero_len(n.nodes());
        self.nodes_per_cluster.zero_len(n.nodes());
        for i in 0..n.nodes() {
            self.cluster_weights[c.get(i)] += n.weight(i);
            self.nodes_per_cluster[c.get(i)] += 1;
        }

        self.unused_clusters.clear();
        for i in (0..n.nodes()).rev() {
            if self.nodes_per_cluster[i] == 0 {
                self.unused_clusters.push(i);
            }
        }

        // visit nodes in random order; a node whose neighbor moved away is queued again
        let mut order = (0..n.nodes()).collect::<Vec<_>>();
        order.shuffle(rng);
        self.queue.clear();
        self.queue.extend(order);
        self.stable.clear();
        self.stable.resize(n.nodes(), false);

        self.edge_weight_per_cluster.zero_len(n.nodes());
        self.neighboring_clusters.clear();

        let scale = self.resolution / (2.0 * total_edge_weight);
        let mut update = false;

        while let Some(j) = self.queue.pop_front() {
            let current_cluster = c.get(j);
            let w_j = n.weight(j);

            self.cluster_weights[current_cluster] -= w_j;
            self.nodes_per_cluster[current_cluster] -= 1;
            if self.nodes_per_cluster[current_cluster] == 0 {
                self.unused_clusters.push(current_cluster);
            }

            // an empty cluster is always a candidate, so a node can split off on its own
            self.neighboring_clusters.clear();
            if let Some(&empty) = self.unused_clusters.last() {
                self.neighboring_clusters.push(empty);
            }
            for (target, edge_weight) in n.neighbors(j) {
                let neighbor_cluster = c.get(target);
                if self.edge_weight_per_cluster[neighbor_cluster] == 0.0 {
                    self.neighboring_clusters.push(neighbor_cluster);
                }
                self.edge_weight_per_cluster[neighbor_cluster] += edge_weight;
            }

            // ties keep the node where it is, which guarantees termination
            let mut best_cluster = current_cluster;
            let mut max_increment =
                self.edge_weight_per_cluster[current_cluster] - w_j * self.cluster_weights[current_cluster] * scale;
            for &l in &self.neighboring_clusters {
                let increment = self.edge_weight_per_cluster[l] - w_j * self.cluster_weights[l] * scale;
                if increment > max_increment {
                    best_cluster = l;
                    max_increment = increment;
                }
            }
            for &l in &self.neighboring_clusters {
                self.edge_weight_per_cluster[l] = 0.0;
            }
            self.edge_weight_per_cluster[current_cluster] = 0.0;

            self.cluster_weights[best_cluster] += w_j;
            self.nodes_per_cluster[best_cluster] += 1;
            if self.unused_clusters.last() == Some(&best_cluster) {
                self.unused_clusters.pop();
            }

            self.stable[j] = true;

            if best_cluster != current_cluster {
                c.set(j, best_cluster);
                update = true;

                for (target, _) in n.neighbors(j) {
                    if self.stable[target] && c.get(target) != best_cluster {
                        self.stable[target] = false;
                        self.queue.push_back(target);
                    }
                }
            }
        }

        if update {
            c.remove_empty_clusters();
        }

        update
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    #[test]
    fn test_two_triangles() {
        // two triangles joined by a single bridge edge
        let n = Network::from_adjacency(6, vec![(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)]);
        let mut c = Clustering::init_different_clusters(6);
        let mut rng = Pcg64Mcg::seed_from_u64(0);

        let mut lm = LocalMoving::new(1.0);
        assert!(lm.iterate(&n, &mut c, &mut rng));
        assert_eq!(c.num_clusters(), 2);
        assert_eq!(c.get(0), c.get(1));
        assert_eq!(c.get(1), c.get(2));
        assert_eq!(c.get(3), c.get(5));
        assert_ne!(c.get(0), c.get(3));

        // a converged clustering has nothing left to move
        assert!(!lm.iterate(&n, &mut c, &mut rng));
    }
}
