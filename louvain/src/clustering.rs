/// Assignment of each node of a network to a single integer cluster label.
/// Labels are kept in `0..num_clusters()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clustering {
    labels: Vec<usize>,
    num_clusters: usize,
}

impl Clustering {
    /// Each node in its own cluster
    pub fn init_different_clusters(num_nodes: usize) -> Clustering {
        Clustering {
            labels: (0..num_nodes).collect(),
            num_clusters: num_nodes,
        }
    }

    /// All nodes in a single cluster
    pub fn init_same_cluster(num_nodes: usize) -> Clustering {
        Clustering {
            labels: vec![0; num_nodes],
            num_clusters: usize::from(num_nodes > 0),
        }
    }

    /// Initialize the clustering with a known set of labels. Unused labels are squeezed out.
    pub fn new_from_labels(labels: &[usize]) -> Clustering {
        let num_clusters = labels.iter().max().map_or(0, |&m| m + 1);
        let mut c = Clustering {
            labels: labels.to_vec(),
            num_clusters,
        };
        c.remove_empty_clusters();
        c
    }

    /// Label of node `i`
    pub fn get(&self, i: usize) -> usize {
        self.labels[i]
    }

    /// Set the label of node `i`
    pub fn set(&mut self, i: usize, cluster: usize) {
        self.labels[i] = cluster;
        self.num_clusters = self.num_clusters.max(cluster + 1);
    }

    /// Total number of nodes
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of cluster labels in use (after `remove_empty_clusters`)
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// Labels of all nodes
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Consume the clustering, returning the node labels
    pub fn into_labels(self) -> Vec<usize> {
        self.labels
    }

    /// Members of every cluster
    pub fn nodes_per_cluster(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.num_clusters];
        for (node, &label) in self.labels.iter().enumerate() {
            out[label].push(node);
        }
        out
    }

    /// Renumber labels to `0..k` in order of first appearance among the old label values,
    /// dropping labels no node uses.
    pub fn remove_empty_clusters(&mut self) {
        let mut used = vec![false; self.num_clusters];
        for &l in &self.labels {
            used[l] = true;
        }

        let mut remap = vec![usize::MAX; self.num_clusters];
        let mut next = 0;
        for (old, is_used) in used.into_iter().enumerate() {
            if is_used {
                remap[old] = next;
                next += 1;
            }
        }

        for l in self.labels.iter_mut() {
            *l = remap[*l];
        }
        self.num_clusters = next;
    }

    /// Relabel nodes through a clustering of the current clusters, as produced on an aggregated
    /// network whose node `i` is cluster `i` of `self`.
    pub fn merge_clusters(&mut self, cluster_clustering: &Clustering) {
        for l in self.labels.iter_mut() {
            *l = cluster_clustering.get(*l);
        }
        self.num_clusters = cluster_clustering.num_clusters();
        self.remove_empty_clusters();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_labels() {
        let c = Clustering::new_from_labels(&[1, 2, 3, 4, 5]);
        assert_eq!(c.num_clusters(), 5);
        assert_eq!(c.labels(), &[0, 1, 2, 3, 4]);
        assert_eq!(Clustering::new_from_labels(&[]).num_clusters(), 0);
    }

    #[test]
    fn test_operations() {
        let mut c = Clustering::init_different_clusters(10);
        assert_eq!(c.num_clusters(), 10);

        c.set(8, 0);
        c.set(7, 0);
        c.remove_empty_clusters();

        assert_eq!(c.num_clusters(), 8);
        assert_eq!(c.get(9), 7);
        assert_eq!(c.nodes_per_cluster()[0], vec![0, 7, 8]);
    }

    #[test]
    fn test_merge() {
        let mut c = Clustering::new_from_labels(&[0, 0, 1, 2, 2, 3]);
        let upper = Clustering::new_from_labels(&[0, 1, 0, 1]);
        c.merge_clusters(&upper);
        assert_eq!(c.labels(), &[0, 0, 1, 0, 0, 1]);
        assert_eq!(c.num_clusters(), 2);
        assert_eq!(Clustering::init_same_cluster(3).num_clusters(), 1);
    }
}
