use crate::objective::modularity;
use crate::{Clustering, Louvain, Network};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Generate a planted-partition test network: `num_clusters` groups of `nodes_per_cluster`
/// nodes, where a fraction `mu` of the edges cross between groups.
fn gen_sample_network(
    rng: &mut impl Rng,
    num_clusters: usize,
    nodes_per_cluster: usize,
    mean_degree: f64,
    mu: f64,
) -> (Network, Clustering) {
    assert!(num_clusters > 1);
    assert!(nodes_per_cluster > 1);

    let total_nodes = num_clusters * nodes_per_cluster;
    let total_edges = (total_nodes as f64 * mean_degree / 2.0).ceil() as usize;

    let cluster = (0..total_nodes).map(|i| i / nodes_per_cluster).collect::<Vec<_>>();
    let true_clusters = Clustering::new_from_labels(&cluster);

    let mut edges = Vec::with_capacity(total_edges);
    for _ in 0..total_edges {
        let in_cluster = rng.gen_bool(1.0 - mu);

        let n1 = rng.gen_range(0..total_nodes);
        let c1 = cluster[n1];

        loop {
            let n2 = if in_cluster {
                rng.gen_range(c1 * nodes_per_cluster..(c1 + 1) * nodes_per_cluster)
            } else {
                rng.gen_range(0..total_nodes)
            };
            if n1 != n2 && (cluster[n2] == c1) == in_cluster {
                edges.push((n1, n2));
                break;
            }
        }
    }

    (Network::from_adjacency(total_nodes, edges), true_clusters)
}

/// Fraction of nodes whose found cluster's majority true label matches their own.
fn purity(truth: &Clustering, found: &Clustering) -> f64 {
    let mut counts = vec![vec![0usize; truth.num_clusters()]; found.num_clusters()];
    for i in 0..truth.nodes() {
        counts[found.get(i)][truth.get(i)] += 1;
    }
    let majority = counts
        .iter()
        .map(|row| row.iter().copied().max().unwrap_or(0))
        .sum::<usize>();
    majority as f64 / truth.nodes() as f64
}

#[test]
fn test_planted_partition() {
    let mut rng = Pcg64Mcg::seed_from_u64(42);
    let (network, truth) = gen_sample_network(&mut rng, 4, 50, 12.0, 0.1);

    let found = Louvain::new(1.0, 0).run(&network);

    assert!(purity(&truth, &found) >= 0.9, "purity {}", purity(&truth, &found));
    assert!(found.num_clusters() >= 4 && found.num_clusters() <= 8);
    assert!(modularity(1.0, &network, &found) >= modularity(1.0, &network, &truth) - 0.05);
}

#[test]
fn test_seed_determinism() {
    let mut rng = Pcg64Mcg::seed_from_u64(7);
    let (network, _) = gen_sample_network(&mut rng, 3, 40, 8.0, 0.2);

    let a = Louvain::new(1.0, 11).run(&network);
    let b = Louvain::new(1.0, 11).run(&network);
    assert_eq!(a, b);
}

#[test]
fn test_resolution() {
    let mut rng = Pcg64Mcg::seed_from_u64(3);
    let (network, _) = gen_sample_network(&mut rng, 4, 30, 10.0, 0.1);

    let coarse = Louvain::new(0.05, 0).run(&network);
    let fine = Louvain::new(3.0, 0).run(&network);
    assert!(coarse.num_clusters() < fine.num_clusters());
}

#[test]
fn test_edgeless_network() {
    let network = Network::from_adjacency(5, Vec::new());
    let c = Louvain::new(1.0, 0).run(&network);
    assert_eq!(c.num_clusters(), 5);

    let empty = Louvain::new(1.0, 0).run(&Network::new());
    assert_eq!(empty.nodes(), 0);
}
