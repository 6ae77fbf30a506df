use crate::local_moving::LocalMoving;
use crate::{Clustering, Network};
use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Perform the Louvain clustering algorithm
pub struct Louvain {
    rng: ChaCha20Rng,
    local_moving: LocalMoving,
    max_passes: usize,
}

/// Default resolution for Louvain
pub const DEFAULT_RESOLUTION: f64 = 1.0;

/// Default number of times the full multi-level procedure is repeated while it still improves
pub const DEFAULT_MAX_PASSES: usize = 10;

impl Louvain {
    /// Initialize the Louvain algorithm with the given resolution. The seed fixes the node
    /// visiting order, so equal inputs and seeds give equal clusterings.
    pub fn new(resolution: f64, seed: u64) -> Louvain {
        Louvain {
            rng: ChaCha20Rng::seed_from_u64(seed),
            local_moving: LocalMoving::new(resolution),
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    /// Limit the number of repeated multi-level passes.
    pub fn with_max_passes(mut self, max_passes: usize) -> Louvain {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Iterate the Louvain algorithm one step: local moving, then recursion on the network
    /// aggregated by the resulting clusters. Returns true if cluster labels were updated.
    pub fn iterate(&mut self, n: &Network, c: &mut Clustering) -> bool {
        let mut update = self.local_moving.iterate(n, c, &mut self.rng);

        if c.num_clusters() == n.nodes() {
            return update;
        }

        let reduced_n = n.create_reduced_network(c);
        let mut reduced_clusters = Clustering::init_different_clusters(reduced_n.nodes());

        update |= self.iterate(&reduced_n, &mut reduced_clusters);

        c.merge_clusters(&reduced_clusters);

        update
    }

    /// Cluster `n` starting from singletons, repeating multi-level passes until a pass makes no
    /// change. A network without edges yields one cluster per node.
    pub fn run(&mut self, n: &Network) -> Clustering {
        let mut c = Clustering::init_different_clusters(n.nodes());
        for pass in 0..self.max_passes {
            if !self.iterate(n, &mut c) {
                debug!("louvain converged after {} passes with {} clusters", pass + 1, c.num_clusters());
                break;
            }
        }
        c
    }
}
