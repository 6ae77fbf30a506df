//! Louvain community detection over weighted, undirected networks
#![deny(missing_docs)]
#![deny(warnings)]

/// Data structure for storing a clustering of nodes
pub mod clustering;

/// Data structure for storing a weighted, undirected graph (aka network)
pub mod network;

/// Louvain clustering algorithm
pub mod louvain;

/// Clustering objective functions
pub mod objective;

mod local_moving;

#[cfg(test)]
mod test;

pub use clustering::Clustering;
pub use louvain::Louvain;
pub use network::Network;

trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default + Clone> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        self.clear();
        self.resize(len, T::default());
    }
}
