use crate::curve_fit::find_ab_params;
use crate::optimize::{initial_layout, Edges, State};
use crate::{fuzzy, knn};
use anyhow::{bail, Error};
use log::info;
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// UMAP parameters. The defaults of `Umap::new` follow the reference implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct Umap {
    /// Learning rate at the first epoch
    pub learning_rate: f64,
    /// Number of nearest neighbors assumed to be locally connected
    pub local_connectivity: f64,
    /// Minimum distance between embedded points
    pub min_dist: f64,
    /// Negative samples per positive sample
    pub negative_sample_rate: usize,
    /// Weight of the negative samples
    pub repulsion_strength: f64,
    /// 1.0 for the fuzzy union of the directed neighbor graphs, 0.0 for their intersection
    pub set_op_mix_ratio: f64,
    /// Scale of the embedded points
    pub spread: f64,
    /// Size of the local neighborhood
    pub n_neighbors: usize,
    embedded_dim: usize,
    custom_number_of_epochs: Option<usize>,
}

impl Umap {
    /// Create a new UMAP with the given output dimensions, curve shape and neighborhood size.
    /// The number of epochs is chosen from the input size unless given.
    pub fn new(
        dimensions: usize,
        min_dist: f64,
        spread: f64,
        n_neighbors: usize,
        custom_number_of_epochs: Option<usize>,
    ) -> Umap {
        Umap {
            learning_rate: 1.0,
            local_connectivity: 1.0,
            min_dist,
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
            set_op_mix_ratio: 1.0,
            spread,
            n_neighbors,
            embedded_dim: dimensions,
            custom_number_of_epochs,
        }
    }

    /// Output dimensions
    pub fn dimensions(&self) -> usize {
        self.embedded_dim
    }

    /// Gets the number of epochs for optimizing the projection
    pub(crate) fn get_num_epochs(&self, rows: usize) -> usize {
        if let Some(n) = self.custom_number_of_epochs {
            return n;
        }

        if rows <= 10_000 {
            500
        } else {
            200
        }
    }

    /// Build the neighbor graph and starting layout of `x` (one row per point), ready to optimize.
    pub fn initialize_fit(&self, x: ArrayView2<f64>, seed: u64) -> Result<State, Error> {
        if self.embedded_dim == 0 {
            bail!("UMAP needs at least one output dimension");
        }
        if self.custom_number_of_epochs == Some(0) {
            bail!("the number of UMAP epochs, if provided, must be greater than 0");
        }
        if self.n_neighbors < 2 {
            bail!("UMAP needs n_neighbors >= 2, got {}", self.n_neighbors);
        }
        if !(self.min_dist >= 0.0 && self.spread > 0.0 && self.min_dist <= self.spread) {
            bail!(
                "invalid UMAP curve: min_dist = {}, spread = {}",
                self.min_dist,
                self.spread
            );
        }

        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let n_epochs = self.get_num_epochs(x.nrows());

        let (knn_indices, knn_distances) = knn::nearest_neighbors(x, self.n_neighbors)?;
        let graph = fuzzy::fuzzy_simplicial_set(
            knn_indices.view(),
            knn_distances.view(),
            self.local_connectivity,
            self.set_op_mix_ratio,
        );
        let edges = Edges::from_graph(&graph, n_epochs, &mut rng);
        let embedding = initial_layout(x, self.embedded_dim, &mut rng);
        let ab = find_ab_params(self.spread, self.min_dist);

        info!(
            "UMAP of {} points: {} edges, {} epochs, a = {:.4}, b = {:.4}",
            x.nrows(),
            edges.len(),
            n_epochs,
            ab.0,
            ab.1
        );

        Ok(State::new(
            embedding,
            edges,
            n_epochs,
            ab,
            self.learning_rate,
            self.repulsion_strength,
            self.negative_sample_rate,
            rng,
        ))
    }

    /// Embed `x` (one row per point). Equal inputs and seeds give identical embeddings.
    /// Fewer than two points are placed at the origin.
    pub fn fit(&self, x: ArrayView2<f64>, seed: u64) -> Result<Array2<f64>, Error> {
        if x.nrows() < 2 {
            return Ok(Array2::zeros((x.nrows(), self.embedded_dim)));
        }
        let mut state = self.initialize_fit(x, seed)?;
        state.optimize();
        Ok(state.into_embedding())
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use ndarray::{concatenate, Axis};
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;

    fn two_blobs() -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let a = Array2::random_using((40, 5), Normal::new(0.0, 1.0).unwrap(), &mut rng);
        let b = Array2::random_using((40, 5), Normal::new(0.0, 1.0).unwrap(), &mut rng) + 20.0;
        concatenate(Axis(0), &[a.view(), b.view()]).unwrap()
    }

    fn centroid(x: &Array2<f64>, rows: std::ops::Range<usize>) -> Vec<f64> {
        let n = rows.len() as f64;
        (0..x.ncols())
            .map(|d| rows.clone().map(|r| x[[r, d]]).sum::<f64>() / n)
            .collect()
    }

    #[test]
    fn test_separates_blobs() {
        let x = two_blobs();
        let umap = Umap::new(2, 0.1, 1.0, 15, Some(100));
        let emb = umap.fit(x.view(), 0).unwrap();

        assert_eq!(emb.dim(), (80, 2));
        assert!(emb.iter().all(|v| v.is_finite()));

        let ca = centroid(&emb, 0..40);
        let cb = centroid(&emb, 40..80);
        let gap = ((ca[0] - cb[0]).powi(2) + (ca[1] - cb[1]).powi(2)).sqrt();
        let spread_a = (0..40)
            .map(|r| ((emb[[r, 0]] - ca[0]).powi(2) + (emb[[r, 1]] - ca[1]).powi(2)).sqrt())
            .sum::<f64>()
            / 40.0;
        assert!(gap > 2.0 * spread_a, "gap {gap} spread {spread_a}");
    }

    #[test]
    fn test_seed_determinism() {
        let x = two_blobs();
        let umap = Umap::new(2, 0.1, 1.0, 10, Some(50));
        let a = umap.fit(x.view(), 5).unwrap();
        let b = umap.fit(x.view(), 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_params() {
        let x = two_blobs();
        assert!(Umap::new(2, 0.1, 1.0, 15, Some(0)).fit(x.view(), 0).is_err());
        assert!(Umap::new(2, 2.0, 1.0, 15, None).fit(x.view(), 0).is_err());
        assert_eq!(Umap::new(2, 0.1, 1.0, 15, None).fit(x.slice(ndarray::s![..1, ..]), 0).unwrap().dim(), (1, 2));
    }
}
