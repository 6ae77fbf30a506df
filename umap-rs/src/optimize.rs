//! Stochastic gradient descent of the embedding. Position updates are applied immediately and
//! affect later updates within the same epoch, so the loop is sequential; with a fixed seed
//! the result is fully reproducible.

use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use rand_pcg::Pcg64Mcg;
use sprs::CsMat;

const GRAD_CLIP: f64 = 4.0;

/// Positive edges of the fuzzy graph, shuffled, with how often each is sampled.
pub struct Edges {
    /// first endpoint of each edge
    pub head: Vec<usize>,
    /// second endpoint of each edge
    pub tail: Vec<usize>,
    /// number of epochs between two samples of each edge
    pub epochs_per_sample: Vec<f64>,
}

impl Edges {
    /// Collect the graph edges, dropping those too weak to be sampled once in `n_epochs`.
    pub fn from_graph(graph: &CsMat<f64>, n_epochs: usize, rng: &mut impl Rng) -> Edges {
        let n_epochs = n_epochs as f64;
        let graph_max = graph.iter().fold(0.0_f64, |acc, (&v, _)| acc.max(v));

        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut weights = Vec::new();
        for (&w, (row, col)) in graph.iter() {
            if w > 0.0 && w >= graph_max / n_epochs {
                weights.push(w);
                tail.push(row);
                head.push(col);
            }
        }

        // Fisher-Yates over the three parallel vectors
        let mut n = head.len();
        while n > 1 {
            n -= 1;
            let k = rng.gen_range(0..n + 1);
            head.swap(k, n);
            tail.swap(k, n);
            weights.swap(k, n);
        }

        let max = weights.iter().copied().fold(0.0_f64, f64::max);
        let epochs_per_sample = weights
            .iter()
            .map(|&w| {
                let n = (w / max) * n_epochs;
                if n > 0.0 {
                    n_epochs / n
                } else {
                    -1.0
                }
            })
            .collect();

        Edges {
            head,
            tail,
            epochs_per_sample,
        }
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.head.len()
    }

    /// True if there are no edges
    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }
}

/// Starting layout: the leading columns of the input, each scaled to span `[-10, 10]`.
/// Missing columns (input narrower than the embedding) are filled with uniform noise.
pub fn initial_layout(x: ArrayView2<f64>, dim: usize, rng: &mut impl Rng) -> Array2<f64> {
    let n = x.nrows();
    let mut embedding = Array2::zeros((n, dim));
    for d in 0..dim {
        let mut col = embedding.column_mut(d);
        if d < x.ncols() {
            let src = x.column(d);
            let max_abs = src.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
            let scale = if max_abs > 0.0 { 10.0 / max_abs } else { 0.0 };
            col.assign(&src.mapv(|v| v * scale));
        } else {
            col.mapv_inplace(|_| rng.gen_range(-10.0..10.0));
        }
    }
    embedding
}

/// Optimization state, advanced one epoch at a time.
pub struct State {
    /// curve parameter a
    pub a: f64,
    /// curve parameter b
    pub b: f64,
    /// weight of the negative samples
    pub gamma: f64,
    /// starting learning rate
    pub initial_alpha: f64,
    /// current learning rate, decaying linearly to zero
    pub alpha: f64,
    /// total number of epochs
    pub n_epochs: usize,
    /// epochs completed
    pub current_epoch: usize,
    /// current embedding, one row per point
    pub embedding: Array2<f64>,

    edges: Edges,
    epochs_per_negative_sample: Vec<f64>,
    epoch_of_next_sample: Vec<f64>,
    epoch_of_next_negative_sample: Vec<f64>,
    rng: Pcg64Mcg,
}

impl State {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        embedding: Array2<f64>,
        edges: Edges,
        n_epochs: usize,
        (a, b): (f64, f64),
        learning_rate: f64,
        repulsion_strength: f64,
        negative_sample_rate: usize,
        rng: Pcg64Mcg,
    ) -> State {
        let epochs_per_negative_sample = edges
            .epochs_per_sample
            .iter()
            .map(|&e| e / negative_sample_rate as f64)
            .collect::<Vec<_>>();

        State {
            a,
            b,
            gamma: repulsion_strength,
            initial_alpha: learning_rate,
            alpha: learning_rate,
            n_epochs,
            current_epoch: 0,
            embedding,
            epoch_of_next_sample: edges.epochs_per_sample.clone(),
            epoch_of_next_negative_sample: epochs_per_negative_sample.clone(),
            epochs_per_negative_sample,
            edges,
            rng,
        }
    }

    /// Run all remaining epochs.
    pub fn optimize(&mut self) {
        while self.step() {}
    }

    /// Run one epoch. Returns false once all epochs are done.
    pub fn step(&mut self) -> bool {
        if self.current_epoch >= self.n_epochs {
            return false;
        }
        for i in 0..self.edges.len() {
            self.sample_edge(i);
        }
        self.current_epoch += 1;
        self.alpha = self.initial_alpha * (1.0 - self.current_epoch as f64 / self.n_epochs as f64);
        true
    }

    /// Consume the state, returning the embedding
    pub fn into_embedding(self) -> Array2<f64> {
        self.embedding
    }

    #[inline]
    fn dist_sq(&self, j: usize, k: usize) -> f64 {
        let x = self.embedding.index_axis(Axis(0), j);
        let y = self.embedding.index_axis(Axis(0), k);
        x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
    }

    fn sample_edge(&mut self, i: usize) {
        let epoch = self.current_epoch as f64;
        if self.edges.epochs_per_sample[i] <= 0.0 || self.epoch_of_next_sample[i] > epoch {
            return;
        }

        let j = self.edges.head[i];
        let k = self.edges.tail[i];
        let (a, b, gamma, alpha) = (self.a, self.b, self.gamma, self.alpha);
        let dim = self.embedding.ncols();

        // attraction along the edge
        let dist_sq = self.dist_sq(j, k);
        let grad_coeff = if dist_sq > 0.0 {
            (-2.0 * a * b * dist_sq.powf(b - 1.0)) / (1.0 + a * dist_sq.powf(b))
        } else {
            0.0
        };
        for d in 0..dim {
            let diff = self.embedding[[j, d]] - self.embedding[[k, d]];
            let grad_d = (grad_coeff * diff).clamp(-GRAD_CLIP, GRAD_CLIP);
            self.embedding[[j, d]] += grad_d * alpha;
            self.embedding[[k, d]] -= grad_d * alpha;
        }

        self.epoch_of_next_sample[i] += self.edges.epochs_per_sample[i];

        // repulsion from randomly drawn points
        let n_points = self.embedding.nrows();
        let n_neg_samples =
            ((epoch - self.epoch_of_next_negative_sample[i]) / self.epochs_per_negative_sample[i]).floor();
        for _ in 0..n_neg_samples.max(0.0) as usize {
            let k = self.rng.gen_range(0..n_points);
            if j == k {
                continue;
            }

            let dist_sq = self.dist_sq(j, k);
            let grad_coeff = if dist_sq > 0.0 {
                (2.0 * gamma * b) / ((1e-3 + dist_sq) * (1.0 + a * dist_sq.powf(b)))
            } else {
                0.0
            };
            for d in 0..dim {
                let grad_d = if grad_coeff > 0.0 {
                    let diff = self.embedding[[j, d]] - self.embedding[[k, d]];
                    (grad_coeff * diff).clamp(-GRAD_CLIP, GRAD_CLIP)
                } else {
                    GRAD_CLIP
                };
                self.embedding[[j, d]] += grad_d * alpha;
            }
        }

        self.epoch_of_next_negative_sample[i] += n_neg_samples * self.epochs_per_negative_sample[i];
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_edges() {
        let graph = sprs::TriMat::from_triplets((3, 3), vec![0, 1, 1, 2], vec![1, 0, 2, 1], vec![1.0, 1.0, 0.5, 0.5])
            .to_csr::<usize>();
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let edges = Edges::from_graph(&graph, 10, &mut rng);

        assert_eq!(edges.len(), 4);
        let mut per_sample = edges.epochs_per_sample.clone();
        per_sample.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(per_sample, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn test_initial_layout() {
        let x = array![[1.0, -4.0], [-2.0, 2.0], [0.5, 0.0]];
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let init = initial_layout(x.view(), 3, &mut rng);

        assert_eq!(init.column(0).to_vec(), vec![5.0, -10.0, 2.5]);
        assert_eq!(init.column(1).to_vec(), vec![-10.0, 5.0, 0.0]);
        assert!(init.column(2).iter().all(|v| v.abs() <= 10.0));
    }
}
