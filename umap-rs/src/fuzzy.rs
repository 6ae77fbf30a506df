//! The fuzzy neighbor graph: each point's kNN distances are turned into membership strengths
//! of a local fuzzy set, and the local sets are combined by fuzzy union into one symmetric
//! weighted graph.

use ndarray::{ArrayView1, ArrayView2};
use sprs::{CsMat, TriMat};

const BANDWIDTH: f64 = 1.0;
const NITER: usize = 64;
const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;

/// Symmetric fuzzy graph of `n` points from their kNN lists. `set_op_mix_ratio` interpolates
/// between fuzzy union (1.0) and fuzzy intersection (0.0) of the directed memberships.
pub fn fuzzy_simplicial_set(
    knn_indices: ArrayView2<usize>,
    knn_distances: ArrayView2<f64>,
    local_connectivity: f64,
    set_op_mix_ratio: f64,
) -> CsMat<f64> {
    let n_points = knn_indices.nrows();
    let (sigmas, rhos) = smooth_knn_distances(knn_distances, local_connectivity);

    let mut directed = TriMat::new((n_points, n_points));
    for i in 0..n_points {
        for (&j, &d) in knn_indices.row(i).iter().zip(knn_distances.row(i)) {
            if j == usize::MAX || j == i {
                continue;
            }
            let strength = if d - rhos[i] <= 0.0 || sigmas[i] == 0.0 {
                1.0
            } else {
                (-(d - rhos[i]) / sigmas[i]).exp()
            };
            directed.add_triplet(i, j, strength);
        }
    }
    let directed: CsMat<f64> = directed.to_csr();
    let transpose: CsMat<f64> = directed.transpose_view().to_csr();

    // A + A' - A∘A' is the probabilistic union, A∘A' the intersection
    let product = sprs::binop::mul_mat_same_storage(&directed, &transpose);
    let sum = &directed + &transpose;
    let union = &(&sum - &product) * set_op_mix_ratio;
    let intersection = &product * (1.0 - set_op_mix_ratio);
    let graph = &union + &intersection;

    log::debug!("fuzzy graph over {} points has {} non-zeros", n_points, graph.nnz());
    graph
}

/// Per point: `rho`, the distance to the `local_connectivity`-th nearest non-identical neighbor,
/// and `sigma`, the scale at which the memberships of the neighbors sum to `log2(k)`.
/// Returns `(sigmas, rhos)`.
fn smooth_knn_distances(knn_distances: ArrayView2<f64>, local_connectivity: f64) -> (Vec<f64>, Vec<f64>) {
    let (n_points, k) = knn_distances.dim();
    let global_mean = finite_mean(knn_distances.iter());

    let mut sigmas = vec![0.0; n_points];
    let mut rhos = vec![0.0; n_points];
    for i in 0..n_points {
        let row = knn_distances.row(i);
        let non_zero = row
            .iter()
            .copied()
            .filter(|&d| d > 0.0 && d.is_finite())
            .collect::<Vec<_>>();

        let index = local_connectivity.floor() as usize;
        let interpolation = local_connectivity - local_connectivity.floor();
        if non_zero.len() >= index && !non_zero.is_empty() {
            if index > 0 {
                rhos[i] = non_zero[index - 1];
                if interpolation > SMOOTH_K_TOLERANCE && index < non_zero.len() {
                    rhos[i] += interpolation * (non_zero[index] - non_zero[index - 1]);
                }
            } else {
                rhos[i] = interpolation * non_zero[0];
            }
        } else if !non_zero.is_empty() {
            rhos[i] = non_zero.iter().copied().fold(f64::MIN, f64::max);
        }

        let mut sigma = smooth_knn_dist(row, rhos[i], k);
        let floor = if rhos[i] > 0.0 {
            MIN_K_DIST_SCALE * finite_mean(row.iter())
        } else {
            MIN_K_DIST_SCALE * global_mean
        };
        if sigma < floor {
            sigma = floor;
        }
        sigmas[i] = sigma;
    }
    (sigmas, rhos)
}

fn finite_mean<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    let (sum, n) = values
        .filter(|d| d.is_finite())
        .fold((0.0, 0usize), |(s, n), &d| (s + d, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Binary search for the sigma of one point.
fn smooth_knn_dist(distances: ArrayView1<f64>, rho: f64, k: usize) -> f64 {
    let target = (k as f64).log2() * BANDWIDTH;
    let mut lo = 0.0;
    let mut mid = 1.0;
    let mut hi = f64::MAX;

    for _ in 0..NITER {
        let psum = distances
            .iter()
            .filter(|d| d.is_finite())
            .map(|&d| (-((d - rho).max(0.0) / mid)).exp())
            .sum::<f64>();

        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = lo + (hi - lo) / 2.0;
        } else {
            lo = mid;
            if hi == f64::MAX {
                mid *= 2.0;
            } else {
                mid = lo + (hi - lo) / 2.0;
            }
        }
    }
    mid
}
