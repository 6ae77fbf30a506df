#![allow(non_snake_case)]

use super::{normalize_signs, DataMat, Pca, PcaResult};
use anyhow::{format_err, Error};
use nalgebra::DMatrix;
use ndarray::linalg::Dot;
use ndarray::{s, Array1, Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

/// Settings for Randomized PCA
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandSvd {
    /// Multiple of the requested k to use in randomized projections
    pub l_multiplier: f64,

    /// Extra projection dimensions beyond k, when larger than the multiple
    pub oversampling: usize,

    /// Number of power iteration to perform
    pub n_iter: usize,

    /// Seed of the random projection
    pub seed: u64,
}

impl RandSvd {
    /// Create a new RandSvd with default settings.
    pub fn new() -> RandSvd {
        RandSvd {
            l_multiplier: 2.0,
            oversampling: 10,
            n_iter: 4,
            seed: 0,
        }
    }

    /// Same settings, different seed
    pub fn with_seed(self, seed: u64) -> RandSvd {
        RandSvd { seed, ..self }
    }

    /// Number of projection dimensions for a rank `k` decomposition of an `m` x `n` matrix
    pub fn projection_dim(&self, k: usize, m: usize, n: usize) -> usize {
        let l = std::cmp::max(k + self.oversampling, ((k as f64) * self.l_multiplier).ceil() as usize);
        l.min(m.min(n))
    }
}

impl Default for RandSvd {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pca<T> for RandSvd
where
    T: DataMat + for<'a> Dot<ArrayView2<'a, f64>, Output = Array2<f64>>,
    for<'a> ArrayView2<'a, f64>: Dot<T, Output = Array2<f64>>,
{
    fn run_pca(&self, array: &T, k: usize) -> Result<PcaResult, Error> {
        let [m, n] = array.shape();
        let l = self.projection_dim(k, m, n);
        let (mut u, s, vt) = svd_rand(array, k, l, self.n_iter, self.seed)?;
        let mut v = vt.reversed_axes();
        normalize_signs(&mut u, &mut v);
        Ok((u, s, v))
    }
}

/// Perform an SVD of matrix `A`, making a rank `k` approximation. Use `l` projection dimensions
/// and `n_iter` power iterations. Returns `(U, S, V')`.
#[inline(never)]
pub fn svd_rand<T>(
    A: &T,
    k: usize, // svd rank
    l: usize,
    n_iter: usize, // power iterations
    seed: u64,
) -> Result<PcaResult, Error>
where
    T: DataMat + for<'a> Dot<ArrayView2<'a, f64>, Output = Array2<f64>>,
    for<'a> ArrayView2<'a, f64>: Dot<T, Output = Array2<f64>>,
{
    let [m, n] = A.shape();

    if m < 2 || n < 2 {
        return Err(format_err!("The input matrix must be at least 2x2."));
    }

    if k == 0 || k > l || l > std::cmp::min(m, n) {
        return Err(format_err!("invalid k = {} with l = {} for a {} x {} matrix", k, l, m, n));
    }

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    if m >= n {
        let omega = Array2::random_using((n, l), unif, &mut rng);
        let mut Q = qr_q(A.dot(&omega.view()));

        for _ in 0..n_iter {
            Q = qr_q(Q.t().dot(A).reversed_axes());
            Q = qr_q(A.dot(&Q.view()));
        }

        let B = Q.t().dot(A);
        let (Ub, sigma, Vb) = dense_svd(&B)?;
        let U = Q.dot(&Ub.slice(s![.., ..k]));
        let Vt = Vb.slice(s![.., ..k]).t().to_owned();
        Ok((U, sigma.slice(s![..k]).to_owned(), Vt))
    } else {
        // n > m
        let omega = Array2::random_using((m, l), unif, &mut rng);
        let mut Q = qr_q(omega.t().dot(A).reversed_axes());

        for _ in 0..n_iter {
            Q = qr_q(A.dot(&Q.view()));
            Q = qr_q(Q.t().dot(A).reversed_axes());
        }

        let B = A.dot(&Q.view());
        let (Ub, sigma, Vb) = dense_svd(&B)?;
        let U = Ub.slice(s![.., ..k]).to_owned();
        let Vt = Q.dot(&Vb.slice(s![.., ..k])).reversed_axes();
        Ok((U, sigma.slice(s![..k]).to_owned(), Vt))
    }
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)])
}

fn to_array(d: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn(d.shape(), |(i, j)| d[(i, j)])
}

/// Orthonormal basis of the columns of a tall matrix: the thin `Q` of its QR decomposition
fn qr_q(a: Array2<f64>) -> Array2<f64> {
    to_array(&to_dmatrix(&a).qr().q())
}

/// Thin SVD `A = U diag(S) V'` of a dense matrix, with singular values in descending order.
/// Returns `(U, S, V)`.
pub fn dense_svd(a: &Array2<f64>) -> Result<PcaResult, Error> {
    let svd = to_dmatrix(a).svd(true, true);
    let u = svd.u.ok_or_else(|| format_err!("SVD did not produce U"))?;
    let v_t = svd.v_t.ok_or_else(|| format_err!("SVD did not produce V'"))?;
    let s = svd.singular_values.iter().copied().collect::<Array1<f64>>();
    Ok((to_array(&u), s, to_array(&v_t).reversed_axes()))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_rand::rand_distr::Normal;

    /// Rank 3 matrix with a little noise
    fn low_rank(m: usize, n: usize) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(42);
        let dist = Normal::new(0.0, 1.0).unwrap();
        let left = Array2::random_using((m, 3), dist, &mut rng);
        let right = Array2::random_using((3, n), dist, &mut rng);
        let noise = Array2::random_using((m, n), dist, &mut rng) * 1e-3;
        let scale = ndarray::arr1(&[10.0, 5.0, 2.0]);
        (&left * &scale).dot(&right) + noise
    }

    fn check(a: &Array2<f64>) {
        let (u, s, v) = RandSvd::new().run_pca(a, 3).unwrap();
        let (_, exact, _) = dense_svd(a).unwrap();

        assert_eq!(u.dim(), (a.nrows(), 3));
        assert_eq!(v.dim(), (a.ncols(), 3));
        assert_abs_diff_eq!(s, exact.slice(s![..3]).to_owned(), epsilon = 1e-8 * exact[0]);
        assert_abs_diff_eq!(u.t().dot(&u), Array2::<f64>::eye(3), epsilon = 1e-8);
        assert_abs_diff_eq!(v.t().dot(&v), Array2::<f64>::eye(3), epsilon = 1e-8);

        let recon = (&u * &s).dot(&v.t());
        let resid = (&recon - a).mapv(|x| x * x).sum().sqrt();
        assert!(resid < 0.1, "residual {resid}");
    }

    #[test]
    fn test_tall() {
        check(&low_rank(60, 25));
    }

    #[test]
    fn test_wide() {
        check(&low_rank(20, 45));
    }

    #[test]
    fn test_seed_determinism_and_signs() {
        let a = low_rank(40, 30);
        let first = RandSvd::new().with_seed(7).run_pca(&a, 3).unwrap();
        let again = RandSvd::new().with_seed(7).run_pca(&a, 3).unwrap();
        assert_eq!(first, again);

        // another seed finds the same subspace, and sign normalization picks the same orientation
        let other = RandSvd::new().with_seed(8).run_pca(&a, 3).unwrap();
        assert_abs_diff_eq!(first.2, other.2, epsilon = 1e-6);
    }

    #[test]
    fn test_dense_svd() {
        let a = ndarray::array![[3.0, 0.0], [0.0, -5.0], [0.0, 0.0]];
        let (u, s, v) = dense_svd(&a).unwrap();
        assert_abs_diff_eq!(s, ndarray::arr1(&[5.0, 3.0]), epsilon = 1e-12);
        assert_abs_diff_eq!((&u * &s).dot(&v.t()), a, epsilon = 1e-12);
        assert_abs_diff_eq!(qr_q(a.clone()).t().dot(&qr_q(a)), Array2::<f64>::eye(2), epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_k() {
        let a = low_rank(10, 8);
        assert!(svd_rand(&a, 0, 4, 2, 0).is_err());
        assert!(svd_rand(&a, 3, 9, 2, 0).is_err());
        assert!(svd_rand(&Array2::<f64>::zeros((1, 5)), 1, 1, 2, 0).is_err());
    }
}
