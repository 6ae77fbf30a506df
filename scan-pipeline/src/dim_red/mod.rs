//! Linear dimensionality reduction. The methods work on anything that can be multiplied by a
//! dense matrix on the right (`A.dot(b)`) and, through a transposed dense view, on the left
//! (`b.t().dot(A)`), so the PCA code does not depend on how the data matrix is stored.

use anyhow::Error;
use ndarray::{Array1, Array2, ArrayView2};

/// Randomized SVD method
pub mod rand_svd;

/// `(U, S, V)` of a rank-k decomposition `A ~ U diag(S) V'`: `U` is rows x k and `V` is cols x k
pub type PcaResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Trait for getting the dimensions of a matrix
pub trait DataMat {
    /// Get the shape of the matrix
    fn shape(&self) -> [usize; 2];
}

impl DataMat for ArrayView2<'_, f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }
}

impl DataMat for Array2<f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }
}

/// Perform a SVD of a `matrix`, retaining `k` principal components.
/// This trait always performs the pure SVD of the matrix. Special cases of SVD
/// such as PCA can be achieved by the appropriate shifts and scaling of `matrix`
pub trait Pca<T> {
    /// Compute a rank `k` decomposition of `matrix`
    fn run_pca(&self, matrix: &T, k: usize) -> Result<PcaResult, Error>;
}

/// Flip the sign of each component so that its largest-magnitude loading is positive.
/// Singular vectors are only defined up to sign; this makes the choice reproducible.
pub fn normalize_signs(u: &mut Array2<f64>, v: &mut Array2<f64>) {
    for c in 0..v.ncols() {
        let pivot = v
            .column(c)
            .iter()
            .copied()
            .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            v.column_mut(c).mapv_inplace(|x| -x);
            u.column_mut(c).mapv_inplace(|x| -x);
        }
    }
}
