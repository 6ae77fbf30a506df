use ndarray::{Array2, Axis};

/// Key of the log-normalized expression matrix
pub const LOG_NORMALIZED: &str = "logNormalized";
/// Key of the linear embedding
pub const PCA: &str = "PCA";
/// Key of the nonlinear, visualization-only embedding
pub const UMAP: &str = "UMAP";
/// Key of the batch-corrected selected-feature matrix
pub const CORRECTED: &str = "corrected";

/// A representation computed from the counts.
#[derive(Clone, Debug, PartialEq)]
pub enum Derived {
    /// Indexed by (feature, cell) over the full feature axis.
    Features(Array2<f64>),
    /// Indexed by (cell, component). Not aligned to the feature axis.
    Cells(Array2<f64>),
}

impl Derived {
    /// Length of the cell axis
    pub fn n_cells(&self) -> usize {
        match self {
            Derived::Features(a) => a.ncols(),
            Derived::Cells(a) => a.nrows(),
        }
    }

    /// Length of the feature axis, if the representation is feature-aligned
    pub fn n_features(&self) -> Option<usize> {
        match self {
            Derived::Features(a) => Some(a.nrows()),
            Derived::Cells(_) => None,
        }
    }

    /// The underlying array
    pub fn array(&self) -> &Array2<f64> {
        match self {
            Derived::Features(a) | Derived::Cells(a) => a,
        }
    }

    /// Cell-major view: rows are cells.
    pub fn by_cell(&self) -> ndarray::ArrayView2<'_, f64> {
        match self {
            Derived::Features(a) => a.t(),
            Derived::Cells(a) => a.view(),
        }
    }

    /// Subset to `cells`, and to `features` for feature-aligned representations.
    pub fn select(&self, cells: &[usize], features: &[usize]) -> Derived {
        match self {
            Derived::Features(a) => Derived::Features(a.select(Axis(0), features).select(Axis(1), cells)),
            Derived::Cells(a) => Derived::Cells(a.select(Axis(0), cells)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_select() {
        let f = Derived::Features(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(f.n_cells(), 3);
        assert_eq!(f.n_features(), Some(2));
        assert_eq!(f.select(&[2, 0], &[1]), Derived::Features(array![[6.0, 4.0]]));
        assert_eq!(f.by_cell().row(1).to_vec(), vec![2.0, 5.0]);

        let c = Derived::Cells(array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        assert_eq!(c.n_cells(), 3);
        assert_eq!(c.n_features(), None);
        assert_eq!(c.select(&[1], &[0]), Derived::Cells(array![[3.0, 4.0]]));
    }
}
