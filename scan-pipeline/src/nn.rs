use ball_tree::{BallTree, Point};
use log::info;
use ndarray::parallel::prelude::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// An indexed row, owned so the tree can hold it
#[derive(PartialEq)]
struct Row(Array1<f64>);

impl Point for Row {
    fn distance(&self, other: &Self) -> f64 {
        let diff = &self.0 - &other.0;
        diff.dot(&diff).sqrt()
    }

    fn move_towards(&self, other: &Self, d: f64) -> Self {
        let total = self.distance(other);
        if total == 0.0 {
            return Row(self.0.clone());
        }
        Row(&self.0 + &((&other.0 - &self.0) * (d / total)))
    }
}

/// Nearest neighbors of a set of query points: row `i` lists the neighbors of query `i`,
/// closest first. Missing neighbors are `usize::MAX` with an infinite distance.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbors {
    /// Neighbor indices into the reference points
    pub indices: Array2<usize>,
    /// Euclidean distances to the neighbors
    pub distances: Array2<f64>,
}

/// Ball tree over the rows of a reference matrix
pub struct NeighborIndex {
    tree: BallTree<Row, usize>,
    n_points: usize,
}

impl NeighborIndex {
    /// Index the rows of `reference`.
    pub fn new(reference: &ArrayView2<f64>) -> NeighborIndex {
        info!("constructing ball tree of {} points", reference.nrows());
        let points = reference.outer_iter().map(|row| Row(row.to_owned())).collect::<Vec<_>>();
        let values = (0..reference.nrows()).collect::<Vec<_>>();
        NeighborIndex {
            tree: BallTree::new(points, values),
            n_points: reference.nrows(),
        }
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.n_points
    }

    /// True if nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.n_points == 0
    }

    /// The `k` nearest indexed points of each row of `queries`. When `exclude_self` is set,
    /// query `i` is taken to be indexed point `i` and is left out of its own list.
    pub fn query(&self, queries: &ArrayView2<f64>, k: usize, exclude_self: bool) -> Neighbors {
        info!("querying {} points for {} neighbors", queries.nrows(), k);
        let n = queries.nrows();
        let mut indices = Array2::from_elem((n, k), usize::MAX);
        let mut distances = Array2::from_elem((n, k), f64::INFINITY);
        let take = if exclude_self { k + 1 } else { k };

        indices
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(distances.axis_iter_mut(Axis(0)).into_par_iter())
            .enumerate()
            .for_each_init(
                || self.tree.query(),
                |query, (cell, (mut idx, mut dist))| {
                    let mut ind = 0;
                    let pt = Row(queries.row(cell).to_owned());
                    for (_, d, &v) in query.nn(&pt).take(take) {
                        if (!exclude_self || v != cell) && ind < k {
                            idx[ind] = v;
                            dist[ind] = d;
                            ind += 1;
                        }
                    }
                },
            );
        Neighbors { indices, distances }
    }
}

/// Compute the `k` nearest neighbors of each row in `v`, using Euclidean distance. Each row
/// represents a n-dimensional vector where n is the number of columns in `v`. A row never
/// lists itself; with fewer than `k` other rows the remaining slots hold `usize::MAX`.
pub fn knn(v: &ArrayView2<f64>, k: usize) -> Array2<usize> {
    NeighborIndex::new(v).query(v, k, true).indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, s};
    use ndarray_rand::RandomExt;
    use ordered_float::NotNan;
    use rand::SeedableRng;
    use rand_distr::Normal;
    use rand_pcg::Pcg64Mcg;

    /// All other rows of `v` ordered by distance from `row`
    fn brute_force(v: &Array2<f64>, row: usize) -> Vec<(NotNan<f64>, usize)> {
        let mut order = (0..v.nrows())
            .filter(|&other| other != row)
            .map(|other| {
                let diff = &v.row(row) - &v.row(other);
                (NotNan::new(diff.dot(&diff).sqrt()).unwrap(), other)
            })
            .collect::<Vec<_>>();
        order.sort();
        order
    }

    #[test]
    fn test_knn_matches_brute_force() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        for (n, d, k) in [(5, 1, 2), (40, 3, 7), (80, 10, 15)] {
            let v = Array2::<f64>::random_using((n, d), Normal::new(0.0, 1.0).unwrap(), &mut rng);
            let nn = NeighborIndex::new(&v.view()).query(&v.view(), k, true);
            for row in 0..n {
                let expected = brute_force(&v, row);
                for j in 0..k {
                    assert_eq!(nn.indices[(row, j)], expected[j].1);
                    assert!((nn.distances[(row, j)] - expected[j].0.into_inner()).abs() < 1e-12);
                }
            }
            assert_eq!(knn(&v.view(), k), nn.indices);
        }
    }

    #[test]
    fn test_exclude_self() {
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let v = Array2::<f64>::random_using((30, 4), Normal::new(0.0, 1.0).unwrap(), &mut rng);
        let index = NeighborIndex::new(&v.view());

        // a point is its own nearest neighbor unless excluded
        let with_self = index.query(&v.view(), 6, false);
        let without = index.query(&v.view(), 5, true);
        for row in 0..30 {
            assert_eq!(with_self.indices[(row, 0)], row);
            assert_eq!(with_self.distances[(row, 0)], 0.0);
            assert!(without.indices.row(row).iter().all(|&j| j != row));
        }
        assert_eq!(with_self.indices.slice(s![.., 1..]), without.indices);
    }

    #[test]
    fn test_duplicate_points() {
        let v = arr2(&[[0.0, 0.0], [0.0, 0.0], [3.0, 4.0], [9.0, 12.0]]);
        let nn = NeighborIndex::new(&v.view()).query(&v.view(), 2, true);

        // a copy of a point is a neighbor at distance zero, but the point itself is not
        assert_eq!(nn.indices.row(0).to_vec(), vec![1, 2]);
        assert_eq!(nn.indices.row(1).to_vec(), vec![0, 2]);
        assert_eq!(nn.distances.row(0).to_vec(), vec![0.0, 5.0]);

        let mut tied = nn.indices.row(2).to_vec();
        tied.sort_unstable();
        assert_eq!(tied, vec![0, 1]);
        assert_eq!(nn.distances.row(2).to_vec(), vec![5.0, 5.0]);

        assert_eq!(nn.indices[(3, 0)], 2);
        assert_eq!(nn.distances.row(3).to_vec(), vec![10.0, 15.0]);
    }

    #[test]
    fn test_k_beyond_points() {
        let v = arr2(&[[0.0], [1.0], [3.0]]);
        let nn = NeighborIndex::new(&v.view()).query(&v.view(), 4, true);
        assert_eq!(
            nn.indices,
            arr2(&[
                [1, 2, usize::MAX, usize::MAX],
                [0, 2, usize::MAX, usize::MAX],
                [1, 0, usize::MAX, usize::MAX]
            ])
        );
        assert!(nn.distances.slice(s![.., 2..]).iter().all(|d| d.is_infinite()));

        // without exclusion every point is available, itself included
        let all = NeighborIndex::new(&v.view()).query(&v.view(), 4, false);
        assert_eq!(all.indices.slice(s![.., ..3]), arr2(&[[0, 1, 2], [1, 0, 2], [2, 1, 0]]));
        assert!(all.indices.column(3).iter().all(|&j| j == usize::MAX));
    }

    #[test]
    fn test_query_other_points() {
        let reference = arr2(&[[0.0, 0.0], [3.0, 4.0], [10.0, 0.0]]);
        let index = NeighborIndex::new(&reference.view());
        assert_eq!(index.len(), 3);
        assert!(!index.is_empty());

        let queries = arr2(&[[0.0, 1.0], [9.0, 0.0]]);
        let nn = index.query(&queries.view(), 2, false);
        assert_eq!(nn.indices, arr2(&[[0, 1], [2, 1]]));
        assert_eq!(nn.distances[(0, 0)], 1.0);
        assert_eq!(nn.distances[(1, 0)], 1.0);
        assert!((nn.distances[(0, 1)] - 18f64.sqrt()).abs() < 1e-12);
    }
}
