use anyhow::{format_err, Error};
use log::warn;
use ndarray::{Array2, ArrayView2, Axis};
use noisy_float::types::{n64, N64};
use num_traits::Bounded;
use rayon::prelude::*;
use vpsearch::{BestCandidate, MetricSpace, Tree};

/// One row of the input, borrowed.
#[derive(Clone, Debug)]
pub struct Sample<'a> {
    data: &'a [f64],
    /// row index of the sample
    pub idx: usize,
}

#[inline]
fn euclidean(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt()
}

impl vpsearch::MetricSpace for Sample<'_> {
    type UserData = ();
    type Distance = N64;

    fn distance(&self, other: &Self, _: &Self::UserData) -> Self::Distance {
        n64(euclidean(self.data, other.data))
    }
}

/// Keeps the `max_item_count` closest candidates seen by a tree search, ordered by distance
/// then index.
struct CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    max_item_count: usize,
    max_observed_distance: Item::Distance,
    distance_x_index: Vec<(Item::Distance, usize)>,
}

impl<Item, Impl> CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl>,
    Item::Distance: Ord,
{
    fn new(max_item_count: usize) -> Self {
        CountBasedNeighborhood {
            max_item_count,
            max_observed_distance: <Item::Distance as Bounded>::max_value(),
            distance_x_index: Vec::with_capacity(max_item_count + 1),
        }
    }

    fn clear(&mut self) {
        self.max_observed_distance = <Item::Distance as Bounded>::max_value();
        self.distance_x_index.clear();
    }

    fn insert_index(&mut self, index: usize, distance: Item::Distance) {
        let val = (distance, index);
        let idx = self.distance_x_index.binary_search(&val).unwrap_or_else(|x| x);
        self.distance_x_index.insert(idx, val);
        if self.distance_x_index.len() >= self.max_item_count {
            self.distance_x_index.truncate(self.max_item_count);
            if let Some(&(d, _)) = self.distance_x_index.last() {
                self.max_observed_distance = d;
            }
        }
    }
}

impl<'a, Item, Impl> BestCandidate<Item, Impl> for &'a mut CountBasedNeighborhood<Item, Impl>
where
    Item: MetricSpace<Impl> + Clone,
    Item::Distance: Ord,
{
    type Output = std::iter::Cloned<std::slice::Iter<'a, (Item::Distance, usize)>>;

    #[inline]
    fn consider(&mut self, _: &Item, distance: Item::Distance, candidate_index: usize, _: &Item::UserData) {
        if self.max_item_count == 0 {
            return;
        }

        if distance < self.max_observed_distance || self.distance_x_index.len() < self.max_item_count {
            self.insert_index(candidate_index, distance);
        }
    }

    #[inline]
    fn distance(&self) -> Item::Distance {
        self.max_observed_distance
    }

    fn result(self, _: &Item::UserData) -> Self::Output {
        self.distance_x_index.as_slice().iter().cloned()
    }
}

/// The `k` nearest neighbors of every row of `data` by Euclidean distance, excluding the row
/// itself. Returns `(indices, distances)`, each of shape `(rows, k)` and sorted by distance.
/// `k` is reduced to `rows - 1` if there are not enough rows.
pub fn nearest_neighbors(data: ArrayView2<f64>, mut k: usize) -> Result<(Array2<usize>, Array2<f64>), Error> {
    let samples_size = data.nrows();
    if samples_size <= k {
        warn!(
            "{} neighbors requested, but only {} available",
            k,
            samples_size.saturating_sub(1)
        );
        k = samples_size.saturating_sub(1);
    }

    let data = data.as_standard_layout();
    let samples = data
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(idx, row)| {
            row.to_slice()
                .map(|s| Sample { data: s, idx })
                .ok_or_else(|| format_err!("row {} of the input is not contiguous", idx))
        })
        .collect::<Result<Vec<Sample>, Error>>()?;
    let vp = Tree::new_with_user_data_ref(&samples, &());

    let mut indices = Array2::from_elem((samples_size, k), usize::MAX);
    let mut distances = Array2::from_elem((samples_size, k), f64::INFINITY);

    indices
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip_eq(distances.axis_iter_mut(Axis(0)).into_par_iter())
        .enumerate()
        .for_each_init(
            || CountBasedNeighborhood::new(k + 1),
            |neighborhood, (cell, (mut indices, mut distances))| {
                neighborhood.clear();
                let query = &samples[cell];
                let mut j = 0;
                for (dist, idx) in vp.find_nearest_custom(query, &(), neighborhood) {
                    if query.idx != idx && j < k {
                        indices[j] = idx;
                        distances[j] = dist.raw();
                        j += 1;
                    }
                }
            },
        );

    Ok((indices, distances))
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_line() {
        let x = array![[0.0], [1.0], [3.0], [7.0]];
        let (idx, dist) = nearest_neighbors(x.view(), 2).unwrap();

        assert_eq!(idx.row(0).to_vec(), vec![1, 2]);
        assert_eq!(dist.row(0).to_vec(), vec![1.0, 3.0]);
        assert_eq!(idx.row(3).to_vec(), vec![2, 1]);
        assert_eq!(dist.row(3).to_vec(), vec![4.0, 6.0]);
    }

    #[test]
    fn test_clamped_k() {
        let x = array![[0.0, 0.0], [3.0, 4.0]];
        let (idx, dist) = nearest_neighbors(x.view(), 5).unwrap();
        assert_eq!(idx.dim(), (2, 1));
        assert_eq!(idx[[0, 0]], 1);
        assert_eq!(dist[[1, 0]], 5.0);
    }
}
