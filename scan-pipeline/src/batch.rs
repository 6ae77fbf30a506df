//! Batch integration of the selected features. Corrected values are stored as a cell x feature
//! representation; cell order and batch labels are unchanged.

use crate::nn::NeighborIndex;
use anyhow::Error;
use log::{info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use scan_types::{Dataset, Derived, LabelClass, PipelineError, Stage, CORRECTED, LOG_NORMALIZED};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// How one batch was merged
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MergeStats {
    /// Batch label
    pub batch: String,
    /// Mutual nearest neighbor pairs found against the batches merged before it
    pub mnn_pairs: usize,
    /// True if the batch was corrected by centering instead
    pub centered: bool,
}

/// Output of a batch correction
#[derive(Clone, Debug, PartialEq)]
pub struct Corrected {
    /// Corrected cell x feature values, in input cell order
    pub values: Array2<f64>,
    /// Per-batch merge statistics, in merge order
    pub merges: Vec<MergeStats>,
}

/// A batch correction of a cell x feature matrix whose cells are grouped by `blocks`
pub trait BatchCorrect {
    /// Correct `x`. Every cell must belong to exactly one block.
    fn correct(&self, x: ArrayView2<f64>, blocks: &LabelClass) -> Result<Corrected, Error>;
}

/// Subtract each batch's per-feature mean and add back the global mean
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Centering;

fn column_means(x: &ArrayView2<f64>, rows: &[usize]) -> Array1<f64> {
    let mut sum = Array1::zeros(x.ncols());
    for &r in rows {
        sum += &x.row(r);
    }
    sum / rows.len().max(1) as f64
}

impl BatchCorrect for Centering {
    fn correct(&self, x: ArrayView2<f64>, blocks: &LabelClass) -> Result<Corrected, Error> {
        let all = (0..x.nrows()).collect::<Vec<_>>();
        let global = column_means(&x, &all);
        let mut values = x.to_owned();
        let mut merges = Vec::new();
        for (label, members) in blocks.iter() {
            let shift = &global - &column_means(&x, members);
            for &r in members {
                let mut row = values.row_mut(r);
                row += &shift;
            }
            merges.push(MergeStats {
                batch: label.to_string(),
                mnn_pairs: 0,
                centered: true,
            });
        }
        Ok(Corrected { values, merges })
    }
}

/// Mutual nearest neighbors correction. Batches are merged in order into a growing reference.
/// Each incoming cell is moved by a Gaussian-weighted average of the correction vectors of the
/// incoming cells that have a mutual nearest neighbor in the reference.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mnn {
    /// Neighbors searched in each direction
    pub k: usize,
    /// Gaussian kernel bandwidth, in the units of the input
    pub sigma: f64,
}

impl Default for Mnn {
    fn default() -> Self {
        Mnn { k: 20, sigma: 1.0 }
    }
}

impl Mnn {
    /// Mutual nearest neighbor pairs `(reference row, incoming row)`, sorted.
    pub fn mnn_pairs(&self, reference: &ArrayView2<f64>, incoming: &ArrayView2<f64>) -> Vec<(usize, usize)> {
        let k_ref = self.k.min(reference.nrows());
        let k_inc = self.k.min(incoming.nrows());
        let into_reference = NeighborIndex::new(reference).query(incoming, k_ref, false);
        let into_incoming = NeighborIndex::new(incoming).query(reference, k_inc, false);

        let forward = into_incoming
            .indices
            .outer_iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().filter(|&&b| b != usize::MAX).map(|&b| (r, b)).collect::<Vec<_>>())
            .collect::<HashSet<_>>();

        let mut pairs = into_reference
            .indices
            .outer_iter()
            .enumerate()
            .flat_map(|(b, row)| row.iter().map(|&r| (r, b)).collect::<Vec<_>>())
            .filter(|pair| forward.contains(pair))
            .collect::<Vec<_>>();
        pairs.sort_unstable();
        pairs
    }

    /// Correction vector of every incoming row, from the mutual pairs.
    fn smoothed_correction(
        &self,
        reference: &ArrayView2<f64>,
        incoming: &ArrayView2<f64>,
        pairs: &[(usize, usize)],
    ) -> Array2<f64> {
        // average correction of each incoming cell that has a mutual partner
        let mut per_cell: BTreeMap<usize, (Array1<f64>, usize)> = BTreeMap::new();
        for &(r, b) in pairs {
            let v = &reference.row(r) - &incoming.row(b);
            let entry = per_cell
                .entry(b)
                .or_insert_with(|| (Array1::zeros(incoming.ncols()), 0));
            entry.0 += &v;
            entry.1 += 1;
        }
        let anchors = per_cell
            .into_iter()
            .map(|(b, (sum, n))| (b, sum / n as f64))
            .collect::<Vec<_>>();

        let two_sigma_sq = 2.0 * self.sigma * self.sigma;
        let mut correction = Array2::zeros(incoming.dim());
        for (cell, mut out) in correction.outer_iter_mut().enumerate() {
            let d_sq = anchors
                .iter()
                .map(|(b, _)| {
                    let diff = &incoming.row(cell) - &incoming.row(*b);
                    diff.dot(&diff)
                })
                .collect::<Vec<_>>();
            // weights relative to the nearest anchor, so distant cells do not underflow to zero
            let nearest = d_sq.iter().copied().fold(f64::INFINITY, f64::min);
            let mut total = 0.0;
            for ((_, v), d) in anchors.iter().zip(&d_sq) {
                let w = (-(d - nearest) / two_sigma_sq).exp();
                out.scaled_add(w, v);
                total += w;
            }
            if total > 0.0 {
                out /= total;
            }
        }
        correction
    }
}

impl BatchCorrect for Mnn {
    fn correct(&self, x: ArrayView2<f64>, blocks: &LabelClass) -> Result<Corrected, Error> {
        if self.k == 0 || !(self.sigma > 0.0) {
            return Err(PipelineError::InvalidParameter(format!(
                "MNN needs k > 0 and sigma > 0, got k = {}, sigma = {}",
                self.k, self.sigma
            ))
            .into());
        }
        let mut values = x.to_owned();
        let mut merges = Vec::new();
        let mut merged: Vec<usize> = Vec::new();

        for (label, members) in blocks.iter() {
            if merged.is_empty() {
                merged.extend_from_slice(members);
                merges.push(MergeStats {
                    batch: label.to_string(),
                    mnn_pairs: 0,
                    centered: false,
                });
                continue;
            }

            let reference = values.select(Axis(0), &merged);
            let incoming = values.select(Axis(0), members);
            let pairs = self.mnn_pairs(&reference.view(), &incoming.view());

            let correction = if pairs.is_empty() {
                warn!("no mutual nearest neighbors for batch {label}, centering it on the merged batches");
                let shift = column_means(&reference.view(), &(0..reference.nrows()).collect::<Vec<_>>())
                    - column_means(&incoming.view(), &(0..incoming.nrows()).collect::<Vec<_>>());
                let mut c = Array2::zeros(incoming.dim());
                c += &shift;
                c
            } else {
                self.smoothed_correction(&reference.view(), &incoming.view(), &pairs)
            };
            info!("merged batch {} with {} MNN pairs", label, pairs.len());

            for (i, &cell) in members.iter().enumerate() {
                let mut row = values.row_mut(cell);
                row += &correction.row(i);
            }
            merged.extend_from_slice(members);
            merges.push(MergeStats {
                batch: label.to_string(),
                mnn_pairs: pairs.len(),
                centered: pairs.is_empty(),
            });
        }
        Ok(Corrected { values, merges })
    }
}

/// Choice of batch correction
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BatchMethod {
    /// See `Centering`
    Centering,
    /// See `Mnn`
    Mnn(Mnn),
}

impl Default for BatchMethod {
    fn default() -> Self {
        BatchMethod::Mnn(Mnn::default())
    }
}

impl BatchCorrect for BatchMethod {
    fn correct(&self, x: ArrayView2<f64>, blocks: &LabelClass) -> Result<Corrected, Error> {
        match self {
            BatchMethod::Centering => Centering.correct(x, blocks),
            BatchMethod::Mnn(m) => m.correct(x, blocks),
        }
    }
}

/// Correct the highly variable rows of `logNormalized` for batch effects and attach the result
/// as `corrected`. Requires batch labels on every cell.
pub fn correct_batches(ds: &Dataset, method: &impl BatchCorrect) -> Result<(Dataset, Vec<MergeStats>), Error> {
    ds.check_stage(Stage::BatchCorrected)?;
    let blocks = ds
        .batch_blocks()
        .ok_or_else(|| PipelineError::InvalidParameter("batch correction needs a batch label on every cell".into()))?;
    let hvg = ds.highly_variable();
    if hvg.is_empty() {
        return Err(PipelineError::InvalidParameter("no highly variable features to correct".to_string()).into());
    }

    let x = ds
        .require(LOG_NORMALIZED)?
        .array()
        .select(Axis(0), &hvg)
        .reversed_axes();
    info!(
        "correcting {} cells x {} features across {} batches",
        x.nrows(),
        x.ncols(),
        blocks.len()
    );
    let corrected = method.correct(x.view(), &blocks)?;
    let out = ds
        .clone()
        .with_derived(CORRECTED, Derived::Cells(corrected.values))?
        .enter(Stage::BatchCorrected)?;
    Ok((out, corrected.merges))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, concatenate};
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    /// Two tight clusters at (0, 0, 0) and (10, 0, 0)
    fn two_clusters(rng: &mut Pcg64Mcg, n: usize) -> Array2<f64> {
        let noise = Normal::new(0.0, 0.3).unwrap();
        let mut x = Array2::random_using((2 * n, 3), noise, rng);
        for mut row in x.slice_mut(ndarray::s![n.., ..]).outer_iter_mut() {
            row[0] += 10.0;
        }
        x
    }

    fn batches(n_a: usize, n_b: usize) -> LabelClass {
        let labels = (0..n_a + n_b).map(|i| if i < n_a { "a" } else { "b" }).collect::<Vec<_>>();
        LabelClass::from_item_labels(&labels)
    }

    #[test]
    fn test_centering() {
        let x = array![[1.0, 0.0], [3.0, 2.0], [11.0, 0.0], [13.0, 4.0]];
        let blocks = batches(2, 2);
        let out = Centering.correct(x.view(), &blocks).unwrap();
        assert_eq!(
            out.values,
            array![[6.0, 0.5], [8.0, 2.5], [6.0, -0.5], [8.0, 3.5]]
        );
        assert!(out.merges.iter().all(|m| m.centered));
    }

    #[test]
    fn test_mnn_removes_shift() {
        let mut rng = Pcg64Mcg::seed_from_u64(5);
        let a = two_clusters(&mut rng, 30);
        let b = two_clusters(&mut rng, 30) + &array![0.0, 3.0, 3.0];
        let x = concatenate(Axis(0), &[a.view(), b.view()]).unwrap();
        let blocks = batches(60, 60);

        let mnn = Mnn { k: 10, sigma: 1.0 };
        let pairs = mnn.mnn_pairs(&a.view(), &b.view());
        assert!(!pairs.is_empty());
        // pairs only connect matching clusters
        assert!(pairs.iter().all(|&(r, b)| (r < 30) == (b < 30)));

        let out = mnn.correct(x.view(), &blocks).unwrap();
        assert_eq!(out.values.slice(ndarray::s![..60, ..]), a);
        assert!(!out.merges[1].centered);

        let all_a = (0..60).collect::<Vec<_>>();
        let all_b = (60..120).collect::<Vec<_>>();
        let va = out.values.view();
        let gap = &column_means(&va, &all_b) - &column_means(&va, &all_a);
        assert!(gap.iter().all(|g| g.abs() < 0.3), "{gap}");

        // the two clusters stay apart in the corrected batch
        let low = column_means(&va, &(60..90).collect::<Vec<_>>());
        let high = column_means(&va, &(90..120).collect::<Vec<_>>());
        assert_abs_diff_eq!(high[0] - low[0], 10.0, epsilon = 0.5);
    }

    #[test]
    fn test_mnn_single_cell_batch() {
        let x = array![[0.0], [0.1], [100.0], [100.1], [50.0]];
        let blocks = LabelClass::from_item_labels(&["a", "a", "a", "a", "b"]);
        let mnn = Mnn { k: 1, sigma: 1.0 };
        let out = mnn.correct(x.view(), &blocks).unwrap();
        // b's nearest reference cell is 0.1, and b is the only candidate in the other direction
        assert_eq!(out.merges[1].mnn_pairs, 1);
        assert!(!out.merges[1].centered);
        assert_abs_diff_eq!(out.values[(4, 0)], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_parameters() {
        let x = array![[0.0], [1.0]];
        let blocks = batches(1, 1);
        assert!(Mnn { k: 0, sigma: 1.0 }.correct(x.view(), &blocks).is_err());
        assert!(Mnn { k: 3, sigma: 0.0 }.correct(x.view(), &blocks).is_err());
    }
}
