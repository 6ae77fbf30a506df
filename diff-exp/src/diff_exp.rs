//! Per-feature Wilcoxon rank-sum differential expression
//!
use crate::dist;
use crate::rank::average_ranks;
use crate::wilcoxon::{RankSumResult, RankSumStats};
use anyhow::{bail, Error};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// Pseudo-count added to group means before taking the log2 fold change
pub const FOLD_CHANGE_PSEUDO_COUNT: f64 = 1.0;

/// Result of a differential expression comparison of group A ("in") against group B ("out"),
/// one entry per feature.
#[derive(Debug, Clone)]
pub struct DiffExpResult {
    /// U statistics of group A
    pub u: Array1<f64>,
    /// area under the ROC curve; above 0.5 when the feature is higher in group A
    pub auc: Array1<f64>,
    /// p_values
    pub p_values: Array1<f64>,
    /// adjusted p_values (bh)
    pub adjusted_p_values: Array1<f64>,
    /// mean expression in group A, on the linear scale
    pub mean_in: Array1<f64>,
    /// mean expression in group B, on the linear scale
    pub mean_out: Array1<f64>,
    /// log2((mean_in + 1) / (mean_out + 1))
    pub log2_fold_change: Array1<f64>,
}

impl DiffExpResult {
    fn from_tests(tests: Vec<RankSumResult>, means: Vec<(f64, f64)>) -> DiffExpResult {
        let p_values = tests.iter().map(|t| t.p_value).collect::<Array1<f64>>();
        let adjusted_p_values = Array1::from(dist::adjust_bh(p_values.as_slice().unwrap_or(&[])));
        let log2_fold_change = means
            .iter()
            .map(|&(a, b)| log2_fold_change(a, b))
            .collect::<Array1<f64>>();

        DiffExpResult {
            u: tests.iter().map(|t| t.u).collect(),
            auc: tests.iter().map(|t| t.auc).collect(),
            p_values,
            adjusted_p_values,
            mean_in: means.iter().map(|m| m.0).collect(),
            mean_out: means.iter().map(|m| m.1).collect(),
            log2_fold_change,
        }
    }

    /// Number of features
    pub fn len(&self) -> usize {
        self.p_values.len()
    }

    /// True if no features were tested
    pub fn is_empty(&self) -> bool {
        self.p_values.is_empty()
    }
}

/// log2 fold change of two linear-scale means, with a pseudo-count.
#[inline]
pub fn log2_fold_change(mean_in: f64, mean_out: f64) -> f64 {
    ((mean_in + FOLD_CHANGE_PSEUDO_COUNT) / (mean_out + FOLD_CHANGE_PSEUDO_COUNT)).log2()
}

/// Optional blocking of the cells: `block_of[cell]` is the block index of each cell.
#[derive(Debug, Clone, Copy)]
pub struct Blocks<'a> {
    block_of: &'a [usize],
    n_blocks: usize,
}

impl<'a> Blocks<'a> {
    /// Wrap a per-cell block index.
    pub fn new(block_of: &'a [usize]) -> Blocks<'a> {
        let n_blocks = block_of.iter().max().map_or(0, |&m| m + 1);
        Blocks { block_of, n_blocks }
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.n_blocks
    }

    /// True if there are no blocks
    pub fn is_empty(&self) -> bool {
        self.n_blocks == 0
    }

    fn split(&self, cells: &[usize]) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.n_blocks];
        for &c in cells {
            out[self.block_of[c]].push(c);
        }
        out
    }
}

fn check_cells(mat: &ArrayView2<f64>, cells: &[usize], blocks: Option<Blocks>) -> Result<(), Error> {
    let n_cells = mat.len_of(Axis(1));
    if let Some(c) = cells.iter().find(|&&c| c >= n_cells) {
        bail!("cell index {} out of range for a matrix of {} cells", c, n_cells);
    }
    if let Some(b) = blocks {
        if b.block_of.len() != n_cells {
            bail!("got block labels for {} cells, expected {}", b.block_of.len(), n_cells);
        }
    }
    Ok(())
}

fn mean_of(row: &ArrayView1<f64>, cells: &[usize], linear: &(impl Fn(f64) -> f64 + Sync)) -> f64 {
    if cells.is_empty() {
        return 0.0;
    }
    cells.iter().map(|&c| linear(row[c])).sum::<f64>() / cells.len() as f64
}

/// Compare the cells `cond_a` against `cond_b` for every feature (row) of `mat`, a feature x cell
/// matrix of log-scale expression. `linear` maps a log value back to the linear scale for the
/// group means and fold changes. With `blocks`, ranks are computed within each block and the
/// block statistics are summed.
pub fn wilcoxon_differential_expression(
    mat: ArrayView2<f64>,
    cond_a: &[usize],
    cond_b: &[usize],
    blocks: Option<Blocks>,
    linear: impl Fn(f64) -> f64 + Sync,
) -> Result<DiffExpResult, Error> {
    check_cells(&mat, cond_a, blocks)?;
    check_cells(&mat, cond_b, blocks)?;

    let (split_a, split_b) = match blocks {
        Some(b) => (b.split(cond_a), b.split(cond_b)),
        None => (vec![cond_a.to_vec()], vec![cond_b.to_vec()]),
    };

    let per_feature = mat
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            let stats = split_a
                .iter()
                .zip(&split_b)
                .filter_map(|(a, b)| {
                    let xa = a.iter().map(|&c| row[c]).collect::<Vec<_>>();
                    let xb = b.iter().map(|&c| row[c]).collect::<Vec<_>>();
                    RankSumStats::from_samples(&xa, &xb)
                })
                .collect::<Vec<_>>();
            let test = RankSumResult::from_blocks(&stats);
            let means = (mean_of(&row, cond_a, &linear), mean_of(&row, cond_b, &linear));
            (test, means)
        })
        .collect::<Vec<_>>();

    let (tests, means) = per_feature.into_iter().unzip();
    Ok(DiffExpResult::from_tests(tests, means))
}

/// Compare each group against all other grouped cells. `group_of[cell]` is the group of each
/// cell, `None` for cells left out of every comparison. Each feature is ranked once per block,
/// and those ranks are shared by every group. Returns one result per group index
/// `0..n_groups`.
pub fn wilcoxon_one_vs_rest(
    mat: ArrayView2<f64>,
    group_of: &[Option<usize>],
    blocks: Option<Blocks>,
    linear: impl Fn(f64) -> f64 + Sync,
) -> Result<Vec<DiffExpResult>, Error> {
    let n_cells = mat.len_of(Axis(1));
    if group_of.len() != n_cells {
        bail!("got group labels for {} cells, expected {}", group_of.len(), n_cells);
    }
    let grouped = (0..n_cells).filter(|&c| group_of[c].is_some()).collect::<Vec<_>>();
    check_cells(&mat, &grouped, blocks)?;
    let n_groups = group_of.iter().flatten().max().map_or(0, |&m| m + 1);

    let block_cells = match blocks {
        Some(b) => b.split(&grouped),
        None => vec![grouped.clone()],
    };
    let mut members = vec![Vec::new(); n_groups];
    for &c in &grouped {
        if let Some(g) = group_of[c] {
            members[g].push(c);
        }
    }
    let rest = members
        .iter()
        .map(|m| grouped.len() - m.len())
        .collect::<Vec<_>>();

    let per_feature = mat
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            let mut stats = vec![Vec::new(); n_groups];
            for cells in &block_cells {
                let values = cells.iter().map(|&c| row[c]).collect::<Vec<_>>();
                let (ranks, tie_term) = average_ranks(&values);

                let mut rank_sums = vec![0.0; n_groups];
                let mut sizes = vec![0usize; n_groups];
                for (&c, &r) in cells.iter().zip(&ranks) {
                    if let Some(g) = group_of[c] {
                        rank_sums[g] += r;
                        sizes[g] += 1;
                    }
                }
                for g in 0..n_groups {
                    if let Some(s) = RankSumStats::from_ranks(rank_sums[g], sizes[g], cells.len(), tie_term) {
                        stats[g].push(s);
                    }
                }
            }

            // linear-scale sums over the grouped cells give both "in" and "rest" means
            let mut sums = vec![0.0; n_groups];
            let mut total = 0.0;
            for &c in &grouped {
                let v = linear(row[c]);
                total += v;
                if let Some(g) = group_of[c] {
                    sums[g] += v;
                }
            }

            (0..n_groups)
                .map(|g| {
                    let test = RankSumResult::from_blocks(&stats[g]);
                    let mean_in = if members[g].is_empty() {
                        0.0
                    } else {
                        sums[g] / members[g].len() as f64
                    };
                    let mean_out = if rest[g] == 0 {
                        0.0
                    } else {
                        (total - sums[g]) / rest[g] as f64
                    };
                    (test, (mean_in, mean_out))
                })
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut results = Vec::with_capacity(n_groups);
    for g in 0..n_groups {
        let (tests, means) = per_feature.iter().map(|f| f[g]).unzip();
        results.push(DiffExpResult::from_tests(tests, means));
    }
    Ok(results)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use ndarray::{array, Array2};
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    fn identity(v: f64) -> f64 {
        v
    }

    #[test]
    fn test_pairwise() {
        // feature 0 separates the groups, feature 1 does not
        let mat = array![[5.0, 6.0, 7.0, 1.0, 2.0, 3.0], [1.0, 2.0, 1.0, 2.0, 1.0, 2.0]];
        let res = wilcoxon_differential_expression(mat.view(), &[0, 1, 2], &[3, 4, 5], None, identity).unwrap();

        assert_eq!(res.len(), 2);
        assert_eq!(res.auc[0], 1.0);
        assert_approx_eq!(res.auc[1], 1.0 / 3.0, 1e-12);
        assert!(res.p_values[0] < res.p_values[1]);
        assert!(res.adjusted_p_values[0] >= res.p_values[0]);
        assert_approx_eq!(res.log2_fold_change[0], (7.0f64 / 3.0).log2(), 1e-12);
    }

    #[test]
    fn test_one_vs_rest_matches_pairwise() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let mat = Array2::random_using((20, 30), Normal::new(0.0, 1.0).unwrap(), &mut rng);
        let group_of = (0..30).map(|c| Some(c % 3)).collect::<Vec<_>>();

        let all = wilcoxon_one_vs_rest(mat.view(), &group_of, None, identity).unwrap();
        assert_eq!(all.len(), 3);

        let in_1 = (0..30).filter(|c| c % 3 == 1).collect::<Vec<_>>();
        let out_1 = (0..30).filter(|c| c % 3 != 1).collect::<Vec<_>>();
        let pair = wilcoxon_differential_expression(mat.view(), &in_1, &out_1, None, identity).unwrap();

        for f in 0..20 {
            assert_approx_eq!(all[1].u[f], pair.u[f], 1e-9);
            assert_approx_eq!(all[1].p_values[f], pair.p_values[f], 1e-12);
            assert_approx_eq!(all[1].mean_out[f], pair.mean_out[f], 1e-9);
        }
    }

    #[test]
    fn test_blocked() {
        // in each block the first cell is group A; block 1 is shifted up as a whole
        let mat = array![[1.0, 0.0, 0.0, 11.0, 10.0, 10.0]];
        let block_of = [0, 0, 0, 1, 1, 1];
        let blocks = Blocks::new(&block_of);
        assert_eq!(blocks.len(), 2);

        let blocked = wilcoxon_differential_expression(mat.view(), &[0, 3], &[1, 2, 4, 5], Some(blocks), identity).unwrap();
        assert_eq!(blocked.auc[0], 1.0);

        let pooled = wilcoxon_differential_expression(mat.view(), &[0, 3], &[1, 2, 4, 5], None, identity).unwrap();
        assert!(pooled.auc[0] < 1.0);

        let err = wilcoxon_differential_expression(mat.view(), &[9], &[1], None, identity);
        assert!(err.is_err());
    }
}
