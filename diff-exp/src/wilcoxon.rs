//! Wilcoxon rank-sum (Mann-Whitney U) test with tie and continuity corrections.
//!
//! A comparison may be split into blocks (e.g. batches). Each block contributes its own U
//! statistic, expectation and variance, and the block sums are tested together, in the manner
//! of the van Elteren test. Blocks where either group is absent contribute nothing.

use crate::dist::two_sided_pvalue;
use crate::rank::average_ranks;

/// Sufficient statistics of the rank-sum comparison of group 1 against group 2 within one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankSumStats {
    /// Mann-Whitney U of group 1: the number of (group 1, group 2) pairs where the group 1 value
    /// is larger, counting ties as one half
    pub u: f64,
    /// Size of group 1
    pub n1: usize,
    /// Size of group 2
    pub n2: usize,
    /// `sum(t^3 - t)` over tied groups of the pooled sample
    pub tie_term: f64,
}

impl RankSumStats {
    /// Rank the pooled sample and compute the statistics. Returns `None` if either group is empty.
    pub fn from_samples(x: &[f64], y: &[f64]) -> Option<RankSumStats> {
        if x.is_empty() || y.is_empty() {
            return None;
        }
        let pooled = x.iter().chain(y).copied().collect::<Vec<_>>();
        let (ranks, tie_term) = average_ranks(&pooled);
        let rank_sum = ranks[..x.len()].iter().sum::<f64>();
        Some(RankSumStats::from_rank_sum(rank_sum, x.len(), y.len(), tie_term))
    }

    /// Statistics from the rank sum of group 1 within an already ranked pooled sample of
    /// `n1 + n2` values. Returns `None` if either group is empty.
    pub fn from_ranks(rank_sum: f64, n1: usize, n_pooled: usize, tie_term: f64) -> Option<RankSumStats> {
        if n1 == 0 || n1 >= n_pooled {
            return None;
        }
        Some(RankSumStats::from_rank_sum(rank_sum, n1, n_pooled - n1, tie_term))
    }

    fn from_rank_sum(rank_sum: f64, n1: usize, n2: usize, tie_term: f64) -> RankSumStats {
        let n1f = n1 as f64;
        RankSumStats {
            u: rank_sum - n1f * (n1f + 1.0) / 2.0,
            n1,
            n2,
            tie_term,
        }
    }

    /// Expected U under the null hypothesis
    pub fn expectation(&self) -> f64 {
        self.n1 as f64 * self.n2 as f64 / 2.0
    }

    /// Tie-corrected variance of U under the null hypothesis
    pub fn variance(&self) -> f64 {
        let n1 = self.n1 as f64;
        let n2 = self.n2 as f64;
        let n = n1 + n2;
        n1 * n2 / 12.0 * ((n + 1.0) - self.tie_term / (n * (n - 1.0)))
    }
}

/// Outcome of a (possibly blocked) rank-sum test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankSumResult {
    /// U statistic of group 1, summed over blocks
    pub u: f64,
    /// Area under the ROC curve, `U / (n1 n2)` with the products summed over blocks.
    /// 0.5 when group 1 is neither higher nor lower than group 2.
    pub auc: f64,
    /// Continuity-corrected normal statistic; positive when group 1 ranks higher
    pub z: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

impl RankSumResult {
    /// The result of a comparison with no usable block.
    pub fn untestable() -> RankSumResult {
        RankSumResult {
            u: 0.0,
            auc: 0.5,
            z: 0.0,
            p_value: 1.0,
        }
    }

    /// Combine the per-block statistics into one test.
    pub fn from_blocks(blocks: &[RankSumStats]) -> RankSumResult {
        if blocks.is_empty() {
            return RankSumResult::untestable();
        }

        let u = blocks.iter().map(|s| s.u).sum::<f64>();
        let expectation = blocks.iter().map(RankSumStats::expectation).sum::<f64>();
        let variance = blocks.iter().map(RankSumStats::variance).sum::<f64>();
        let pairs = blocks.iter().map(|s| s.n1 as f64 * s.n2 as f64).sum::<f64>();

        let auc = u / pairs;
        let diff = u - expectation;
        if variance <= 0.0 {
            // every pooled value tied: no evidence either way
            return RankSumResult {
                u,
                auc,
                z: 0.0,
                p_value: 1.0,
            };
        }

        let z = diff.signum() * (diff.abs() - 0.5).max(0.0) / variance.sqrt();
        RankSumResult {
            u,
            auc,
            z,
            p_value: two_sided_pvalue(z),
        }
    }
}

/// Unblocked two-sample rank-sum test of `x` against `y`.
pub fn rank_sum_test(x: &[f64], y: &[f64]) -> RankSumResult {
    match RankSumStats::from_samples(x, y) {
        Some(stats) => RankSumResult::from_blocks(&[stats]),
        None => RankSumResult::untestable(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_separated_samples() {
        let x = [6.0, 7.0, 8.0, 9.0, 10.0];
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let r = rank_sum_test(&x, &y);

        assert_eq!(r.u, 25.0);
        assert_eq!(r.auc, 1.0);
        // z = (12.5 - 0.5) / sqrt(25 * 11 / 12)
        assert_approx_eq!(r.z, 2.506_718_245_762_049, 1e-9);
        assert_approx_eq!(r.p_value, 0.012_185_780_355_345, 1e-7);

        let flipped = rank_sum_test(&y, &x);
        assert_eq!(flipped.auc, 0.0);
        assert_approx_eq!(flipped.z, -r.z, 1e-12);
        assert_approx_eq!(flipped.p_value, r.p_value, 1e-12);
    }

    #[test]
    fn test_ties() {
        let x = [0.0, 0.0, 1.0, 2.0];
        let y = [0.0, 0.0, 0.0, 1.0];
        let s = RankSumStats::from_samples(&x, &y).unwrap();

        // pooled ranks: five zeros share 3, the two ones share 6.5, the two is 8
        assert_eq!(s.u, 3.0 + 3.0 + 6.5 + 8.0 - 10.0);
        assert_eq!(s.tie_term, 120.0 + 6.0);
        assert_approx_eq!(s.variance(), 16.0 / 12.0 * (9.0 - 126.0 / 56.0), 1e-12);

        let all_tied = rank_sum_test(&[1.0, 1.0], &[1.0, 1.0, 1.0]);
        assert_eq!(all_tied.p_value, 1.0);
        assert_eq!(all_tied.auc, 0.5);
    }

    #[test]
    fn test_blocks() {
        let a = RankSumStats::from_samples(&[5.0, 6.0], &[1.0, 2.0]).unwrap();
        let b = RankSumStats::from_samples(&[3.0], &[4.0, 0.0]).unwrap();
        let r = RankSumResult::from_blocks(&[a, b]);

        assert_eq!(r.u, 4.0 + 1.0);
        assert_approx_eq!(r.auc, 5.0 / 6.0, 1e-12);
        assert!(r.z > 0.0);

        assert!(RankSumStats::from_samples(&[], &[1.0]).is_none());
        assert_eq!(RankSumResult::from_blocks(&[]), RankSumResult::untestable());
    }
}
