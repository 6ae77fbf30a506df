//! Rank-based differential expression for marker detection
#![deny(missing_docs)]

/// differential expression over feature x cell matrices
#[allow(clippy::module_inception)]
pub mod diff_exp;
/// normal distribution tail and multiple testing correction
pub mod dist;
/// ranking with ties
pub mod rank;
/// Wilcoxon rank-sum test
pub mod wilcoxon;

pub use crate::diff_exp::{wilcoxon_differential_expression, wilcoxon_one_vs_rest, Blocks, DiffExpResult};
pub use crate::wilcoxon::{rank_sum_test, RankSumResult, RankSumStats};
