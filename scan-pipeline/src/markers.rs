//! Marker features of each cluster by the Wilcoxon rank-sum test. Reporting only: the dataset is
//! read, never modified.

use crate::normalization::LogBase;
use anyhow::Error;
use diff_exp::{wilcoxon_differential_expression, wilcoxon_one_vs_rest, Blocks, DiffExpResult};
use log::info;
use scan_types::{Dataset, PipelineError, LOG_NORMALIZED};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which groups are compared
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    /// Each cluster against all other cells
    OneVsRest,
    /// Each cluster against each other cluster
    Pairwise,
}

/// Whether a marker is higher or lower in its group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// AUC of at least 0.5
    Up,
    /// AUC below 0.5
    Down,
}

/// Marker detection parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerParams {
    /// Groups compared
    pub comparison: Comparison,
    /// Rank within batches and combine the batch statistics
    pub block_by_batch: bool,
    /// Keep only the leading records of each comparison
    pub top_n: Option<usize>,
    /// Log base of `logNormalized`, for the linear-scale means
    pub log_base: LogBase,
    /// Pseudo-count of `logNormalized`
    pub pseudo_count: f64,
}

impl Default for MarkerParams {
    fn default() -> Self {
        MarkerParams {
            comparison: Comparison::OneVsRest,
            block_by_batch: true,
            top_n: None,
            log_base: LogBase::Two,
            pseudo_count: 1.0,
        }
    }
}

/// Test result of one feature in one comparison
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarkerRecord {
    /// Feature index
    pub feature: usize,
    /// Feature id
    pub id: String,
    /// Feature name
    pub name: String,
    /// Area under the ROC curve of the group against the other cells
    pub auc: f64,
    /// U statistic of the group
    pub u: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Benjamini-Hochberg adjusted p-value within the comparison
    pub adjusted_p_value: f64,
    /// log2 fold change of the linear-scale means
    pub log2_fold_change: f64,
    /// Mean linear-scale expression in the group
    pub mean_in: f64,
    /// Mean linear-scale expression in the other cells
    pub mean_out: f64,
    /// Up or down in the group
    pub direction: Direction,
}

/// A comparison: a group against another group, or against all others when `None`
pub type ComparisonKey = (usize, Option<usize>);

/// Sorted marker records of every comparison
pub type MarkerReport = BTreeMap<ComparisonKey, Vec<MarkerRecord>>;

fn records(ds: &Dataset, res: &DiffExpResult, top_n: Option<usize>) -> Vec<MarkerRecord> {
    let mut recs = ds
        .features()
        .iter()
        .enumerate()
        .map(|(f, meta)| MarkerRecord {
            feature: f,
            id: meta.id.clone(),
            name: meta.name.clone(),
            auc: res.auc[f],
            u: res.u[f],
            p_value: res.p_values[f],
            adjusted_p_value: res.adjusted_p_values[f],
            log2_fold_change: res.log2_fold_change[f],
            mean_in: res.mean_in[f],
            mean_out: res.mean_out[f],
            direction: if res.auc[f] >= 0.5 { Direction::Up } else { Direction::Down },
        })
        .collect::<Vec<_>>();

    recs.sort_by(|a, b| {
        a.adjusted_p_value
            .total_cmp(&b.adjusted_p_value)
            .then_with(|| (b.auc - 0.5).abs().total_cmp(&(a.auc - 0.5).abs()))
    });
    if let Some(n) = top_n {
        recs.truncate(n);
    }
    recs
}

/// Markers of the groups `group_of[cell]`.
pub fn find_markers_for_groups(ds: &Dataset, group_of: &[usize], params: &MarkerParams) -> Result<MarkerReport, Error> {
    if group_of.len() != ds.n_cells() {
        return Err(PipelineError::InputShapeMismatch {
            what: "group labels".to_string(),
            expected: ds.n_cells(),
            actual: group_of.len(),
        }
        .into());
    }
    let values = ds.require(LOG_NORMALIZED)?.array();
    let n_groups = group_of.iter().max().map_or(0, |&m| m + 1);
    if n_groups < 2 {
        info!("{n_groups} group(s), no markers to test");
        return Ok(MarkerReport::new());
    }

    let block_of = match ds.batch_blocks() {
        Some(b) if params.block_by_batch && b.len() > 1 => Some(b.item_label_indices()?),
        _ => None,
    };
    let blocks = block_of.as_deref().map(Blocks::new);
    let (base, pseudo) = (params.log_base, params.pseudo_count);
    let linear = move |v: f64| base.pow(v) - pseudo;

    info!(
        "testing {} features across {} groups{}",
        ds.n_features(),
        n_groups,
        if blocks.is_some() { ", blocked by batch" } else { "" }
    );

    let mut report = MarkerReport::new();
    match params.comparison {
        Comparison::OneVsRest => {
            let group_of = group_of.iter().map(|&g| Some(g)).collect::<Vec<_>>();
            let results = wilcoxon_one_vs_rest(values.view(), &group_of, blocks, linear)?;
            for (g, res) in results.iter().enumerate() {
                report.insert((g, None), records(ds, res, params.top_n));
            }
        }
        Comparison::Pairwise => {
            let mut members = vec![Vec::new(); n_groups];
            for (c, &g) in group_of.iter().enumerate() {
                members[g].push(c);
            }
            for a in 0..n_groups {
                for b in (0..n_groups).filter(|&b| b != a) {
                    let res = wilcoxon_differential_expression(values.view(), &members[a], &members[b], blocks, linear)?;
                    report.insert((a, Some(b)), records(ds, &res, params.top_n));
                }
            }
        }
    }
    Ok(report)
}

/// Markers of the clusters assigned by `cluster::cluster`.
pub fn find_markers(ds: &Dataset, params: &MarkerParams) -> Result<MarkerReport, Error> {
    let labels = ds
        .cluster_labels()
        .ok_or_else(|| PipelineError::InvalidParameter("markers need a cluster label on every cell".into()))?;
    find_markers_for_groups(ds, &labels, params)
}
