//! Per-cell quality control: library size, detected features and the fraction of counts in
//! named feature subsets, each filtered by a median-absolute-deviation outlier rule.

use crate::stats::{median_mad, MAD_SCALE};
use anyhow::Error;
use log::info;
use scan_types::{Dataset, FeatureMeta, LabelClass, PipelineError, Stage, MITO_FLAG};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the members of a feature subset are chosen
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SubsetSelector {
    /// Feature names starting with this prefix, ignoring case
    Prefix(String),
    /// Features carrying this flag
    Flag(String),
    /// Explicit feature indices
    Indices(Vec<usize>),
}

/// A named group of features whose share of each cell's counts is a QC metric
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSubset {
    /// Metric name, e.g. "mito"
    pub name: String,
    /// Member selection
    pub selector: SubsetSelector,
}

impl FeatureSubset {
    /// Mitochondrial features by the human gene name prefix "MT-".
    pub fn mito() -> FeatureSubset {
        FeatureSubset {
            name: MITO_FLAG.to_string(),
            selector: SubsetSelector::Prefix("MT-".to_string()),
        }
    }

    /// Indices of the member features.
    pub fn resolve(&self, features: &[FeatureMeta]) -> Vec<usize> {
        match &self.selector {
            SubsetSelector::Prefix(p) => {
                let p = p.to_lowercase();
                features
                    .iter()
                    .enumerate()
                    .filter_map(|(i, f)| f.name.to_lowercase().starts_with(&p).then_some(i))
                    .collect()
            }
            SubsetSelector::Flag(flag) => features
                .iter()
                .enumerate()
                .filter_map(|(i, f)| f.has_flag(flag).then_some(i))
                .collect(),
            SubsetSelector::Indices(idx) => idx.iter().copied().filter(|&i| i < features.len()).collect(),
        }
    }
}

/// Tail(s) of a metric's distribution considered outlying
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Values below the lower threshold
    Lower,
    /// Values above the upper threshold
    Higher,
    /// Either
    Both,
}

/// Outlier rule for one metric
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlierRule {
    /// Which tail is filtered
    pub direction: Direction,
    /// Apply the rule to `ln(1 + x)` instead of `x`
    pub log: bool,
}

impl OutlierRule {
    fn transform(&self, x: f64) -> f64 {
        if self.log {
            x.ln_1p()
        } else {
            x
        }
    }

    fn untransform(&self, x: f64) -> f64 {
        if self.log {
            x.exp_m1()
        } else {
            x
        }
    }
}

/// QC filter parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcParams {
    /// Feature subsets whose count percentage is filtered
    pub subsets: Vec<FeatureSubset>,
    /// Number of (scaled) MADs from the median beyond which a cell is an outlier
    pub nmads: f64,
    /// Compute thresholds separately within each batch, when batches are labelled
    pub per_batch: bool,
    /// Rule for the total count
    pub total_rule: OutlierRule,
    /// Rule for the number of detected features
    pub detected_rule: OutlierRule,
    /// Rule for the subset percentages
    pub subset_rule: OutlierRule,
}

impl Default for QcParams {
    fn default() -> Self {
        QcParams {
            subsets: vec![FeatureSubset::mito()],
            nmads: 3.0,
            per_batch: true,
            total_rule: OutlierRule {
                direction: Direction::Lower,
                log: true,
            },
            detected_rule: OutlierRule {
                direction: Direction::Lower,
                log: true,
            },
            subset_rule: OutlierRule {
                direction: Direction::Higher,
                log: false,
            },
        }
    }
}

/// Per-cell QC metrics of the input dataset
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QcMetrics {
    /// Total count per cell
    pub total: Vec<u64>,
    /// Detected features per cell
    pub detected: Vec<usize>,
    /// Percent of counts in each non-empty subset, per cell
    pub subset_percent: BTreeMap<String, Vec<f64>>,
}

/// Thresholds applied to one metric within one batch, in the metric's own units
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Threshold {
    /// Metric name
    pub metric: String,
    /// Batch label, None when thresholds are computed over all cells
    pub batch: Option<String>,
    /// Cells strictly below are discarded
    pub lower: Option<f64>,
    /// Cells strictly above are discarded
    pub upper: Option<f64>,
}

/// Outcome of the QC filter
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QcReport {
    /// Metrics of every input cell
    pub metrics: QcMetrics,
    /// Applied thresholds
    pub thresholds: Vec<Threshold>,
    /// True for each discarded input cell
    pub discard: Vec<bool>,
    /// Number of cells failing each metric. A cell may fail several.
    pub reasons: BTreeMap<String, usize>,
}

impl QcReport {
    /// Number of discarded cells
    pub fn n_discarded(&self) -> usize {
        self.discard.iter().filter(|&&d| d).count()
    }
}

/// Metric name for cells without counts
pub const ZERO_TOTAL: &str = "zero_total";
/// Metric name of the total count
pub const TOTAL: &str = "total_counts";
/// Metric name of the detected feature count
pub const DETECTED: &str = "detected_features";

/// Compute per-cell QC metrics. Subsets that match no feature are returned separately.
pub fn qc_metrics(ds: &Dataset, subsets: &[FeatureSubset]) -> (QcMetrics, Vec<String>) {
    let total = ds.cell_totals();
    let detected = ds.detected_features();

    let mut subset_percent = BTreeMap::new();
    let mut empty = Vec::new();
    for subset in subsets {
        let members = subset.resolve(ds.features());
        if members.is_empty() {
            empty.push(subset.name.clone());
            continue;
        }
        let mut is_member = vec![false; ds.n_features()];
        members.iter().for_each(|&i| is_member[i] = true);

        let pct = ds
            .counts()
            .outer_iterator()
            .zip(&total)
            .map(|(col, &tot)| {
                let in_subset = col
                    .iter()
                    .filter(|(row, _)| is_member[*row])
                    .map(|(_, &v)| v as u64)
                    .sum::<u64>();
                if tot == 0 {
                    0.0
                } else {
                    100.0 * in_subset as f64 / tot as f64
                }
            })
            .collect();
        subset_percent.insert(subset.name.clone(), pct);
    }

    (
        QcMetrics {
            total,
            detected,
            subset_percent,
        },
        empty,
    )
}

/// Thresholds for the `cells` of one group, from the metric `values` of every cell. Thresholds
/// are on the rule's transformed scale.
fn outlier_thresholds(values: &[f64], cells: &[usize], rule: OutlierRule, nmads: f64) -> (Option<f64>, Option<f64>) {
    let xs = cells.iter().map(|&c| rule.transform(values[c])).collect::<Vec<_>>();
    let Some((center, mad)) = median_mad(&xs) else {
        return (None, None);
    };
    let spread = nmads * MAD_SCALE * mad;
    let lower = matches!(rule.direction, Direction::Lower | Direction::Both).then_some(center - spread);
    let upper = matches!(rule.direction, Direction::Higher | Direction::Both).then_some(center + spread);
    (lower, upper)
}

/// Discard low quality cells. Cells without any counts are always discarded; the others are
/// discarded when a metric is an outlier relative to the cells of the same batch.
pub fn qc_filter(ds: &Dataset, params: &QcParams) -> Result<(Dataset, QcReport), Error> {
    ds.check_stage(Stage::QcFiltered)?;
    if !(params.nmads > 0.0) {
        return Err(PipelineError::InvalidParameter(format!("nmads must be positive, got {}", params.nmads)).into());
    }

    let (metrics, empty_subsets) = qc_metrics(ds, &params.subsets);
    let n = ds.n_cells();

    let groups = match ds.batch_blocks() {
        Some(blocks) if params.per_batch && blocks.len() > 1 => blocks,
        _ => LabelClass::from_item_labels(&vec![""; n]),
    };
    let per_batch = groups.len() > 1;

    let mut named = vec![
        (
            TOTAL.to_string(),
            metrics.total.iter().map(|&v| v as f64).collect::<Vec<_>>(),
            params.total_rule,
        ),
        (
            DETECTED.to_string(),
            metrics.detected.iter().map(|&v| v as f64).collect(),
            params.detected_rule,
        ),
    ];
    for (name, pct) in &metrics.subset_percent {
        named.push((format!("pct_{name}"), pct.clone(), params.subset_rule));
    }

    let mut discard = metrics.total.iter().map(|&t| t == 0).collect::<Vec<_>>();
    let mut reasons = BTreeMap::new();
    reasons.insert(ZERO_TOTAL.to_string(), discard.iter().filter(|&&d| d).count());

    let mut thresholds = Vec::new();
    for (metric, values, rule) in &named {
        let mut failed = 0;
        for (label, members) in groups.iter() {
            let cells = members
                .iter()
                .copied()
                .filter(|&c| metrics.total[c] > 0)
                .collect::<Vec<_>>();
            let (lower, upper) = outlier_thresholds(values, &cells, *rule, params.nmads);
            // compare on the transformed scale, so a zero MAD never discards the median cell
            for &c in &cells {
                let x = rule.transform(values[c]);
                let low = lower.is_some_and(|l| x < l);
                let high = upper.is_some_and(|u| x > u);
                if low || high {
                    failed += 1;
                    discard[c] = true;
                }
            }
            thresholds.push(Threshold {
                metric: metric.clone(),
                batch: per_batch.then(|| label.to_string()),
                lower: lower.map(|l| rule.untransform(l)),
                upper: upper.map(|u| rule.untransform(u)),
            });
        }
        reasons.insert(metric.clone(), failed);
    }

    let kept = (0..n).filter(|&c| !discard[c]).collect::<Vec<_>>();
    info!("QC retained {} of {} cells", kept.len(), n);

    let mut out = ds.select_cells(&kept)?.enter(Stage::QcFiltered)?;
    for subset in empty_subsets {
        out.warn(PipelineError::EmptyFeatureSubset { subset });
    }

    Ok((
        out,
        QcReport {
            metrics,
            thresholds,
            discard,
            reasons,
        },
    ))
}
