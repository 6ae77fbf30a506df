//! Highly variable feature selection. The variance of each feature's log-normalized expression
//! is split into a technical part, the mean-variance trend fitted over all features, and a
//! biological remainder; features are ranked by the biological remainder.

use crate::stats::mean_var;
use anyhow::Error;
use log::info;
use ndarray::parallel::prelude::*;
use ndarray::{ArrayView2, Axis};
use scan_types::{Dataset, LabelClass, PipelineError, Stage, LOG_NORMALIZED};
use serde::{Deserialize, Serialize};

/// How many features to retain
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    /// This fraction of all features, rounded
    Proportion(f64),
    /// At most this many features
    TopN(usize),
}

impl Selection {
    /// Number of features retained out of `n_features`.
    pub fn count(&self, n_features: usize) -> Result<usize, Error> {
        match *self {
            Selection::Proportion(p) if (0.0..=1.0).contains(&p) => Ok((p * n_features as f64).round() as usize),
            Selection::Proportion(p) => {
                Err(PipelineError::InvalidParameter(format!("HVG proportion must be within [0, 1], got {p}")).into())
            }
            Selection::TopN(n) => Ok(n.min(n_features)),
        }
    }
}

/// Feature selection parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvgParams {
    /// Retained feature count
    pub selection: Selection,
    /// Fraction of features in each local trend fit
    pub span: f64,
    /// Model each batch separately and average the statistics
    pub block_by_batch: bool,
}

impl Default for HvgParams {
    fn default() -> Self {
        HvgParams {
            selection: Selection::Proportion(0.1),
            span: 0.3,
            block_by_batch: true,
        }
    }
}

/// Per-feature decomposition of the log-expression variance
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VarianceModel {
    /// Mean log-expression
    pub mean: Vec<f64>,
    /// Sample variance
    pub total: Vec<f64>,
    /// Fitted trend value, floored at zero
    pub tech: Vec<f64>,
    /// `total - tech`
    pub bio: Vec<f64>,
    /// Blocks the statistics were averaged over
    pub blocks: Vec<String>,
}

/// Outcome of feature selection
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HvgReport {
    /// Variance decomposition of every feature
    pub variance: VarianceModel,
    /// Retained features, by decreasing biological variance
    pub selected: Vec<usize>,
}

/// Locally weighted linear regression of `y` on `x` evaluated at every `x`. Each fit uses
/// the `span` fraction of points nearest in `x`, weighted by the tricube kernel.
pub fn lowess(x: &[f64], y: &[f64], span: f64) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let q = ((span * n as f64).ceil() as usize).clamp(2.min(n), n);

    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let xs = order.iter().map(|&i| x[i]).collect::<Vec<_>>();
    let ys = order.iter().map(|&i| y[i]).collect::<Vec<_>>();

    let mut fitted = vec![0.0; n];
    let mut lo = 0;
    for i in 0..n {
        let xi = xs[i];
        while lo + q < n && xi - xs[lo] > xs[lo + q] - xi {
            lo += 1;
        }
        let window = lo..lo + q;
        let h = (xi - xs[lo]).max(xs[lo + q - 1] - xi);

        let (mut sw, mut swx, mut swy) = (0.0, 0.0, 0.0);
        let weights = window
            .clone()
            .map(|j| {
                let w = if h > 0.0 {
                    let u = (xs[j] - xi).abs() / h;
                    if u < 1.0 {
                        (1.0 - u * u * u).powi(3)
                    } else {
                        0.0
                    }
                } else {
                    1.0
                };
                sw += w;
                swx += w * xs[j];
                swy += w * ys[j];
                w
            })
            .collect::<Vec<_>>();

        let value = if sw > 0.0 {
            let (mx, my) = (swx / sw, swy / sw);
            let (mut sxx, mut sxy) = (0.0, 0.0);
            for (j, w) in window.zip(&weights) {
                sxx += w * (xs[j] - mx) * (xs[j] - mx);
                sxy += w * (xs[j] - mx) * (ys[j] - my);
            }
            if sxx > 1e-12 * sw * (1.0 + mx * mx) {
                my + sxy / sxx * (xi - mx)
            } else {
                my
            }
        } else {
            ys[i]
        };
        fitted[order[i]] = value;
    }
    fitted
}

/// Mean, variance, technical and biological variance of each row of `values` (feature x cell).
fn model_block(values: ArrayView2<f64>, span: f64) -> [Vec<f64>; 4] {
    let (mean, total): (Vec<f64>, Vec<f64>) = values
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(mean_var)
        .collect::<Vec<_>>()
        .into_iter()
        .unzip();
    let tech = lowess(&mean, &total, span)
        .into_iter()
        .map(|t| t.max(0.0))
        .collect::<Vec<_>>();
    let bio = total.iter().zip(&tech).map(|(v, t)| v - t).collect();
    [mean, total, tech, bio]
}

/// Decompose the variance of `values` (feature x cell) within each block and average the
/// per-block statistics with equal weights.
pub fn model_gene_var(values: ArrayView2<f64>, blocks: &LabelClass, span: f64) -> VarianceModel {
    let n = values.nrows();
    let mut sums = [vec![0.0; n], vec![0.0; n], vec![0.0; n], vec![0.0; n]];
    for (_, members) in blocks.iter() {
        let block = values.select(Axis(1), members);
        let stats = model_block(block.view(), span);
        for (sum, stat) in sums.iter_mut().zip(stats) {
            sum.iter_mut().zip(stat).for_each(|(s, v)| *s += v);
        }
    }
    let k = blocks.len().max(1) as f64;
    let [mean, total, tech, bio] = sums.map(|v| v.into_iter().map(|s| s / k).collect::<Vec<_>>());
    VarianceModel {
        mean,
        total,
        tech,
        bio,
        blocks: blocks.labels.clone(),
    }
}

/// Mark the most variable features of `logNormalized`.
pub fn select_features(ds: &Dataset, params: &HvgParams) -> Result<(Dataset, HvgReport), Error> {
    ds.check_stage(Stage::FeatureSelected)?;
    if !(params.span > 0.0 && params.span <= 1.0) {
        return Err(PipelineError::InvalidParameter(format!("LOWESS span must be within (0, 1], got {}", params.span)).into());
    }
    let n_keep = params.selection.count(ds.n_features())?;
    let values = ds.require(LOG_NORMALIZED)?.array();

    let blocks = match ds.batch_blocks() {
        Some(b) if params.block_by_batch => b,
        _ => LabelClass::from_item_labels(&vec!["all"; ds.n_cells()]),
    };
    let (blocks, dropped) = blocks.retain_min_size(2);
    let mut diagnostics = dropped
        .into_iter()
        .map(|(block, cells)| PipelineError::InsufficientBlockSize { block, cells })
        .collect::<Vec<_>>();
    if blocks.is_empty() {
        let fatal = diagnostics.pop().unwrap_or(PipelineError::InsufficientBlockSize {
            block: "all".to_string(),
            cells: 0,
        });
        return Err(fatal.into());
    }

    let variance = model_gene_var(values.view(), &blocks, params.span);

    let mut ranked = (0..ds.n_features()).collect::<Vec<_>>();
    ranked.sort_by(|&a, &b| variance.bio[b].total_cmp(&variance.bio[a]));
    ranked.truncate(n_keep);
    info!(
        "selected {} of {} features over {} block(s)",
        ranked.len(),
        ds.n_features(),
        blocks.len()
    );

    let mut out = ds.clone();
    for f in out.features_mut() {
        f.highly_variable = false;
    }
    for &i in &ranked {
        out.features_mut()[i].highly_variable = true;
    }
    for d in diagnostics {
        out.warn(d);
    }
    let out = out.enter(Stage::FeatureSelected)?;
    Ok((
        out,
        HvgReport {
            variance,
            selected: ranked,
        },
    ))
}
