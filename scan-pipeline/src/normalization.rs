use crate::stats::median;
use anyhow::{bail, Error};
use log::info;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Axis};
use scan_types::{CountMatrix, Dataset, Derived, PipelineError, Stage, LOG_NORMALIZED};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-cell size factor scheme for a feature-barcode UMI count matrix
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SizeFactorMethod {
    /// scran style library size factors: the cell's total count over the mean total count
    LibrarySize,
    /// Cell Ranger style: the cell's total count over the median total count
    Median,
    /// Seurat style: the cell's total count over a fixed target, 10,000 in Seurat
    Target(f64),
    /// Size factors given explicitly, one per cell
    SizeFactors(Vec<f64>),
}

impl FromStr for SizeFactorMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "librarysize" => Ok(SizeFactorMethod::LibrarySize),
            "median" | "cellranger" => Ok(SizeFactorMethod::Median),
            "seuratlog" => Ok(SizeFactorMethod::Target(10_000.0)),
            _ => bail!("Normalization not recognized: {}", s),
        }
    }
}

/// Base of logarithm used by log_normalize
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogBase {
    /// ln
    E,
    /// log2
    Two,
    /// log10
    Ten,
}

impl LogBase {
    /// Logarithm of `x` in this base
    pub fn log(self, x: f64) -> f64 {
        match self {
            LogBase::E => x.ln(),
            LogBase::Two => x.log2(),
            LogBase::Ten => x.log10(),
        }
    }

    /// This base raised to `x`
    pub fn pow(self, x: f64) -> f64 {
        match self {
            LogBase::E => x.exp(),
            LogBase::Two => x.exp2(),
            LogBase::Ten => 10f64.powf(x),
        }
    }
}

/// Normalizer parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    /// Size factor scheme
    pub method: SizeFactorMethod,
    /// Base of the log transform
    pub log_base: LogBase,
    /// Added before taking the log
    pub pseudo_count: f64,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        NormalizeParams {
            method: SizeFactorMethod::LibrarySize,
            log_base: LogBase::Two,
            pseudo_count: 1.0,
        }
    }
}

/// Size factor of each cell, given the cells' total counts. Totals must be positive.
pub fn size_factors(totals: &[u64], method: &SizeFactorMethod) -> Result<Vec<f64>, Error> {
    let totals_f = totals.iter().map(|&t| t as f64).collect::<Vec<_>>();
    let reference = match method {
        SizeFactorMethod::LibrarySize => totals_f.iter().sum::<f64>() / (totals_f.len().max(1) as f64),
        SizeFactorMethod::Median => median(&totals_f).map_or(1.0, |m| m.max(1.0)),
        SizeFactorMethod::Target(t) => {
            if !(t.is_finite() && *t > 0.0) {
                return Err(PipelineError::InvalidParameter(format!("target count must be positive, got {t}")).into());
            }
            *t
        }
        SizeFactorMethod::SizeFactors(sf) => {
            if sf.len() != totals.len() {
                return Err(PipelineError::InputShapeMismatch {
                    what: "size factors".to_string(),
                    expected: totals.len(),
                    actual: sf.len(),
                }
                .into());
            }
            if let Some((i, v)) = sf.iter().enumerate().find(|(_, v)| !(v.is_finite() && **v > 0.0)) {
                return Err(PipelineError::InvalidParameter(format!("size factor of cell {i} is {v}")).into());
            }
            return Ok(sf.clone());
        }
    };
    Ok(totals_f.iter().map(|t| t / reference).collect())
}

/// Dense feature x cell matrix of `log_b(count / size_factor + pseudo_count)`.
pub fn log_normalize(counts: &CountMatrix, size_factors: &[f64], base: LogBase, pseudo_count: f64) -> Array2<f64> {
    let zero = base.log(pseudo_count);
    let mut out = Array2::from_elem((counts.rows(), counts.cols()), zero);
    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .enumerate()
        .for_each(|(j, mut col)| {
            if let Some(cell) = counts.outer_view(j) {
                for (row, &v) in cell.iter() {
                    col[row] = base.log(v as f64 / size_factors[j] + pseudo_count);
                }
            }
        });
    out
}

/// Recover the count behind a log-normalized value
pub fn denormalize(value: f64, size_factor: f64, base: LogBase, pseudo_count: f64) -> f64 {
    (base.pow(value) - pseudo_count) * size_factor
}

/// Attach `logNormalized` and per-cell size factors. Raw counts are left untouched.
/// Returns the normalized dataset and the size factors.
pub fn normalize(ds: &Dataset, params: &NormalizeParams) -> Result<(Dataset, Vec<f64>), Error> {
    ds.check_stage(Stage::Normalized)?;
    if !(params.pseudo_count.is_finite() && params.pseudo_count > 0.0) {
        return Err(PipelineError::InvalidParameter(format!(
            "pseudo count must be positive, got {}",
            params.pseudo_count
        ))
        .into());
    }

    let totals = ds.cell_totals();
    if let Some(cell) = totals.iter().position(|&t| t == 0) {
        return Err(PipelineError::ZeroTotalCount {
            cell,
            barcode: ds.cells()[cell].barcode.clone(),
        }
        .into());
    }

    let sf = size_factors(&totals, &params.method)?;
    info!(
        "log-normalizing {} features x {} cells with {:?} size factors",
        ds.n_features(),
        ds.n_cells(),
        params.method
    );
    let values = log_normalize(ds.counts(), &sf, params.log_base, params.pseudo_count);

    let mut out = ds.clone().with_derived(LOG_NORMALIZED, Derived::Features(values))?;
    for (cell, &f) in out.cells_mut().iter_mut().zip(&sf) {
        cell.size_factor = Some(f);
    }
    Ok((out.enter(Stage::Normalized)?, sf))
}
