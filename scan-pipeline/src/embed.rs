//! Embedding: a PCA of the selected (or batch-corrected) features and, for display only, a
//! UMAP of the PCA.

use crate::dim_red::rand_svd::RandSvd;
use crate::dim_red::Pca;
use anyhow::Error;
use log::{info, warn};
use ndarray::{Array2, Axis};
use rand::Rng;
use scan_types::{Dataset, Derived, PipelineError, Stage, CORRECTED, LOG_NORMALIZED, PCA, UMAP};
use serde::{Deserialize, Serialize};
use umap_rs::Umap;

/// UMAP settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapParams {
    /// Output dimensions
    pub n_dims: usize,
    /// Size of the local neighborhood
    pub n_neighbors: usize,
    /// Minimum distance between embedded points
    pub min_dist: f64,
    /// Scale of the embedded points
    pub spread: f64,
    /// Optimization epochs; chosen from the number of cells when absent
    pub n_epochs: Option<usize>,
    /// Leading PCA components used as input, all when absent
    pub n_pcs: Option<usize>,
}

impl Default for UmapParams {
    fn default() -> Self {
        UmapParams {
            n_dims: 2,
            n_neighbors: 30,
            min_dist: 0.3,
            spread: 1.0,
            n_epochs: None,
            n_pcs: None,
        }
    }
}

/// Embedder parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedParams {
    /// Number of principal components
    pub n_components: usize,
    /// Scale each feature to unit variance before the PCA
    pub scale: bool,
    /// Randomized SVD settings; its seed is replaced by `seed`
    pub svd: RandSvd,
    /// Also compute a UMAP of the PCA
    pub umap: Option<UmapParams>,
    /// Random seed. Without one, results differ between runs.
    pub seed: Option<u64>,
}

impl Default for EmbedParams {
    fn default() -> Self {
        EmbedParams {
            n_components: 50,
            scale: false,
            svd: RandSvd::new(),
            umap: Some(UmapParams::default()),
            seed: Some(0),
        }
    }
}

/// Outcome of the embedding
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbedReport {
    /// Number of components computed
    pub n_components: usize,
    /// Fraction of the total variance carried by each component
    pub variance_ratio: Vec<f64>,
    /// Seed used, drawn from entropy when none was given
    pub seed: u64,
    /// Representation the PCA was computed from
    pub input: String,
}

/// The embedding input, cell x feature: `corrected` when present, otherwise the
/// highly variable rows of `logNormalized`.
fn embedding_input(ds: &Dataset) -> Result<(Array2<f64>, &'static str), Error> {
    if let Some(corrected) = ds.derived(CORRECTED) {
        return Ok((corrected.by_cell().to_owned(), CORRECTED));
    }
    let hvg = ds.highly_variable();
    if hvg.is_empty() {
        return Err(PipelineError::InvalidParameter("no highly variable features to embed".to_string()).into());
    }
    let values = ds.require(LOG_NORMALIZED)?.array();
    Ok((values.select(Axis(0), &hvg).reversed_axes(), LOG_NORMALIZED))
}

/// Subtract each column's mean and, optionally, divide by its standard deviation.
fn center(x: &mut Array2<f64>, scale: bool) {
    let n = x.nrows();
    for mut col in x.axis_iter_mut(Axis(1)) {
        let mean = col.sum() / n as f64;
        col -= mean;
        if scale && n > 1 {
            let sd = (col.dot(&col) / (n - 1) as f64).sqrt();
            if sd > 0.0 {
                col /= sd;
            }
        }
    }
}

/// Seed for a randomized stage: the given one, or an entropy seed recorded as a diagnostic.
pub(crate) fn resolve_seed(ds: &mut Dataset, seed: Option<u64>, stage: Stage) -> u64 {
    match seed {
        Some(s) => s,
        None => {
            ds.warn(PipelineError::NonDeterministicResult { stage });
            rand::thread_rng().gen()
        }
    }
}

/// Attach `PCA` (cell x component scores) and, if requested, `UMAP`.
pub fn embed(ds: &Dataset, params: &EmbedParams) -> Result<(Dataset, EmbedReport), Error> {
    ds.check_stage(Stage::Embedded)?;
    let (mut x, input) = embedding_input(ds)?;
    let (n_cells, n_features) = x.dim();

    let max_k = n_cells.min(n_features).saturating_sub(1);
    if max_k == 0 || params.n_components == 0 {
        return Err(PipelineError::InvalidParameter(format!(
            "cannot compute {} components from {} cells x {} features",
            params.n_components, n_cells, n_features
        ))
        .into());
    }
    let k = if params.n_components > max_k {
        warn!(
            "reducing the number of components from {} to {} for {} cells x {} features",
            params.n_components, max_k, n_cells, n_features
        );
        max_k
    } else {
        params.n_components
    };

    let mut out = ds.clone();
    let seed = resolve_seed(&mut out, params.seed, Stage::Embedded);

    center(&mut x, params.scale);
    let total_ss = x.iter().map(|v| v * v).sum::<f64>();
    info!("running PCA on {} ({} cells x {} features), k = {}", input, n_cells, n_features, k);
    let (u, s, _) = params.svd.clone().with_seed(seed).run_pca(&x, k)?;
    let scores = &u * &s;
    let variance_ratio = s
        .iter()
        .map(|v| if total_ss > 0.0 { v * v / total_ss } else { 0.0 })
        .collect();

    if let Some(up) = &params.umap {
        let n_pcs = up.n_pcs.unwrap_or(k).clamp(1, k);
        let umap = Umap::new(up.n_dims, up.min_dist, up.spread, up.n_neighbors, up.n_epochs);
        let coords = umap.fit(scores.slice(ndarray::s![.., ..n_pcs]), seed)?;
        out = out.with_derived(UMAP, Derived::Cells(coords))?;
    }
    let out = out.with_derived(PCA, Derived::Cells(scores))?.enter(Stage::Embedded)?;

    Ok((
        out,
        EmbedReport {
            n_components: k,
            variance_ratio,
            seed,
            input: input.to_string(),
        },
    ))
}
