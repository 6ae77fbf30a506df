//! Runs every stage in order on a raw dataset.

use crate::batch::{correct_batches, BatchMethod, MergeStats};
use crate::cluster::{cluster, ClusterParams, ClusterReport};
use crate::embed::{embed, EmbedParams, EmbedReport};
use crate::hvg::{select_features, HvgParams, HvgReport};
use crate::markers::{find_markers, MarkerParams, MarkerReport};
use crate::normalization::{normalize, NormalizeParams};
use crate::qc::{qc_filter, QcParams, QcReport};
use anyhow::{Context, Error};
use log::info;
use scan_types::{Dataset, PipelineError};
use serde::{Deserialize, Serialize};

/// Parameters of every stage. Missing fields take their defaults when read from JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// QC filter
    pub qc: QcParams,
    /// Normalizer
    pub normalize: NormalizeParams,
    /// Feature selection
    pub hvg: HvgParams,
    /// Batch correction, skipped when absent
    pub batch: Option<BatchMethod>,
    /// PCA and UMAP
    pub embed: EmbedParams,
    /// Clustering
    pub cluster: ClusterParams,
    /// Marker detection. Its log base and pseudo-count are taken from `normalize`.
    pub markers: MarkerParams,
}

/// Final dataset and the report of every stage
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    /// Clustered dataset
    pub dataset: Dataset,
    /// QC metrics and thresholds
    pub qc: QcReport,
    /// Variance model and selected features
    pub variance: HvgReport,
    /// Batch merge statistics, when corrected
    pub batches: Option<Vec<MergeStats>>,
    /// Embedding summary
    pub embedding: EmbedReport,
    /// Cluster summary
    pub clusters: ClusterReport,
    /// Markers of each cluster
    pub markers: MarkerReport,
}

/// The full analysis
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    /// Stage parameters
    pub config: PipelineConfig,
}

impl Pipeline {
    /// A pipeline with the given parameters
    pub fn new(config: PipelineConfig) -> Pipeline {
        Pipeline { config }
    }

    /// QC, normalize, select features, optionally correct batches, embed, cluster and find
    /// markers. The input is not modified.
    pub fn run(&self, raw: &Dataset) -> Result<PipelineOutput, Error> {
        let cfg = &self.config;
        info!("running pipeline on {} features x {} cells", raw.n_features(), raw.n_cells());

        let (ds, qc) = qc_filter(raw, &cfg.qc).context("QC filter failed")?;
        info!("QC discarded {} of {} cells", qc.n_discarded(), raw.n_cells());
        let (ds, _) = normalize(&ds, &cfg.normalize).context("normalization failed")?;
        let (mut ds, variance) = select_features(&ds, &cfg.hvg).context("feature selection failed")?;

        let batches = match &cfg.batch {
            Some(method) => {
                let (corrected, merges) = correct_batches(&ds, method).context("batch correction failed")?;
                ds = corrected;
                Some(merges)
            }
            None => None,
        };

        let (ds, embedding) = embed(&ds, &cfg.embed).context("embedding failed")?;
        let (mut ds, clusters) = cluster(&ds, &cfg.cluster).context("clustering failed")?;
        if clusters.n_clusters < 2 {
            ds.warn(PipelineError::TooFewGroups {
                groups: clusters.n_clusters,
            });
        }

        let marker_params = MarkerParams {
            log_base: cfg.normalize.log_base,
            pseudo_count: cfg.normalize.pseudo_count,
            ..cfg.markers.clone()
        };
        let markers = find_markers(&ds, &marker_params).context("marker detection failed")?;

        for d in ds.diagnostics() {
            info!("diagnostic: {d}");
        }
        Ok(PipelineOutput {
            dataset: ds,
            qc,
            variance,
            batches,
            embedding,
            clusters,
            markers,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::batch::Mnn;
    use crate::hvg::Selection;

    #[test]
    fn test_config_from_json() {
        let empty: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, PipelineConfig::default());

        let json = r#"{
            "hvg": { "selection": { "TopN": 200 } },
            "batch": { "Mnn": { "k": 15 } },
            "embed": { "n_components": 20, "umap": null },
            "cluster": { "resolution": 0.8, "similarity": "Nn" }
        }"#;
        let cfg: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.hvg.selection, Selection::TopN(200));
        assert_eq!(cfg.hvg.span, HvgParams::default().span);
        assert_eq!(cfg.batch, Some(BatchMethod::Mnn(Mnn { k: 15, sigma: 1.0 })));
        assert_eq!(cfg.embed.n_components, 20);
        assert!(cfg.embed.umap.is_none());
        assert_eq!(cfg.cluster.resolution, 0.8);

        let centering: PipelineConfig = serde_json::from_str(r#"{ "batch": "Centering" }"#).unwrap();
        assert_eq!(centering.batch, Some(BatchMethod::Centering));

        let text = serde_json::to_string(&cfg).unwrap();
        let back: PipelineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
