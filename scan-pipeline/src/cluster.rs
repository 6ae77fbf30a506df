//! Graph-based clustering: a k-nearest-neighbor graph over an embedding, partitioned by Louvain.

use crate::embed::resolve_seed;
use crate::nn::knn;
use anyhow::Error;
use log::info;
use louvain::objective::modularity;
use louvain::{Clustering, Louvain, Network};
use ndarray::{s, Array2};
use scan_types::{Dataset, PipelineError, Stage, PCA, UMAP};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

/// Edge weighting of the neighbor graph
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Similarity {
    /// Unit weight between each cell and its neighbors
    Nn,
    /// Jaccard overlap of the two cells' neighbor sets
    Snn,
}

impl FromStr for Similarity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match s.to_lowercase().as_str() {
            "nn" | "knn" => Similarity::Nn,
            "snn" | "jaccard" => Similarity::Snn,
            _ => return Err(PipelineError::InvalidParameter(format!("unknown similarity '{s}'")).into()),
        })
    }
}

/// Clusterer parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Cell-aligned representation to cluster
    pub use_rep: String,
    /// Use only the leading columns of the representation
    pub n_dims: Option<usize>,
    /// Neighbors per cell; chosen from the number of cells when absent
    pub k: Option<usize>,
    /// Graph edge weighting
    pub similarity: Similarity,
    /// Louvain resolution, larger gives more clusters
    pub resolution: f64,
    /// Random seed. Without one, results differ between runs.
    pub seed: Option<u64>,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            use_rep: PCA.to_string(),
            n_dims: None,
            k: None,
            similarity: Similarity::Snn,
            resolution: louvain::louvain::DEFAULT_RESOLUTION,
            seed: Some(0),
        }
    }
}

/// Outcome of the clustering
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusterReport {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cells per cluster, largest first
    pub sizes: Vec<usize>,
    /// Modularity of the partition at the requested resolution
    pub modularity: f64,
    /// Neighbors per cell used for the graph
    pub k: usize,
    /// Seed used, drawn from entropy when none was given
    pub seed: u64,
}

/// Neighbor count used when none is given: `round(-230 + 120 log10(n))`, at least 10 and at
/// most `n - 1`.
pub fn default_k(n_cells: usize) -> usize {
    let k = (-230.0 + 120.0 * (n_cells as f64).log10()).round().max(10.0) as usize;
    k.min(n_cells.saturating_sub(1)).max(1)
}

/// Undirected graph from a neighbor list, as produced by `knn`.
pub fn neighbor_graph(neighbors: &Array2<usize>, similarity: Similarity) -> Network {
    let n = neighbors.nrows();
    let sets = neighbors
        .outer_iter()
        .map(|row| row.iter().copied().filter(|&j| j != usize::MAX).collect::<HashSet<_>>())
        .collect::<Vec<_>>();

    let mut edges = Vec::new();
    for (i, row) in neighbors.outer_iter().enumerate() {
        for &j in row.iter().filter(|&&j| j != usize::MAX) {
            let w = match similarity {
                Similarity::Nn => 1.0,
                Similarity::Snn => {
                    let shared = sets[i].intersection(&sets[j]).count();
                    let union = sets[i].len() + sets[j].len() - shared;
                    if union == 0 {
                        0.0
                    } else {
                        shared as f64 / union as f64
                    }
                }
            };
            // zero weight edges are dropped by the network
            edges.push((i, j, w));
        }
    }
    Network::from_edges(n, edges)
}

fn bincount(values: &[usize]) -> BTreeMap<usize, usize> {
    let mut res = BTreeMap::default();
    for &v in values {
        *res.entry(v).or_insert(0) += 1;
    }
    res
}

/// Relabel a clustering from greatest cluster size to least. Equal sizes keep their label order.
pub fn relabel_by_size(mut labels: Vec<usize>) -> Vec<usize> {
    let mut hist = bincount(&labels).into_iter().collect::<Vec<_>>();
    hist.sort_by(|(_, x), (_, y)| y.cmp(x));
    let map = hist
        .into_iter()
        .enumerate()
        .map(|(i, j)| (j.0, i))
        .collect::<HashMap<_, _>>();
    for x in labels.iter_mut() {
        *x = map[x];
    }
    labels
}

/// Cluster the cells on `params.use_rep` and write the labels to `CellMeta.cluster`.
pub fn cluster(ds: &Dataset, params: &ClusterParams) -> Result<(Dataset, ClusterReport), Error> {
    ds.check_stage(Stage::Clustered)?;
    if params.use_rep == UMAP {
        return Err(PipelineError::InvalidParameter("UMAP is for display only and cannot be clustered".into()).into());
    }
    if !(params.resolution > 0.0) {
        return Err(PipelineError::InvalidParameter(format!("resolution must be positive, got {}", params.resolution)).into());
    }
    let n_cells = ds.n_cells();
    if n_cells < 2 {
        return Err(PipelineError::InvalidParameter(format!("cannot cluster {n_cells} cell(s)")).into());
    }

    let rep = ds.require(&params.use_rep)?.by_cell();
    let n_dims = params.n_dims.unwrap_or(rep.ncols());
    if n_dims == 0 || n_dims > rep.ncols() {
        return Err(PipelineError::InvalidParameter(format!(
            "{} has {} dimensions, {} requested",
            params.use_rep,
            rep.ncols(),
            n_dims
        ))
        .into());
    }
    let points = rep.slice(s![.., ..n_dims]);

    let k = match params.k {
        Some(0) => return Err(PipelineError::InvalidParameter("k must be positive".into()).into()),
        Some(k) => k.min(n_cells - 1),
        None => default_k(n_cells),
    };

    let mut out = ds.clone();
    let seed = resolve_seed(&mut out, params.seed, Stage::Clustered);

    info!("clustering {} cells on {} ({} dims), k = {}", n_cells, params.use_rep, n_dims, k);
    let neighbors = knn(&points, k);
    let network = neighbor_graph(&neighbors, params.similarity);
    let clustering = Louvain::new(params.resolution, seed).run(&network);

    let labels = relabel_by_size(clustering.into_labels());
    let q = modularity(params.resolution, &network, &Clustering::new_from_labels(&labels));
    let sizes = bincount(&labels).into_values().collect::<Vec<_>>();
    info!("found {} clusters, modularity {:.3}", sizes.len(), q);

    for (cell, &label) in out.cells_mut().iter_mut().zip(&labels) {
        cell.cluster = Some(label);
    }
    let out = out.enter(Stage::Clustered)?;

    Ok((
        out,
        ClusterReport {
            n_clusters: sizes.len(),
            sizes,
            modularity: q,
            k,
            seed,
        },
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::{array, Array2};
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use scan_types::Derived;

    /// An embedded dataset whose PCA holds four separated blobs of 15, 10, 12 and 8 cells
    fn embedded() -> Dataset {
        let mut rng = Pcg64Mcg::seed_from_u64(2);
        let sizes = [15, 10, 12, 8];
        let n = sizes.iter().sum::<usize>();
        let mut pca = Array2::random_using((n, 4), Normal::new(0.0, 0.5).unwrap(), &mut rng);
        let mut start = 0;
        for (b, size) in sizes.iter().enumerate() {
            for i in start..start + size {
                pca[(i, b)] += 20.0;
            }
            start += size;
        }
        let counts = Array2::<u32>::ones((5, n));
        let mut ds = Dataset::from_dense_unannotated(counts.view()).unwrap();
        for stage in [Stage::QcFiltered, Stage::Normalized, Stage::FeatureSelected, Stage::Embedded] {
            ds = ds.enter(stage).unwrap();
        }
        ds.with_derived(PCA, Derived::Cells(pca)).unwrap()
    }

    #[test]
    fn test_default_k() {
        assert_eq!(default_k(1000), 130);
        assert_eq!(default_k(100), 10);
        assert_eq!(default_k(50), 10);
        assert_eq!(default_k(8), 7);
        assert_eq!(default_k(2), 1);
    }

    #[test]
    fn test_relabel_by_size() {
        assert_eq!(relabel_by_size(vec![3, 1, 1, 2, 2, 2]), vec![2, 1, 1, 0, 0, 0]);
        // ties keep label order
        assert_eq!(relabel_by_size(vec![5, 4, 4, 5]), vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_snn_weights() {
        let neighbors = array![[1, 2], [0, 2], [0, 1], [0, 1]];
        let net = neighbor_graph(&neighbors, Similarity::Snn);
        // {1, 2} vs {0, 2} share one of three
        let w01 = net.neighbors(0).find(|&(j, _)| j == 1).map(|(_, w)| w);
        assert_eq!(w01, Some(1.0 / 3.0));
        // 2 and 3 are not neighbors of each other
        assert!(net.neighbors(2).all(|(j, _)| j != 3));

        let nn = neighbor_graph(&neighbors, Similarity::Nn);
        assert!(nn.neighbors(3).all(|(_, w)| w == 1.0));

        // disjoint neighbor sets give no edge
        let disjoint = neighbor_graph(&array![[1], [2], [1]], Similarity::Snn);
        assert_eq!(disjoint.neighbors(0).count(), 0);
    }

    #[test]
    fn test_separated_blobs() {
        let ds = embedded();
        let params = ClusterParams {
            k: Some(7),
            ..ClusterParams::default()
        };
        let (out, report) = cluster(&ds, &params).unwrap();
        out.check_alignment().unwrap();
        assert_eq!(out.stage(), Stage::Clustered);
        assert_eq!(report.n_clusters, 4);
        assert_eq!(report.sizes, vec![15, 12, 10, 8]);
        assert!(report.modularity > 0.5);

        let labels = out.cluster_labels().unwrap();
        assert!(labels[..15].iter().all(|&l| l == 0));
        assert!(labels[15..25].iter().all(|&l| l == 2));
        assert!(labels[25..37].iter().all(|&l| l == 1));
        assert!(labels[37..].iter().all(|&l| l == 3));

        let (again, _) = cluster(&ds, &params).unwrap();
        assert_eq!(again.cluster_labels(), out.cluster_labels());
    }

    #[test]
    fn test_k_clamped_to_cells() {
        let params = ClusterParams {
            k: Some(500),
            ..ClusterParams::default()
        };
        let (out, report) = cluster(&embedded(), &params).unwrap();
        assert_eq!(report.k, 44);
        assert_eq!(report.sizes.iter().sum::<usize>(), 45);
        out.check_alignment().unwrap();
    }

    #[test]
    fn test_rejects_umap_and_bad_dims() {
        let ds = embedded();
        let umap = ClusterParams {
            use_rep: UMAP.to_string(),
            ..ClusterParams::default()
        };
        assert!(matches!(
            cluster(&ds, &umap).unwrap_err().downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidParameter(_))
        ));
        let dims = ClusterParams {
            n_dims: Some(9),
            ..ClusterParams::default()
        };
        assert!(cluster(&ds, &dims).is_err());
        let missing = ClusterParams {
            use_rep: "corrected".to_string(),
            ..ClusterParams::default()
        };
        assert!(matches!(
            cluster(&ds, &missing).unwrap_err().downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingRepresentation(_))
        ));
    }

    #[test]
    fn test_missing_seed_is_recorded() {
        let params = ClusterParams {
            k: Some(5),
            seed: None,
            ..ClusterParams::default()
        };
        let (out, _) = cluster(&embedded(), &params).unwrap();
        assert_eq!(
            out.diagnostics(),
            &[PipelineError::NonDeterministicResult { stage: Stage::Clustered }]
        );
    }
}
