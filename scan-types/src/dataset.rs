use crate::derived::Derived;
use crate::error::PipelineError;
use crate::label_class::LabelClass;
use crate::metadata::{CellMeta, CellOrigin, FeatureMeta};
use crate::stage::Stage;
use anyhow::Error;
use log::{info, warn};
use ndarray::ArrayView2;
use sprs::{CsMat, TriMat};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Feature x cell UMI counts, stored column (cell) major.
pub type CountMatrix = CsMat<u32>;

/// The dataset container threaded through the pipeline: counts, per-feature and per-cell
/// metadata, and named derived representations, all kept aligned on the cell and feature axes.
///
/// Counts and derived arrays are shared behind `Arc`, so each stage can cheaply produce a new
/// version of the dataset and leave its input untouched.
#[derive(Clone, Debug)]
pub struct Dataset {
    counts: Arc<CountMatrix>,
    features: Vec<FeatureMeta>,
    cells: Vec<CellMeta>,
    derived: BTreeMap<String, Arc<Derived>>,
    stage: Stage,
    diagnostics: Vec<PipelineError>,
}

fn mismatch(what: &str, expected: usize, actual: usize) -> Error {
    PipelineError::InputShapeMismatch {
        what: what.to_string(),
        expected,
        actual,
    }
    .into()
}

impl Dataset {
    /// Create a `Raw` dataset. `counts` is feature x cell.
    pub fn new(counts: CountMatrix, features: Vec<FeatureMeta>, mut cells: Vec<CellMeta>) -> Result<Dataset, Error> {
        let counts = if counts.is_csc() {
            counts
        } else {
            counts.to_other_storage()
        };
        if features.len() != counts.rows() {
            return Err(mismatch("feature metadata", counts.rows(), features.len()));
        }
        if cells.len() != counts.cols() {
            return Err(mismatch("cell metadata", counts.cols(), cells.len()));
        }
        for (i, cell) in cells.iter_mut().enumerate() {
            cell.origin.get_or_insert(CellOrigin { batch: 0, index: i });
        }
        Ok(Dataset {
            counts: Arc::new(counts),
            features,
            cells,
            derived: BTreeMap::new(),
            stage: Stage::Raw,
            diagnostics: Vec::new(),
        })
    }

    /// Create a `Raw` dataset from a dense feature x cell count array.
    pub fn from_dense(counts: ArrayView2<u32>, features: Vec<FeatureMeta>, cells: Vec<CellMeta>) -> Result<Dataset, Error> {
        let (rows, cols) = counts.dim();
        let mut tri = TriMat::new((rows, cols));
        for ((r, c), &v) in counts.indexed_iter() {
            if v > 0 {
                tri.add_triplet(r, c, v);
            }
        }
        Dataset::new(tri.to_csc(), features, cells)
    }

    /// Create a `Raw` dataset from dense counts with generated metadata: features `F0..` and
    /// barcodes `C0..`.
    pub fn from_dense_unannotated(counts: ArrayView2<u32>) -> Result<Dataset, Error> {
        let (rows, cols) = counts.dim();
        let features = (0..rows)
            .map(|i| FeatureMeta::new(format!("F{i}"), format!("F{i}")))
            .collect();
        let cells = (0..cols).map(|j| CellMeta::new(format!("C{j}"))).collect();
        Dataset::from_dense(counts, features, cells)
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Raw counts, feature x cell
    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    /// Feature metadata
    pub fn features(&self) -> &[FeatureMeta] {
        &self.features
    }

    /// Mutable feature metadata. The slice cannot change length, so alignment is preserved.
    pub fn features_mut(&mut self) -> &mut [FeatureMeta] {
        &mut self.features
    }

    /// Cell metadata
    pub fn cells(&self) -> &[CellMeta] {
        &self.cells
    }

    /// Mutable cell metadata. The slice cannot change length, so alignment is preserved.
    pub fn cells_mut(&mut self) -> &mut [CellMeta] {
        &mut self.cells
    }

    /// Current pipeline stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Non-fatal conditions raised while producing this dataset
    pub fn diagnostics(&self) -> &[PipelineError] {
        &self.diagnostics
    }

    /// Log a non-fatal condition and record it on the dataset.
    pub fn warn(&mut self, diagnostic: PipelineError) {
        warn!("{diagnostic}");
        self.diagnostics.push(diagnostic);
    }

    /// Fail with `StageOrder` unless the dataset may move to `next`.
    pub fn check_stage(&self, next: Stage) -> Result<(), Error> {
        if next.can_enter_from(self.stage) {
            Ok(())
        } else {
            Err(PipelineError::StageOrder {
                current: self.stage,
                requested: next,
            }
            .into())
        }
    }

    /// Move to stage `next`, failing with `StageOrder` if the transition is not allowed.
    pub fn enter(mut self, next: Stage) -> Result<Dataset, Error> {
        self.check_stage(next)?;
        info!("dataset of {} features x {} cells is now {}", self.n_features(), self.n_cells(), next);
        self.stage = next;
        Ok(self)
    }

    /// A derived representation, if present
    pub fn derived(&self, name: &str) -> Option<&Derived> {
        self.derived.get(name).map(|d| d.as_ref())
    }

    /// A derived representation, or `MissingRepresentation`
    pub fn require(&self, name: &str) -> Result<&Derived, Error> {
        self.derived(name)
            .ok_or_else(|| PipelineError::MissingRepresentation(name.to_string()).into())
    }

    /// Names of the attached derived representations
    pub fn derived_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.derived.keys().map(String::as_str)
    }

    /// Attach (or replace) a derived representation after checking its alignment.
    pub fn with_derived(mut self, name: &str, derived: Derived) -> Result<Dataset, Error> {
        if derived.n_cells() != self.n_cells() {
            return Err(mismatch(name, self.n_cells(), derived.n_cells()));
        }
        if let Some(n_features) = derived.n_features() {
            if n_features != self.n_features() {
                return Err(mismatch(name, self.n_features(), n_features));
            }
        }
        self.derived.insert(name.to_string(), Arc::new(derived));
        Ok(self)
    }

    /// Verify the axis-alignment invariant across every aligned structure.
    pub fn check_alignment(&self) -> Result<(), Error> {
        if self.counts.rows() != self.features.len() {
            return Err(mismatch("feature metadata", self.counts.rows(), self.features.len()));
        }
        if self.counts.cols() != self.cells.len() {
            return Err(mismatch("cell metadata", self.counts.cols(), self.cells.len()));
        }
        for (name, d) in &self.derived {
            if d.n_cells() != self.n_cells() {
                return Err(mismatch(name, self.n_cells(), d.n_cells()));
            }
            if let Some(n) = d.n_features() {
                if n != self.n_features() {
                    return Err(mismatch(name, self.n_features(), n));
                }
            }
        }
        Ok(())
    }

    /// Total count per cell
    pub fn cell_totals(&self) -> Vec<u64> {
        self.counts
            .outer_iterator()
            .map(|col| col.iter().map(|(_, &v)| v as u64).sum())
            .collect()
    }

    /// Number of features with a non-zero count, per cell
    pub fn detected_features(&self) -> Vec<usize> {
        self.counts
            .outer_iterator()
            .map(|col| col.iter().filter(|(_, &v)| v > 0).count())
            .collect()
    }

    /// Subset cells and features. Every aligned structure (counts, metadata, derived
    /// representations) is subset together; on error nothing is produced.
    /// Cell indices may repeat; feature indices must be distinct.
    pub fn select(&self, cells: &[usize], features: &[usize]) -> Result<Dataset, Error> {
        if let Some(&c) = cells.iter().find(|&&c| c >= self.n_cells()) {
            return Err(mismatch("selected cell index", self.n_cells(), c));
        }
        if let Some(&f) = features.iter().find(|&&f| f >= self.n_features()) {
            return Err(mismatch("selected feature index", self.n_features(), f));
        }

        let mut feature_map = vec![None; self.n_features()];
        for (new, &old) in features.iter().enumerate() {
            if feature_map[old].replace(new).is_some() {
                return Err(PipelineError::InvalidParameter(format!("feature index {old} selected twice")).into());
            }
        }

        let mut tri = TriMat::new((features.len(), cells.len()));
        for (new_cell, &old_cell) in cells.iter().enumerate() {
            if let Some(col) = self.counts.outer_view(old_cell) {
                for (row, &v) in col.iter() {
                    if let Some(new_row) = feature_map[row] {
                        tri.add_triplet(new_row, new_cell, v);
                    }
                }
            }
        }

        let derived = self
            .derived
            .iter()
            .map(|(k, d)| (k.clone(), Arc::new(d.select(cells, features))))
            .collect();

        let out = Dataset {
            counts: Arc::new(tri.to_csc()),
            features: features.iter().map(|&f| self.features[f].clone()).collect(),
            cells: cells.iter().map(|&c| self.cells[c].clone()).collect(),
            derived,
            stage: self.stage,
            diagnostics: self.diagnostics.clone(),
        };
        out.check_alignment()?;
        Ok(out)
    }

    /// Subset cells, keeping every feature.
    pub fn select_cells(&self, cells: &[usize]) -> Result<Dataset, Error> {
        let features = (0..self.n_features()).collect::<Vec<_>>();
        self.select(cells, &features)
    }

    /// Merge separately loaded batches onto a joint cell axis. Every batch must have the same
    /// features in the same order. Cells are labelled with their batch and keep their origin;
    /// derived representations are dropped and the result is `Raw`.
    pub fn concat(batches: Vec<(String, Dataset)>) -> Result<Dataset, Error> {
        let Some((_, first)) = batches.first() else {
            return Err(PipelineError::InvalidParameter("no batches to merge".to_string()).into());
        };
        let features = first.features.iter().map(|f| FeatureMeta {
            highly_variable: false,
            ..f.clone()
        });
        let features = features.collect::<Vec<_>>();

        let mut seen = HashSet::new();
        let mut n_cells = 0;
        let mut nnz = 0;
        for (label, ds) in &batches {
            if !seen.insert(label.as_str()) {
                return Err(PipelineError::InvalidParameter(format!("batch label '{label}' used twice")).into());
            }
            if ds.n_features() != features.len() {
                return Err(mismatch(&format!("features of batch '{label}'"), features.len(), ds.n_features()));
            }
            if ds.features.iter().zip(&features).any(|(a, b)| a.id != b.id) {
                return Err(PipelineError::InvalidParameter(format!(
                    "features of batch '{label}' differ from the first batch"
                ))
                .into());
            }
            n_cells += ds.n_cells();
            nnz += ds.counts.nnz();
        }

        let mut tri = TriMat::with_capacity((features.len(), n_cells), nnz);
        let mut cells = Vec::with_capacity(n_cells);
        for (batch_idx, (label, ds)) in batches.iter().enumerate() {
            for (j, col) in ds.counts.outer_iterator().enumerate() {
                for (row, &v) in col.iter() {
                    tri.add_triplet(row, cells.len(), v);
                }
                cells.push(CellMeta {
                    barcode: ds.cells[j].barcode.clone(),
                    batch: Some(label.clone()),
                    origin: Some(CellOrigin {
                        batch: batch_idx,
                        index: j,
                    }),
                    size_factor: None,
                    cluster: None,
                });
            }
        }
        info!("merged {} batches into {} cells", batches.len(), n_cells);
        Dataset::new(tri.to_csc(), features, cells)
    }

    /// A `Raw` copy of this dataset: derived representations, feature selection, size factors,
    /// cluster labels and diagnostics are cleared. Counts, names, batches and origins are kept.
    pub fn fresh(&self) -> Dataset {
        Dataset {
            counts: self.counts.clone(),
            features: self
                .features
                .iter()
                .map(|f| FeatureMeta {
                    highly_variable: false,
                    ..f.clone()
                })
                .collect(),
            cells: self
                .cells
                .iter()
                .map(|c| CellMeta {
                    size_factor: None,
                    cluster: None,
                    ..c.clone()
                })
                .collect(),
            derived: BTreeMap::new(),
            stage: Stage::Raw,
            diagnostics: Vec::new(),
        }
    }

    /// Assign a batch label to every cell. The origin batch index follows first-seen label order.
    pub fn with_batches<S: AsRef<str>>(mut self, labels: &[S]) -> Result<Dataset, Error> {
        if labels.len() != self.n_cells() {
            return Err(mismatch("batch labels", self.n_cells(), labels.len()));
        }
        let blocks = LabelClass::from_item_labels(labels);
        let label_idx = blocks.item_label_indices()?;
        for (i, (cell, label)) in self.cells.iter_mut().zip(labels).enumerate() {
            cell.batch = Some(label.as_ref().to_string());
            let index = cell.origin.map_or(i, |o| o.index);
            cell.origin = Some(CellOrigin {
                batch: label_idx[i],
                index,
            });
        }
        Ok(self)
    }

    /// Batch label of every cell, or None unless all cells carry one.
    pub fn batch_labels(&self) -> Option<Vec<&str>> {
        self.cells.iter().map(|c| c.batch.as_deref()).collect()
    }

    /// Cells grouped by batch label, or None unless all cells carry one.
    pub fn batch_blocks(&self) -> Option<LabelClass> {
        self.batch_labels().map(|labels| LabelClass::from_item_labels(&labels))
    }

    /// Indices of the features marked highly variable
    pub fn highly_variable(&self) -> Vec<usize> {
        self.features
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.highly_variable.then_some(i))
            .collect()
    }

    /// Cluster label of every cell, or None unless all cells are labelled.
    pub fn cluster_labels(&self) -> Option<Vec<usize>> {
        self.cells.iter().map(|c| c.cluster).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::derived::{LOG_NORMALIZED, PCA};
    use ndarray::{array, Array2};

    fn small() -> Dataset {
        let counts: Array2<u32> = array![[1, 0, 3, 0], [0, 2, 0, 0], [4, 5, 6, 0]];
        Dataset::from_dense_unannotated(counts.view()).unwrap()
    }

    #[test]
    fn test_new_checks_shapes() {
        let counts: Array2<u32> = array![[1, 2], [3, 4]];
        let res = Dataset::from_dense(counts.view(), vec![FeatureMeta::new("a", "a")], vec![]);
        let err = res.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InputShapeMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_totals_and_detected() {
        let ds = small();
        assert_eq!(ds.cell_totals(), vec![5, 7, 9, 0]);
        assert_eq!(ds.detected_features(), vec![2, 2, 2, 0]);
        assert_eq!(ds.cells()[2].origin, Some(CellOrigin { batch: 0, index: 2 }));
    }

    #[test]
    fn test_select_keeps_alignment() {
        let ds = small();
        let norm = Derived::Features(Array2::from_shape_fn((3, 4), |(f, c)| (10 * f + c) as f64));
        let pca = Derived::Cells(Array2::from_shape_fn((4, 2), |(c, k)| (c + k) as f64));
        let ds = ds
            .with_derived(LOG_NORMALIZED, norm)
            .unwrap()
            .with_derived(PCA, pca)
            .unwrap();

        let sub = ds.select(&[2, 0], &[2, 0]).unwrap();
        sub.check_alignment().unwrap();
        assert_eq!(sub.n_cells(), 2);
        assert_eq!(sub.n_features(), 2);
        assert_eq!(sub.counts().to_dense(), array![[6, 4], [3, 1]]);
        assert_eq!(sub.cells()[0].barcode, "C2");
        assert_eq!(sub.features()[1].id, "F0");
        assert_eq!(
            sub.derived(LOG_NORMALIZED).unwrap().array(),
            &array![[22.0, 20.0], [2.0, 0.0]]
        );
        assert_eq!(sub.derived(PCA).unwrap().array(), &array![[2.0, 3.0], [0.0, 1.0]]);
    }

    #[test]
    fn test_select_rejects_bad_indices() {
        let ds = small();
        assert!(ds.select(&[0, 9], &[0]).is_err());
        assert!(ds.select(&[0], &[0, 0]).is_err());
        assert!(ds.select(&[0], &[5]).is_err());
    }

    #[test]
    fn test_with_derived_rejects_misaligned() {
        let ds = small();
        let bad = Derived::Cells(Array2::zeros((3, 2)));
        assert!(ds.clone().with_derived(PCA, bad).is_err());
        let bad = Derived::Features(Array2::zeros((2, 4)));
        assert!(ds.with_derived(LOG_NORMALIZED, bad).is_err());
    }

    #[test]
    fn test_concat() {
        let a = small();
        let b = small().select_cells(&[1, 2]).unwrap();
        let merged = Dataset::concat(vec![("A".to_string(), a), ("B".to_string(), b)]).unwrap();
        assert_eq!(merged.n_cells(), 6);
        assert_eq!(merged.stage(), Stage::Raw);
        assert_eq!(merged.batch_labels().unwrap(), vec!["A", "A", "A", "A", "B", "B"]);
        assert_eq!(merged.cells()[5].origin, Some(CellOrigin { batch: 1, index: 1 }));
        assert_eq!(merged.cell_totals(), vec![5, 7, 9, 0, 7, 9]);

        let blocks = merged.batch_blocks().unwrap();
        assert_eq!(blocks.get_indices("B"), Some(&[4, 5][..]));
    }

    #[test]
    fn test_concat_rejects_mismatched_features() {
        let a = small();
        let b = small().select(&[0, 1], &[1, 0, 2]).unwrap();
        assert!(Dataset::concat(vec![("A".to_string(), a.clone()), ("B".to_string(), b)]).is_err());
        assert!(Dataset::concat(vec![("A".to_string(), a.clone()), ("A".to_string(), a)]).is_err());
        assert!(Dataset::concat(vec![]).is_err());
    }

    #[test]
    fn test_stage_transitions() {
        let ds = small();
        let err = ds.clone().enter(Stage::Normalized).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::StageOrder { .. })
        ));

        let qc = ds.enter(Stage::QcFiltered).unwrap();
        assert!(qc.clone().enter(Stage::QcFiltered).is_err());
        assert_eq!(qc.fresh().stage(), Stage::Raw);
    }

    #[test]
    fn test_with_batches() {
        let ds = small().with_batches(&["x", "y", "x", "y"]).unwrap();
        assert_eq!(ds.cells()[3].origin, Some(CellOrigin { batch: 1, index: 3 }));
        assert_eq!(ds.batch_blocks().unwrap().get_indices("x"), Some(&[0, 2][..]));
        assert!(small().with_batches(&["x"]).is_err());
        assert!(small().batch_blocks().is_none());
    }
}
