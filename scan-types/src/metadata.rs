use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Flag carried by mitochondrial features
pub const MITO_FLAG: &str = "mito";

/// Flag carried by spike-in control features
pub const SPIKE_IN_FLAG: &str = "spike-in";

/// Per-feature annotation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeatureMeta {
    /// Stable feature identifier, e.g. an Ensembl id
    pub id: String,
    /// Display name, e.g. a gene symbol
    pub name: String,
    /// Free-form flags such as `MITO_FLAG`
    pub flags: BTreeSet<String>,
    /// Set by feature selection
    pub highly_variable: bool,
}

impl FeatureMeta {
    /// A feature with no flags.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> FeatureMeta {
        FeatureMeta {
            id: id.into(),
            name: name.into(),
            ..FeatureMeta::default()
        }
    }

    /// Add a flag.
    pub fn with_flag(mut self, flag: impl Into<String>) -> FeatureMeta {
        self.flags.insert(flag.into());
        self
    }

    /// True if the feature carries `flag`.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// Where a cell came from: the batch it was merged from and its index in that batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CellOrigin {
    /// Index of the source batch
    pub batch: usize,
    /// Index of the cell within its source
    pub index: usize,
}

/// Per-cell annotation, filled in progressively by the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct CellMeta {
    /// Cell barcode
    pub barcode: String,
    /// Batch (or individual) label
    pub batch: Option<String>,
    /// Provenance; filled in by `Dataset::new` when absent
    pub origin: Option<CellOrigin>,
    /// Set by normalization
    pub size_factor: Option<f64>,
    /// Set by clustering; 0 is the largest cluster
    pub cluster: Option<usize>,
}

impl CellMeta {
    /// A cell with only a barcode.
    pub fn new(barcode: impl Into<String>) -> CellMeta {
        CellMeta {
            barcode: barcode.into(),
            ..CellMeta::default()
        }
    }

    /// Set the batch label.
    pub fn with_batch(mut self, batch: impl Into<String>) -> CellMeta {
        self.batch = Some(batch.into());
        self
    }
}
