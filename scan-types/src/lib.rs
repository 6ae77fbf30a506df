//! # scan-types: the dataset container shared by the scan-pipeline crates

#![deny(missing_docs)]
#![deny(warnings)]

/// The aligned counts + metadata + derived representations container
pub mod dataset;

/// Derived representations and their well-known names
pub mod derived;

/// Pipeline conditions, fatal and non-fatal
pub mod error;

/// Grouping of cells by label
pub mod label_class;

/// Per-feature and per-cell metadata
pub mod metadata;

/// Pipeline stages
pub mod stage;

pub use dataset::{CountMatrix, Dataset};
pub use derived::{Derived, CORRECTED, LOG_NORMALIZED, PCA, UMAP};
pub use error::PipelineError;
pub use label_class::LabelClass;
pub use metadata::{CellMeta, CellOrigin, FeatureMeta, MITO_FLAG, SPIKE_IN_FLAG};
pub use stage::Stage;
