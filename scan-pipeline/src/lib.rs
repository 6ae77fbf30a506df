//! # scan-pipeline: Single Cell RNA-seq Analysis Pipeline in Rust

#![deny(missing_docs)]
#![deny(warnings)]

/// Batch integration
pub mod batch;

/// kNN graph and Louvain clustering
pub mod cluster;

/// Dimensionality reduction methods
pub mod dim_red;

/// PCA and UMAP embedding
pub mod embed;

/// Highly variable feature selection
pub mod hvg;

/// Marker detection by differential expression
pub mod markers;

/// Nearest-neighbor search
pub mod nn;

/// Count matrix normalization methods
pub mod normalization;

/// Stage runner
pub mod pipeline;

/// Quality control of cells
pub mod qc;

/// Robust statistics helpers
pub mod stats;

pub use pipeline::{Pipeline, PipelineConfig, PipelineOutput};
