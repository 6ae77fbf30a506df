//! Uniform Manifold Approximation and Projection (UMAP) for 2-D visualization of cell embeddings
#![deny(warnings)]

pub mod curve_fit;
pub mod fuzzy;
pub mod knn;
pub mod optimize;
pub mod umap;

pub use crate::umap::Umap;
