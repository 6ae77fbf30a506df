//! # tools: file loaders for the scan-pipeline command line

#![deny(missing_docs)]
#![deny(warnings)]

/// MTX and TSV loading routines
pub mod mtx;
