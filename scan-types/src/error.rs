use crate::stage::Stage;
use std::fmt::Display;

/// Conditions raised by pipeline stages. Fatal conditions abort the stage and are returned as
/// errors; the others are logged and recorded in the produced dataset's diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Aligned structures disagree in length
    InputShapeMismatch {
        /// Which structure is misaligned
        what: String,
        /// Expected length
        expected: usize,
        /// Observed length
        actual: usize,
    },
    /// A named QC feature subset matched no features; its metric is skipped
    EmptyFeatureSubset {
        /// Subset name
        subset: String,
    },
    /// A cell reached normalization with no counts
    ZeroTotalCount {
        /// Cell index
        cell: usize,
        /// Cell barcode
        barcode: String,
    },
    /// A stratification block has too few cells to estimate a variance
    InsufficientBlockSize {
        /// Block label
        block: String,
        /// Number of cells in the block
        cells: usize,
    },
    /// A randomized stage ran without an explicit seed
    NonDeterministicResult {
        /// Stage that was run
        stage: Stage,
    },
    /// Clustering produced fewer than 2 groups, so no markers can be tested
    TooFewGroups {
        /// Number of groups found
        groups: usize,
    },
    /// A stage was requested out of pipeline order
    StageOrder {
        /// Stage the dataset is at
        current: Stage,
        /// Stage that was requested
        requested: Stage,
    },
    /// A derived representation needed by a stage is absent
    MissingRepresentation(String),
    /// A parameter is outside its valid range
    InvalidParameter(String),
}

impl PipelineError {
    /// True for conditions that must abort the current stage.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::EmptyFeatureSubset { .. }
                | PipelineError::InsufficientBlockSize { .. }
                | PipelineError::NonDeterministicResult { .. }
                | PipelineError::TooFewGroups { .. }
        )
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InputShapeMismatch { what, expected, actual } => {
                write!(f, "input shape mismatch: {what} has length {actual}, expected {expected}")
            }
            PipelineError::EmptyFeatureSubset { subset } => {
                write!(f, "feature subset '{subset}' matched no features, skipping its QC metric")
            }
            PipelineError::ZeroTotalCount { cell, barcode } => write!(
                f,
                "cell {cell} ({barcode}) has zero total count, it should have been removed by QC"
            ),
            PipelineError::InsufficientBlockSize { block, cells } => {
                write!(f, "block '{block}' has {cells} cell(s), at least 2 are required")
            }
            PipelineError::NonDeterministicResult { stage } => {
                write!(f, "{stage} stage ran without a seed, results are not reproducible")
            }
            PipelineError::TooFewGroups { groups } => {
                write!(f, "found {groups} group(s), markers need at least 2, no markers reported")
            }
            PipelineError::StageOrder { current, requested } => {
                write!(f, "cannot move from the {current} stage to the {requested} stage")
            }
            PipelineError::MissingRepresentation(name) => write!(f, "derived representation '{name}' is missing"),
            PipelineError::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Error;

    #[test]
    fn test_fatal_kinds() {
        assert!(PipelineError::ZeroTotalCount {
            cell: 0,
            barcode: "AAAC".into()
        }
        .is_fatal());
        assert!(PipelineError::MissingRepresentation("PCA".into()).is_fatal());
        assert!(!PipelineError::EmptyFeatureSubset { subset: "mito".into() }.is_fatal());
        assert!(!PipelineError::NonDeterministicResult { stage: Stage::Embedded }.is_fatal());
        assert!(!PipelineError::TooFewGroups { groups: 1 }.is_fatal());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: Error = PipelineError::StageOrder {
            current: Stage::Raw,
            requested: Stage::Clustered,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "cannot move from the raw stage to the clustered stage"
        );
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::StageOrder { .. })
        ));
    }
}
