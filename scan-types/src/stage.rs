use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Position of a dataset in the analysis pipeline. Transitions only move forward; re-running a
/// stage requires a fresh copy of the dataset (see `Dataset::fresh`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Stage {
    /// Counts as loaded
    #[default]
    Raw,
    /// Low quality cells removed
    QcFiltered,
    /// `logNormalized` attached
    Normalized,
    /// Highly variable features marked
    FeatureSelected,
    /// `corrected` attached
    BatchCorrected,
    /// `PCA` (and optionally `UMAP`) attached
    Embedded,
    /// Cluster labels assigned
    Clustered,
}

impl Stage {
    /// Stages from which `self` may be entered.
    pub fn predecessors(self) -> &'static [Stage] {
        use Stage::*;
        match self {
            Raw => &[],
            QcFiltered => &[Raw],
            Normalized => &[QcFiltered],
            FeatureSelected => &[Normalized],
            BatchCorrected => &[FeatureSelected],
            Embedded => &[FeatureSelected, BatchCorrected],
            Clustered => &[Embedded],
        }
    }

    /// True if a dataset currently at `from` may move to `self`.
    pub fn can_enter_from(self, from: Stage) -> bool {
        self.predecessors().contains(&from)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Raw => "raw",
            Stage::QcFiltered => "qc-filtered",
            Stage::Normalized => "normalized",
            Stage::FeatureSelected => "feature-selected",
            Stage::BatchCorrected => "batch-corrected",
            Stage::Embedded => "embedded",
            Stage::Clustered => "clustered",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_linear_order() {
        assert!(Stage::QcFiltered.can_enter_from(Stage::Raw));
        assert!(Stage::Embedded.can_enter_from(Stage::FeatureSelected));
        assert!(Stage::Embedded.can_enter_from(Stage::BatchCorrected));
        assert!(!Stage::Embedded.can_enter_from(Stage::Normalized));
        assert!(!Stage::QcFiltered.can_enter_from(Stage::QcFiltered));
        assert!(!Stage::Normalized.can_enter_from(Stage::Clustered));
        assert!(!Stage::Raw.can_enter_from(Stage::Clustered));
    }
}
