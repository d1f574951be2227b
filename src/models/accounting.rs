//! Per-run loss accounting results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Floor applied to a run's total weighted luminosity so loss percentages
/// never divide by zero.
pub const LUMI_EPSILON: f64 = 1e-50;

/// A run whose total luminosity falls below this value carries no usable
/// normalisation (faulty luminosity tag upstream) and is never merged into
/// year statistics.
pub const MIN_MERGEABLE_LUMI: f64 = 1e-40;

/// Processing eligibility of a run, derived by the sign-off gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignoffState {
    /// Run has no end time yet. Excluded.
    Ongoing,
    /// Run ended less than two hours ago; the defect database may not be
    /// fully populated. Excluded, retry later.
    TooRecent,
    /// Corrupted interval data. Excluded.
    Broken,
    /// Earliest unresolved checkpoint is the expert review.
    Expr,
    /// Expert review done, bulk review pending.
    Bulk,
    /// Bulk review done, final review pending.
    Done,
    /// Fully signed off; eligible for the year-statistics merge.
    FinalOk,
}

impl SignoffState {
    /// True when the run never produces a [`RunAccounting`].
    pub fn is_excluded(self) -> bool {
        matches!(self, Self::Ongoing | Self::TooRecent | Self::Broken)
    }

    /// True when the run may enter the period archive.
    pub fn is_mergeable(self) -> bool {
        self == Self::FinalOk
    }
}

impl std::fmt::Display for SignoffState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Ongoing => "ONGOING",
            Self::TooRecent => "TOO RECENT",
            Self::Broken => "BROKEN",
            Self::Expr => "EXPR.",
            Self::Bulk => "BULK",
            Self::Done => "DONE",
            Self::FinalOk => "FINAL OK",
        };
        f.write_str(label)
    }
}

/// Which veto-inefficiency policy was used for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoPolicy {
    /// Lumi-weighted, defect-overlap corrected.
    #[default]
    Exact,
    /// Time-weighted only; explicitly less accurate and labeled as such in
    /// every report.
    Rough,
}

/// Weighted luminosity lost to one defect or veto, with its percentage of
/// the run total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossEntry {
    /// Lost weighted luminosity. For the rough veto policy this is vetoed
    /// time in nanoseconds instead (the policy has no luminosity weighting).
    pub lost: f64,
    /// Percentage of the run's total weighted luminosity.
    pub pct: f64,
}

/// Complete loss accounting for one run. Append-only: created once per run
/// and never mutated afterwards; the merger and the reports only read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAccounting {
    pub run: u32,
    /// Data-taking period assigned for archive bookkeeping.
    pub period: String,
    pub start_ns: u64,
    pub end_ns: Option<u64>,
    pub n_bunches: u32,
    /// Peak delivered instantaneous luminosity over the run.
    pub peak_lumi: f64,
    /// Lumiblocks with the "ATLAS ready" flag.
    pub ready_lbs: Vec<u32>,
    /// Ready lumiblocks surviving the global filter; the normalisation set.
    pub ready_filtered_lbs: Vec<u32>,
    /// Whether the global filter removed at least one ready lumiblock.
    pub global_filter_applied: bool,
    /// Total weighted luminosity over the ready-filtered set, floored to
    /// [`LUMI_EPSILON`] when the run delivered nothing.
    pub total_lumi: f64,
    /// Per intolerable defect: lost luminosity and percentage.
    pub intol_defect_loss: BTreeMap<String, LossEntry>,
    /// Per tolerable defect: lost luminosity and percentage (reported, never
    /// archived).
    pub tol_defect_loss: BTreeMap<String, LossEntry>,
    /// Per intolerable defect: the recoverable share of its loss.
    pub recov_defect_loss: BTreeMap<String, LossEntry>,
    /// Loss to any intolerable defect, deduplicated across defects.
    pub any_intolerable: LossEntry,
    /// Recoverable share of `any_intolerable`.
    pub any_recoverable: LossEntry,
    /// Irrecoverable share of `any_intolerable`.
    pub any_irrecoverable: LossEntry,
    /// Per veto: lost luminosity and percentage.
    pub veto_loss: BTreeMap<String, LossEntry>,
    /// Sum over all vetoes, assuming veto types never overlap in time (a
    /// documented approximation).
    pub all_veto: LossEntry,
    pub veto_policy: VetoPolicy,
    pub signoff: SignoffState,
    /// Affected-lumiblock lists per defect, for the run report.
    pub affected_lbs: BTreeMap<String, Vec<u32>>,
}

impl RunAccounting {
    /// True when the run may be merged into year statistics: fully signed
    /// off and carrying a usable luminosity normalisation.
    pub fn is_mergeable(&self) -> bool {
        self.signoff.is_mergeable() && self.total_lumi >= MIN_MERGEABLE_LUMI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signoff_exclusion_and_merge_rules() {
        assert!(SignoffState::Ongoing.is_excluded());
        assert!(SignoffState::TooRecent.is_excluded());
        assert!(SignoffState::Broken.is_excluded());
        assert!(!SignoffState::Expr.is_excluded());
        assert!(!SignoffState::FinalOk.is_excluded());

        assert!(SignoffState::FinalOk.is_mergeable());
        assert!(!SignoffState::Done.is_mergeable());
    }

    #[test]
    fn display_matches_review_stages() {
        assert_eq!(SignoffState::Expr.to_string(), "EXPR.");
        assert_eq!(SignoffState::FinalOk.to_string(), "FINAL OK");
    }
}
