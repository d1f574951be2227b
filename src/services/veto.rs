//! Veto-inefficiency estimation policies.
//!
//! Two policies exist, selected per run: the exact policy weights each veto
//! window by the instantaneous luminosity of the lumiblock it starts in and
//! skips windows already lost to an intolerable defect; the rough policy
//! normalises a precomputed vetoed-time figure by the ready time and is
//! explicitly less accurate - every report labels its results as rough.
//!
//! Both policies sum per-veto results into an `all_veto` figure under the
//! assumption that distinct veto types never overlap in time. This is a
//! documented approximation, not a guarantee.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SystemTables;
use crate::error::LossResult;
use crate::models::{LossEntry, RunContext, VetoPolicy};

/// Nominal lumiblock length used by the rough policy's time normalisation.
pub const NOMINAL_LB_SECONDS: f64 = 60.0;

/// Per-run veto inefficiency assessment.
#[derive(Debug, Clone, Default)]
pub struct VetoAssessment {
    pub per_veto: BTreeMap<String, LossEntry>,
    /// Sum over vetoes, no-overlap approximation.
    pub all_veto: LossEntry,
    pub policy: VetoPolicy,
}

/// Strategy interface for the two veto-inefficiency computations.
pub trait VetoEstimator {
    fn policy(&self) -> VetoPolicy;

    /// Estimate per-veto losses for one run.
    ///
    /// `total_lumi` is the run's (epsilon-floored) total weighted
    /// luminosity; `ready_filtered` and `all_intolerable` come from
    /// attribution.
    fn estimate(
        &self,
        ctx: &RunContext,
        tables: &SystemTables,
        ready_filtered: &BTreeSet<u32>,
        all_intolerable: &BTreeSet<u32>,
        total_lumi: f64,
    ) -> LossResult<VetoAssessment>;
}

/// Exact, lumi-weighted veto estimation.
///
/// Each veto window is mapped to the lumiblocks containing its boundaries.
/// Windows whose boundary lumiblocks are already covered by an intolerable
/// defect are skipped so the same loss is not counted as both a defect and
/// a veto; windows entirely outside the ready-filtered set are ignored. The
/// lost luminosity of a window is the start lumiblock's instantaneous
/// luminosity times the window length (imprecise for windows spanning more
/// than one lumiblock).
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactVetoEstimator;

impl VetoEstimator for ExactVetoEstimator {
    fn policy(&self) -> VetoPolicy {
        VetoPolicy::Exact
    }

    fn estimate(
        &self,
        ctx: &RunContext,
        tables: &SystemTables,
        ready_filtered: &BTreeSet<u32>,
        all_intolerable: &BTreeSet<u32>,
        total_lumi: f64,
    ) -> LossResult<VetoAssessment> {
        let mut assessment = VetoAssessment {
            policy: VetoPolicy::Exact,
            ..Default::default()
        };
        for veto in &tables.vetoes {
            let mut lost = 0.0;
            for window in ctx.veto_windows.get(veto).map(Vec::as_slice).unwrap_or(&[]) {
                let (Some(lb0), Some(lb1)) = (ctx.lb_at(window.start_ns), ctx.lb_at(window.end_ns))
                else {
                    continue;
                };
                if all_intolerable.contains(&lb0) || all_intolerable.contains(&lb1) {
                    continue;
                }
                if !ready_filtered.contains(&lb0) && !ready_filtered.contains(&lb1) {
                    continue;
                }
                let inst = ctx.inst_lumi.get(&lb0).copied().unwrap_or(0.0);
                lost += inst * window.duration_s();
            }
            let pct = 100.0 * lost / total_lumi;
            assessment
                .per_veto
                .insert(veto.clone(), LossEntry { lost, pct });
            assessment.all_veto.lost += lost;
            assessment.all_veto.pct += pct;
        }
        Ok(assessment)
    }
}

/// Rough, time-weighted veto estimation.
///
/// Uses the provider's precomputed total vetoed time per veto, normalised by
/// `ready_count x` [`NOMINAL_LB_SECONDS`]. No luminosity weighting, no
/// defect-overlap correction; used when the exact computation is too costly
/// or unavailable for old runs. `lost` holds vetoed nanoseconds, not
/// luminosity.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoughVetoEstimator;

impl VetoEstimator for RoughVetoEstimator {
    fn policy(&self) -> VetoPolicy {
        VetoPolicy::Rough
    }

    fn estimate(
        &self,
        ctx: &RunContext,
        tables: &SystemTables,
        ready_filtered: &BTreeSet<u32>,
        _all_intolerable: &BTreeSet<u32>,
        _total_lumi: f64,
    ) -> LossResult<VetoAssessment> {
        let mut assessment = VetoAssessment {
            policy: VetoPolicy::Rough,
            ..Default::default()
        };
        let ready_ns = ready_filtered.len() as f64 * NOMINAL_LB_SECONDS * 1e9;
        for veto in &tables.vetoes {
            let vetoed_ns = ctx.veto_time_ns.get(veto).copied().unwrap_or(0) as f64;
            let pct = if ready_ns > 0.0 {
                100.0 * vetoed_ns / ready_ns
            } else {
                0.0
            };
            assessment
                .per_veto
                .insert(veto.clone(), LossEntry { lost: vetoed_ns, pct });
            assessment.all_veto.lost += vetoed_ns;
            assessment.all_veto.pct += pct;
        }
        Ok(assessment)
    }
}
