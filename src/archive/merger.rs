//! Incremental merge of per-run accounting into the period archive.
//!
//! The merger is the only stateful write in the whole pipeline. A run
//! enters a period's accumulators exactly once: it must be fully signed
//! off, carry a usable luminosity normalisation, and not already be in the
//! processed-run ledger. Re-merging a ledgered run is a silent idempotent
//! no-op.

use tracing::{info, warn};

use crate::archive::series::SeriesKey;
use crate::archive::store::YearStatsArchive;
use crate::config::SystemTables;
use crate::models::{RunAccounting, SignoffState};

/// What happened to each run of a merge batch.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Runs newly merged, with their periods.
    pub merged: Vec<(u32, String)>,
    /// Runs skipped because the ledger already contains them.
    pub already_processed: Vec<u32>,
    /// Runs skipped because they are not fully signed off (or carry no
    /// usable luminosity), with their current state.
    pub not_signed_off: Vec<(u32, String, SignoffState)>,
    /// Runs skipped because no period is assigned yet.
    pub no_period: Vec<u32>,
    /// Period labels added to the archive axis by this batch.
    pub new_periods: Vec<String>,
}

impl MergeOutcome {
    pub fn merged_any(&self) -> bool {
        !self.merged.is_empty()
    }
}

/// Merge a batch of run accountings into the archive.
///
/// Runs are folded in ascending run-number order. The period axis is
/// extended first with every period touched by an eligible run, keeping
/// chronological order, so the trailing all-periods bin sees a consistent
/// axis throughout the batch.
pub fn merge_batch(
    archive: &mut YearStatsArchive,
    batch: &[RunAccounting],
    tables: &SystemTables,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    let mut runs: Vec<&RunAccounting> = batch.iter().collect();
    runs.sort_by_key(|acc| acc.run);

    let touched: Vec<String> = runs
        .iter()
        .filter(|acc| acc.is_mergeable() && !archive.ledger.contains_run(acc.run))
        .map(|acc| acc.period.clone())
        .collect();
    outcome.new_periods = archive.series.extend_periods(touched);
    for period in &outcome.new_periods {
        info!(period = %period, "adding period to year statistics");
    }

    for acc in runs {
        if !acc.is_mergeable() {
            warn!(
                run = acc.run,
                signoff = %acc.signoff,
                "run not fully signed off, no year-statistics update"
            );
            outcome
                .not_signed_off
                .push((acc.run, acc.period.clone(), acc.signoff));
            continue;
        }
        if archive.ledger.contains_run(acc.run) {
            outcome.already_processed.push(acc.run);
            continue;
        }
        if acc.period == "?" {
            warn!(run = acc.run, "no period assigned yet, cannot merge");
            outcome.no_period.push(acc.run);
            continue;
        }

        fold_run(archive, acc, tables);
        archive.ledger.record(acc.run, &acc.period);
        outcome.merged.push((acc.run, acc.period.clone()));
        info!(run = acc.run, period = %acc.period, "merged into year statistics");
    }

    outcome
}

/// Fold one eligible run into every series. Defects and vetoes with no loss
/// in this run still contribute their luminosity weight at zero loss: the
/// period mean is weighted over all merged runs, not only the affected ones.
fn fold_run(archive: &mut YearStatsArchive, acc: &RunAccounting, tables: &SystemTables) {
    let series = &mut archive.series;
    let w = acc.total_lumi;
    let period = acc.period.as_str();

    for name in tables.intolerable_names() {
        let pct = acc
            .intol_defect_loss
            .get(name)
            .map(|e| e.pct)
            .unwrap_or(0.0);
        series.accumulate(&SeriesKey::Defect(name.clone()), period, pct, w);
        let recov_pct = acc
            .recov_defect_loss
            .get(name)
            .map(|e| e.pct)
            .unwrap_or(0.0);
        series.accumulate(
            &SeriesKey::DefectRecoverable(name.clone()),
            period,
            recov_pct,
            w,
        );
    }

    series.accumulate(&SeriesKey::AnyIntolerable, period, acc.any_intolerable.pct, w);
    series.accumulate(
        &SeriesKey::AnyIntolerableRecoverable,
        period,
        acc.any_recoverable.pct,
        w,
    );

    for veto in &tables.vetoes {
        let pct = acc.veto_loss.get(veto).map(|e| e.pct).unwrap_or(0.0);
        series.accumulate(&SeriesKey::Veto(veto.clone()), period, pct, w);
    }
    series.accumulate(&SeriesKey::AllVeto, period, acc.all_veto.pct, w);

    series.add_period_lumi(period, w);
}
