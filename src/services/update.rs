//! Batch orchestrator: process runs, gate them, merge year statistics.
//!
//! One invocation selects runs from the authoritative run list, processes
//! them in increasing run-number order (attribution -> sign-off gate ->
//! aggregation -> report), and - when a year-statistics update is requested
//! - merges the fully-signed-off runs into the persisted archive under the
//! single-writer guard. The archive write is a single atomic save at the
//! end, so an interrupted invocation leaves the archive in its pre-run
//! state.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::archive::{merge_batch, ArchiveStore, MergeOutcome, UpdateGuard, YearStatsArchive};
use crate::config::{JobConfig, SystemTables, YearTagConfig};
use crate::error::{LossError, LossResult};
use crate::models::accounting::LUMI_EPSILON;
use crate::models::{RunAccounting, RunContext, SignoffState, VetoPolicy};
use crate::provider::ConditionsProvider;
use crate::services::attribution::attribute_run;
use crate::services::aggregation::aggregate_run;
use crate::services::report;
use crate::services::signoff::classify_run;
use crate::services::veto::{
    ExactVetoEstimator, RoughVetoEstimator, VetoAssessment, VetoEstimator,
};

/// Everything one invocation produced.
#[derive(Debug, Default)]
pub struct UpdateSummary {
    /// Accounting records of all processed (non-excluded) runs, ascending.
    pub accountings: Vec<RunAccounting>,
    /// Runs excluded before accounting, with the excluding state.
    pub excluded: Vec<(u32, SignoffState)>,
    /// Merge outcome, present when a year-statistics update was requested.
    pub merge: Option<MergeOutcome>,
    /// Whether the archive was reset (requested or forced).
    pub archive_reset: bool,
}

/// What processing one run produced.
enum ProcessOutcome {
    Accounted(Box<RunAccounting>),
    /// Excluded before accounting (ongoing or too recent).
    Skipped(SignoffState),
}

/// The batch job over one (system, year, tag).
pub struct YearStatsUpdater<'a, P: ConditionsProvider> {
    provider: &'a P,
    tables: &'a SystemTables,
    year_tag: &'a YearTagConfig,
    job: &'a JobConfig,
}

impl<'a, P: ConditionsProvider> YearStatsUpdater<'a, P> {
    pub fn new(
        provider: &'a P,
        tables: &'a SystemTables,
        year_tag: &'a YearTagConfig,
        job: &'a JobConfig,
    ) -> Self {
        Self {
            provider,
            tables,
            year_tag,
            job,
        }
    }

    /// Run the batch. `now` anchors the too-recent gate and the reset
    /// timestamp so the job stays deterministic under test.
    pub fn run(&self, now: DateTime<Utc>) -> LossResult<UpdateSummary> {
        let now_ns = now.timestamp_nanos_opt().unwrap_or(i64::MAX) as u64;
        let mut runs = self.select_runs()?;
        let rough_veto_runs = self.rough_veto_runs();

        let stats_dir = self.job.year_stats_dir();
        let store = ArchiveStore::new(&stats_dir);

        // The guard wraps the whole write path; dropping it on any exit
        // releases the marker.
        let guard = if self.job.update_year_stats {
            Some(UpdateGuard::acquire(
                &stats_dir,
                self.job.system,
                &self.job.year,
                &self.job.tag,
            )?)
        } else {
            None
        };

        let mut summary = UpdateSummary::default();
        let mut archive: Option<YearStatsArchive> = if self.job.update_year_stats {
            let (archive, forced) = if self.job.reset_year_stats {
                (store.reset(now), true)
            } else {
                store.load_or_reset()?
            };
            summary.archive_reset = forced || self.job.reset_year_stats;
            Some(archive)
        } else {
            None
        };

        if self.job.skip_already_updated {
            if let Some(archive) = &archive {
                runs.retain(|run| {
                    let merged = archive.ledger.contains_run(*run);
                    if merged {
                        info!(run, "already in year statistics, skipping completely");
                    }
                    !merged
                });
            }
        }

        for run in runs {
            match self.process_run(run, now_ns, &rough_veto_runs, &stats_dir) {
                Ok(ProcessOutcome::Accounted(acc)) => summary.accountings.push(*acc),
                Ok(ProcessOutcome::Skipped(state)) => summary.excluded.push((run, state)),
                Err(e) if e.is_fatal_for_run_only() => {
                    error!(run, "excluding run from batch: {e}");
                    report::append_warning(&stats_dir, &e.to_string())?;
                    summary.excluded.push((run, SignoffState::Broken));
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(archive) = archive.as_mut() {
            let outcome = merge_batch(archive, &summary.accountings, self.tables);
            report::write_not_signed_off(&stats_dir, &outcome.not_signed_off)?;
            for (run, _) in &outcome.merged {
                if let Some(acc) = summary.accountings.iter().find(|a| a.run == *run) {
                    report::append_loss_ledger(&stats_dir, acc)?;
                }
            }
            store.save(archive)?;
            summary.merge = Some(outcome);
        }

        drop(guard);
        Ok(summary)
    }

    /// Runs from the authoritative run list, intersected with the optional
    /// run range, ascending.
    fn select_runs(&self) -> LossResult<Vec<u32>> {
        let path = self.job.run_list_path();
        if !path.exists() {
            return Err(LossError::MissingRunList { path });
        }
        let raw = fs::read_to_string(&path)?;
        let mut runs: Vec<u32> = raw
            .lines()
            .filter_map(|l| l.trim().parse::<u32>().ok())
            .collect();
        runs.sort_unstable();
        runs.dedup();

        if let Some((first, last)) = self.job.run_range {
            runs.retain(|r| (first..=last).contains(r));
            if runs.is_empty() {
                return Err(LossError::RunNotListed {
                    first,
                    last,
                    run_list: path,
                });
            }
        }
        info!(count = runs.len(), "selected runs from the run list");
        Ok(runs)
    }

    /// Runs forced to the rough veto policy, from the optional per-year
    /// list.
    fn rough_veto_runs(&self) -> BTreeSet<u32> {
        let path = self.job.rough_veto_list_path();
        let Ok(raw) = fs::read_to_string(&path) else {
            return BTreeSet::new();
        };
        raw.lines()
            .filter_map(|l| l.trim().parse::<u32>().ok())
            .collect()
    }

    /// Process one run end to end.
    fn process_run(
        &self,
        run: u32,
        now_ns: u64,
        rough_veto_runs: &BTreeSet<u32>,
        stats_dir: &Path,
    ) -> LossResult<ProcessOutcome> {
        let metadata = self.provider.run_metadata(run)?;

        // Ongoing / too-recent runs are dropped before any further
        // retrieval; they will be picked up by a later invocation.
        let end_ns = metadata.end_ns.unwrap_or(0);
        if end_ns == 0 {
            info!(run, "run is still ongoing, skipping");
            return Ok(ProcessOutcome::Skipped(SignoffState::Ongoing));
        }
        if now_ns.saturating_sub(end_ns) < crate::services::signoff::MIN_RUN_AGE_NS {
            info!(run, "run ended less than two hours ago, skipping for now");
            return Ok(ProcessOutcome::Skipped(SignoffState::TooRecent));
        }

        let ctx = self.assemble_context(metadata, stats_dir)?;
        info!(
            run,
            n_lb = ctx.n_lb(),
            period = ctx.metadata.primary_period(),
            "processing run"
        );

        let att = attribute_run(&ctx, self.tables, self.job.global_filter)?;
        let signoff = classify_run(&ctx.metadata, &ctx.defects, self.tables, now_ns);

        let veto = self.assess_veto(&ctx, &att, run, rough_veto_runs)?;
        let acc = aggregate_run(&ctx, &att, &veto, self.tables, signoff);
        report::write_run_report(stats_dir, &acc, self.tables)?;
        Ok(ProcessOutcome::Accounted(Box::new(acc)))
    }

    /// Retrieve and assemble everything the provider knows about a run,
    /// substituting zero (with a logged warning) for missing per-lumiblock
    /// luminosity or duration.
    fn assemble_context(
        &self,
        metadata: crate::models::RunMetadata,
        stats_dir: &Path,
    ) -> LossResult<RunContext> {
        let run = metadata.run;
        let lb_timestamps = self.provider.lumiblock_timestamps(run)?;
        let mut inst_lumi = self
            .provider
            .lumiblock_luminosity(run, &self.year_tag.lumi_tag)?;
        let mut duration_s = self
            .provider
            .lumiblock_duration(run, &self.year_tag.lumi_acct_tag)?;
        let ready = self.provider.ready_flags(run)?;

        for (&lb, &is_ready) in &ready {
            if !is_ready {
                continue;
            }
            if !inst_lumi.contains_key(&lb) {
                let msg = format!("Missing lumi for Run {run} - LB {lb}");
                warn!("{msg}");
                report::append_warning(stats_dir, &msg)?;
                inst_lumi.insert(lb, 0.0);
            }
            if !duration_s.contains_key(&lb) {
                let msg = format!("Missing duration for Run {run} - LB {lb}");
                warn!("{msg}");
                report::append_warning(stats_dir, &msg)?;
                duration_s.insert(lb, 0.0);
            }
        }

        let mut channels: Vec<String> = self.tables.global_filter_defects.clone();
        channels.extend(self.tables.signoff_expert.iter().cloned());
        channels.extend(self.tables.signoff_bulk.iter().cloned());
        channels.extend(self.tables.signoff_final.iter().cloned());
        let defects = self
            .provider
            .defect_intervals(run, &self.year_tag.defect_tag, &self.tables.prefixes, &channels)?;

        let (veto_windows, veto_time_ns) = match (&self.year_tag.veto_tag, self.job.use_veto) {
            (Some(veto_tag), true) if !self.tables.vetoes.is_empty() => (
                self.provider
                    .veto_windows(run, veto_tag, &self.tables.vetoes)?,
                self.provider
                    .veto_time_totals(run, veto_tag, &self.tables.vetoes)?,
            ),
            _ => Default::default(),
        };

        Ok(RunContext {
            metadata,
            lb_timestamps,
            inst_lumi,
            duration_s,
            ready,
            defects,
            veto_windows,
            veto_time_ns,
        })
    }

    /// Pick the veto policy for a run and assess it. Runs in the rough-veto
    /// list are forced to the rough policy even when exact is configured.
    fn assess_veto(
        &self,
        ctx: &RunContext,
        att: &crate::services::attribution::Attribution,
        run: u32,
        rough_veto_runs: &BTreeSet<u32>,
    ) -> LossResult<VetoAssessment> {
        if !self.job.use_veto || self.tables.vetoes.is_empty() || self.year_tag.veto_tag.is_none()
        {
            return Ok(VetoAssessment::default());
        }
        let raw_total: f64 = att.ready_filtered.iter().map(|&lb| ctx.weight(lb)).sum();
        let total = if raw_total == 0.0 { LUMI_EPSILON } else { raw_total };

        let rough = self.job.veto_policy == VetoPolicy::Rough || rough_veto_runs.contains(&run);
        let estimator: &dyn VetoEstimator = if rough {
            warn!(run, "using the rough veto computation; results are approximate");
            &RoughVetoEstimator
        } else {
            &ExactVetoEstimator
        };
        estimator.estimate(
            ctx,
            self.tables,
            &att.ready_filtered,
            &att.membership.all_intolerable,
            total,
        )
    }
}
