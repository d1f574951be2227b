//! Luminosity-weighted loss aggregation.
//!
//! Turns a run's attribution result into the per-run accounting record:
//! every defect's lost luminosity and loss percentage, the deduplicated
//! "any intolerable" figures, and the veto assessment, all normalised by
//! the total weighted luminosity of the ready-filtered lumiblock set.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SystemTables;
use crate::models::accounting::LUMI_EPSILON;
use crate::models::{LossEntry, RunAccounting, RunContext, SignoffState};
use crate::services::attribution::Attribution;
use crate::services::veto::VetoAssessment;

/// Compute the complete accounting record for one run.
pub fn aggregate_run(
    ctx: &RunContext,
    att: &Attribution,
    veto: &VetoAssessment,
    tables: &SystemTables,
    signoff: SignoffState,
) -> RunAccounting {
    let raw_total: f64 = att.ready_filtered.iter().map(|&lb| ctx.weight(lb)).sum();
    // Epsilon floor: a run with zero delivered luminosity must yield zero
    // percentages, never a division by zero.
    let total_lumi = if raw_total == 0.0 { LUMI_EPSILON } else { raw_total };

    let peak_lumi = ctx
        .inst_lumi
        .values()
        .copied()
        .fold(0.0f64, f64::max);

    let loss_of = |lbs: &BTreeSet<u32>| -> LossEntry {
        let lost: f64 = lbs.iter().map(|&lb| ctx.weight(lb)).sum();
        LossEntry {
            lost,
            pct: 100.0 * lost / total_lumi,
        }
    };

    let mut intol_defect_loss = BTreeMap::new();
    let mut tol_defect_loss = BTreeMap::new();
    let mut affected_lbs = BTreeMap::new();

    for (name, part) in &att.membership.partition {
        let entry = loss_of(&part.all_partitions);
        affected_lbs.insert(
            name.clone(),
            part.all_partitions.iter().copied().collect::<Vec<_>>(),
        );
        if is_intolerable(tables, name) {
            intol_defect_loss.insert(name.clone(), entry);
        } else {
            tol_defect_loss.insert(name.clone(), entry);
        }
    }
    for (name, lbs) in &att.membership.global {
        let entry = loss_of(lbs);
        affected_lbs.insert(name.clone(), lbs.iter().copied().collect::<Vec<_>>());
        if is_intolerable(tables, name) {
            intol_defect_loss.insert(name.clone(), entry);
        } else {
            tol_defect_loss.insert(name.clone(), entry);
        }
    }

    let recov_defect_loss: BTreeMap<String, LossEntry> = att
        .membership
        .recoverable_by_defect
        .iter()
        .map(|(name, lbs)| (name.clone(), loss_of(lbs)))
        .collect();

    RunAccounting {
        run: ctx.metadata.run,
        period: ctx.metadata.primary_period().to_string(),
        start_ns: ctx.metadata.start_ns,
        end_ns: ctx.metadata.end_ns,
        n_bunches: ctx.metadata.n_bunches,
        peak_lumi,
        ready_lbs: att.ready_lbs.clone(),
        ready_filtered_lbs: att.ready_filtered.iter().copied().collect(),
        global_filter_applied: att.global_filter_applied,
        total_lumi,
        intol_defect_loss,
        tol_defect_loss,
        recov_defect_loss,
        any_intolerable: loss_of(&att.membership.all_intolerable),
        any_recoverable: loss_of(&att.membership.all_intolerable_recoverable),
        any_irrecoverable: loss_of(&att.membership.all_intolerable_irrecoverable),
        veto_loss: veto.per_veto.clone(),
        all_veto: veto.all_veto,
        veto_policy: veto.policy,
        signoff,
        affected_lbs,
    }
}

/// A defect present in membership but absent from the tables was attributed
/// under the placeholder classification, which counts as intolerable.
fn is_intolerable(tables: &SystemTables, name: &str) -> bool {
    tables
        .classify(name)
        .map(|c| c.is_intolerable())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::example_tables;
    use crate::models::{DefectInterval, RunMetadata, VetoPolicy};
    use crate::services::attribution::attribute_run;

    fn uniform_context(run: u32, n_lb: u32, inst_lumi: f64, duration_s: f64) -> RunContext {
        let start_ns = 1_600_000_000_000_000_000u64;
        let step = (duration_s * 1e9) as u64;
        let mut lb_timestamps = BTreeMap::new();
        let mut lumi = BTreeMap::new();
        let mut duration = BTreeMap::new();
        let mut ready = BTreeMap::new();
        for i in 0..n_lb {
            let lb = i + 1;
            let s = start_ns + u64::from(i) * step;
            lb_timestamps.insert(lb, (s, s + step));
            lumi.insert(lb, inst_lumi);
            duration.insert(lb, duration_s);
            ready.insert(lb, true);
        }
        RunContext {
            metadata: RunMetadata {
                run,
                start_ns,
                end_ns: Some(start_ns + u64::from(n_lb) * step),
                periods: vec!["B1".to_string()],
                n_bunches: 2462,
            },
            lb_timestamps,
            inst_lumi: lumi,
            duration_s: duration,
            ready,
            defects: vec![],
            veto_windows: BTreeMap::new(),
            veto_time_ns: BTreeMap::new(),
        }
    }

    fn accounting_for(ctx: &RunContext) -> RunAccounting {
        let tables = example_tables();
        let att = attribute_run(ctx, &tables, true).unwrap();
        aggregate_run(
            ctx,
            &att,
            &VetoAssessment::default(),
            &tables,
            SignoffState::FinalOk,
        )
    }

    #[test]
    fn single_defect_loss_fraction() {
        // 10 ready lumiblocks, luminosity 1.0, duration 60 s => weight 60
        // per block; a recoverable intolerable defect on LB 3-5 loses 30%.
        let mut ctx = uniform_context(100, 10, 1.0, 60.0);
        ctx.defects.push(DefectInterval {
            name: "HVTRIP".to_string(),
            channel: "LAR_EMBA_HVTRIP".to_string(),
            partition: Some("EMBA".to_string()),
            since_lb: 3,
            until_lb: 6,
            recoverable: true,
        });

        let acc = accounting_for(&ctx);
        assert!((acc.total_lumi - 600.0).abs() < 1e-9);
        assert!((acc.intol_defect_loss["HVTRIP"].pct - 30.0).abs() < 1e-9);
        assert!((acc.any_intolerable.pct - 30.0).abs() < 1e-9);
        assert!((acc.any_recoverable.pct - 30.0).abs() < 1e-9);
        assert_eq!(acc.any_irrecoverable.pct, 0.0);
    }

    #[test]
    fn overlapping_defects_split_recoverability_percentages() {
        // X (recoverable) on 3-5, Y (irrecoverable) on 4-6: any = 40%,
        // irrecoverable = 30%, recoverable = 10%.
        let mut ctx = uniform_context(100, 10, 1.0, 60.0);
        ctx.defects.push(DefectInterval {
            name: "HVTRIP".to_string(),
            channel: "LAR_EMBA_HVTRIP".to_string(),
            partition: Some("EMBA".to_string()),
            since_lb: 3,
            until_lb: 6,
            recoverable: true,
        });
        ctx.defects.push(DefectInterval {
            name: "DATACORRUPT".to_string(),
            channel: "LAR_DATACORRUPT".to_string(),
            partition: None,
            since_lb: 4,
            until_lb: 7,
            recoverable: false,
        });

        let acc = accounting_for(&ctx);
        assert!((acc.any_intolerable.pct - 40.0).abs() < 1e-9);
        assert!((acc.any_irrecoverable.pct - 30.0).abs() < 1e-9);
        assert!((acc.any_recoverable.pct - 10.0).abs() < 1e-9);
        assert_eq!(acc.affected_lbs["HVTRIP"], vec![3, 4, 5]);
        assert_eq!(acc.affected_lbs["DATACORRUPT"], vec![4, 5, 6]);
    }

    #[test]
    fn tolerable_defects_are_reported_but_not_intolerable() {
        let mut ctx = uniform_context(100, 10, 1.0, 60.0);
        ctx.defects.push(DefectInterval {
            name: "COVERAGE".to_string(),
            channel: "LAR_EMBA_COVERAGE".to_string(),
            partition: Some("EMBA".to_string()),
            since_lb: 1,
            until_lb: 3,
            recoverable: false,
        });

        let acc = accounting_for(&ctx);
        assert!((acc.tol_defect_loss["COVERAGE"].pct - 20.0).abs() < 1e-9);
        assert!(acc.intol_defect_loss.is_empty());
        assert_eq!(acc.any_intolerable.pct, 0.0);
    }

    #[test]
    fn zero_luminosity_yields_zero_percentages() {
        let mut ctx = uniform_context(100, 10, 0.0, 60.0);
        ctx.defects.push(DefectInterval {
            name: "DATACORRUPT".to_string(),
            channel: "LAR_DATACORRUPT".to_string(),
            partition: None,
            since_lb: 1,
            until_lb: 5,
            recoverable: false,
        });

        let acc = accounting_for(&ctx);
        assert_eq!(acc.any_intolerable.pct, 0.0);
        assert_eq!(acc.intol_defect_loss["DATACORRUPT"].pct, 0.0);
        // The floored total keeps the record out of year statistics.
        assert!(!acc.is_mergeable());
    }

    #[test]
    fn veto_assessment_is_carried_through() {
        let ctx = uniform_context(100, 10, 1.0, 60.0);
        let tables = example_tables();
        let att = attribute_run(&ctx, &tables, true).unwrap();
        let mut veto = VetoAssessment {
            policy: VetoPolicy::Rough,
            ..Default::default()
        };
        veto.per_veto.insert(
            "noiseBurst".to_string(),
            LossEntry {
                lost: 3e10,
                pct: 5.0,
            },
        );
        veto.all_veto = LossEntry {
            lost: 3e10,
            pct: 5.0,
        };

        let acc = aggregate_run(&ctx, &att, &veto, &tables, SignoffState::Done);
        assert_eq!(acc.veto_policy, VetoPolicy::Rough);
        assert!((acc.veto_loss["noiseBurst"].pct - 5.0).abs() < 1e-9);
        assert!((acc.all_veto.pct - 5.0).abs() < 1e-9);
        assert_eq!(acc.signoff, SignoffState::Done);
    }

    #[test]
    fn peak_lumi_tracks_the_maximum_block() {
        let mut ctx = uniform_context(100, 5, 1.0, 60.0);
        ctx.inst_lumi.insert(3, 7.5);
        let acc = accounting_for(&ctx);
        assert_eq!(acc.peak_lumi, 7.5);
    }
}
