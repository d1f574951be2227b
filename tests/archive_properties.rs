//! Property tests of the archive's weighted-mean algebra: idempotence,
//! order independence of final weights, zero-weight boundary and
//! reset/rebuild reproducibility.

use std::collections::BTreeMap;

use proptest::prelude::*;

use lumiloss::archive::{merge_batch, SeriesKey, WeightedMean, YearStatsArchive, ALL_PERIODS};
use lumiloss::config::SystemTables;
use lumiloss::models::accounting::LossEntry;
use lumiloss::models::{RunAccounting, SignoffState, VetoPolicy};

fn tables() -> SystemTables {
    let raw = r#"
        system = "LAR"
        prefixes = ["LAR"]
        partition_intolerable = ["HVTRIP"]
        global_intolerable = ["DATACORRUPT"]
        vetoes = ["noiseBurst"]
        signoff_expert = ["LAR_UNCHECKED"]
        signoff_bulk = ["LAR_BULK_UNCHECKED"]
        signoff_final = ["LAR_UNCHECKED_FINAL"]
    "#;
    toml::from_str(raw).unwrap()
}

fn accounting(run: u32, period: &str, total: f64, any_pct: f64) -> RunAccounting {
    RunAccounting {
        run,
        period: period.to_string(),
        start_ns: 0,
        end_ns: Some(1),
        n_bunches: 0,
        peak_lumi: 0.0,
        ready_lbs: vec![],
        ready_filtered_lbs: vec![],
        global_filter_applied: false,
        total_lumi: total,
        intol_defect_loss: BTreeMap::new(),
        tol_defect_loss: BTreeMap::new(),
        recov_defect_loss: BTreeMap::new(),
        any_intolerable: LossEntry {
            lost: total * any_pct / 100.0,
            pct: any_pct,
        },
        any_recoverable: LossEntry::default(),
        any_irrecoverable: LossEntry::default(),
        veto_loss: BTreeMap::new(),
        all_veto: LossEntry::default(),
        veto_policy: VetoPolicy::Exact,
        signoff: SignoffState::FinalOk,
        affected_lbs: BTreeMap::new(),
    }
}

/// A batch of distinct mergeable runs over a small period alphabet.
fn batch_strategy() -> impl Strategy<Value = Vec<RunAccounting>> {
    prop::collection::btree_map(
        1u32..10_000,
        (
            prop::sample::select(vec!["A1", "B1", "B2", "C10"]),
            1.0f64..1e9,
            0.0f64..100.0,
        ),
        1..20,
    )
    .prop_map(|runs| {
        runs.into_iter()
            .map(|(run, (period, total, pct))| accounting(run, period, total, pct))
            .collect()
    })
}

fn cell(archive: &YearStatsArchive, period: &str) -> Option<WeightedMean> {
    archive.series.cell(&SeriesKey::AnyIntolerable, period)
}

proptest! {
    #[test]
    fn merging_twice_equals_merging_once(batch in batch_strategy()) {
        let tables = tables();
        let mut once = YearStatsArchive::default();
        merge_batch(&mut once, &batch, &tables);

        let mut twice = YearStatsArchive::default();
        merge_batch(&mut twice, &batch, &tables);
        let outcome = merge_batch(&mut twice, &batch, &tables);
        prop_assert!(outcome.merged.is_empty());

        prop_assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn final_weights_are_order_independent(batch in batch_strategy()) {
        // One merge call per run so the batch-level run-number sort cannot
        // mask the accumulator's own commutativity.
        let tables = tables();
        let mut forward = YearStatsArchive::default();
        for acc in &batch {
            merge_batch(&mut forward, std::slice::from_ref(acc), &tables);
        }

        let mut reversed = YearStatsArchive::default();
        for acc in batch.iter().rev() {
            merge_batch(&mut reversed, std::slice::from_ref(acc), &tables);
        }

        let all_label = ALL_PERIODS.to_string();
        for period in forward.series.periods.iter().chain(std::iter::once(&all_label)) {
            let f = cell(&forward, period).unwrap();
            let r = cell(&reversed, period).unwrap();
            prop_assert!((f.weight - r.weight).abs() <= 1e-9 * f.weight.abs().max(1.0));
            prop_assert!((f.mean - r.mean).abs() <= 1e-9 * f.mean.abs().max(1.0));
        }
    }

    #[test]
    fn zero_weight_runs_never_move_an_existing_mean(
        total in 1.0f64..1e9,
        pct in 0.0f64..100.0,
    ) {
        let tables = tables();
        let mut archive = YearStatsArchive::default();
        merge_batch(&mut archive, &[accounting(1, "B1", total, pct)], &tables);
        let before = cell(&archive, "B1").unwrap();

        // A signed-off run with (near-)zero luminosity is gated out of the
        // merge entirely, so the accumulator is untouched.
        merge_batch(&mut archive, &[accounting(2, "B1", 0.0, 77.0)], &tables);
        let after = cell(&archive, "B1").unwrap();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn rebuild_reproduces_an_incremental_history(batch in batch_strategy()) {
        let tables = tables();

        // Incremental: one merge call per run.
        let mut incremental = YearStatsArchive::default();
        for acc in &batch {
            merge_batch(&mut incremental, std::slice::from_ref(acc), &tables);
        }

        // From scratch, whole history at once (the reset path).
        let mut rebuilt = YearStatsArchive::default();
        merge_batch(&mut rebuilt, &batch, &tables);

        prop_assert_eq!(incremental.series.periods.clone(), rebuilt.series.periods.clone());
        let all_label = ALL_PERIODS.to_string();
        for period in incremental.series.periods.iter().chain(std::iter::once(&all_label)) {
            let i = cell(&incremental, period).unwrap();
            let r = cell(&rebuilt, period).unwrap();
            prop_assert!((i.weight - r.weight).abs() <= 1e-9 * i.weight.abs().max(1.0));
            prop_assert!((i.mean - r.mean).abs() <= 1e-9 * i.mean.abs().max(1.0));
        }
        prop_assert_eq!(incremental.ledger.len(), rebuilt.ledger.len());
    }

    #[test]
    fn accumulated_weight_equals_total_merged_luminosity(batch in batch_strategy()) {
        let tables = tables();
        let mut archive = YearStatsArchive::default();
        merge_batch(&mut archive, &batch, &tables);

        let expected: f64 = batch.iter().map(|a| a.total_lumi).sum();
        let all = cell(&archive, ALL_PERIODS).unwrap();
        prop_assert!((all.weight - expected).abs() <= 1e-9 * expected.max(1.0));
        let lumi = archive.series.period_lumi[ALL_PERIODS];
        prop_assert!((lumi - expected).abs() <= 1e-9 * expected.max(1.0));
    }
}
