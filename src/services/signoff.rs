//! Run sign-off gate.
//!
//! Classifies each run's processing eligibility. A run without an end time
//! is still ongoing; a run that ended less than two hours ago is left for a
//! later invocation so the defect database can populate. Otherwise the state
//! is the earliest unresolved checkpoint of the expert -> bulk -> final
//! review chain, read from the presence of the configured "unchecked"
//! defect channels. Only fully-signed-off runs may enter year statistics.

use tracing::info;

use crate::config::SystemTables;
use crate::models::{DefectInterval, RunMetadata, SignoffState};

/// Minimum age of a run before its defect records are trusted.
pub const MIN_RUN_AGE_NS: u64 = 2 * 3600 * 1_000_000_000;

/// Classify a run's sign-off state from its metadata and defect records.
///
/// `now_ns` is passed in rather than read from the clock so the gate stays
/// deterministic under test.
pub fn classify_run(
    metadata: &RunMetadata,
    defects: &[DefectInterval],
    tables: &SystemTables,
    now_ns: u64,
) -> SignoffState {
    let Some(end_ns) = metadata.end_ns.filter(|&e| e > 0) else {
        info!(run = metadata.run, "run is still ongoing");
        return SignoffState::Ongoing;
    };
    if now_ns.saturating_sub(end_ns) < MIN_RUN_AGE_NS {
        info!(
            run = metadata.run,
            "run ended very recently, waiting for the defect database to populate"
        );
        return SignoffState::TooRecent;
    }

    let present = |channels: &[String]| {
        defects
            .iter()
            .any(|d| channels.iter().any(|c| c == &d.channel))
    };

    if present(&tables.signoff_expert) {
        SignoffState::Expr
    } else if present(&tables.signoff_bulk) {
        SignoffState::Bulk
    } else if present(&tables.signoff_final) {
        SignoffState::Done
    } else {
        SignoffState::FinalOk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::example_tables;

    const HOUR_NS: u64 = 3600 * 1_000_000_000;

    fn metadata(end_ns: Option<u64>) -> RunMetadata {
        RunMetadata {
            run: 100,
            start_ns: 0,
            end_ns,
            periods: vec!["B1".to_string()],
            n_bunches: 100,
        }
    }

    fn checkpoint(channel: &str) -> DefectInterval {
        DefectInterval {
            name: channel.to_string(),
            channel: channel.to_string(),
            partition: None,
            since_lb: 1,
            until_lb: 100,
            recoverable: false,
        }
    }

    #[test]
    fn ongoing_run_is_excluded() {
        let tables = example_tables();
        let state = classify_run(&metadata(None), &[], &tables, 10 * HOUR_NS);
        assert_eq!(state, SignoffState::Ongoing);
        assert!(state.is_excluded());
    }

    #[test]
    fn recent_run_is_excluded() {
        let tables = example_tables();
        let state = classify_run(&metadata(Some(9 * HOUR_NS)), &[], &tables, 10 * HOUR_NS);
        assert_eq!(state, SignoffState::TooRecent);
    }

    #[test]
    fn run_exactly_two_hours_old_is_processed() {
        let tables = example_tables();
        let state = classify_run(&metadata(Some(8 * HOUR_NS)), &[], &tables, 10 * HOUR_NS);
        assert_eq!(state, SignoffState::FinalOk);
    }

    #[test]
    fn earliest_unresolved_checkpoint_wins() {
        let tables = example_tables();
        let now = 100 * HOUR_NS;
        let end = Some(HOUR_NS);

        // All three checkpoints pending: the expert stage dominates.
        let defects = vec![
            checkpoint("LAR_UNCHECKED"),
            checkpoint("LAR_BULK_UNCHECKED"),
            checkpoint("LAR_UNCHECKED_FINAL"),
        ];
        assert_eq!(
            classify_run(&metadata(end), &defects, &tables, now),
            SignoffState::Expr
        );

        let defects = vec![
            checkpoint("LAR_BULK_UNCHECKED"),
            checkpoint("LAR_UNCHECKED_FINAL"),
        ];
        assert_eq!(
            classify_run(&metadata(end), &defects, &tables, now),
            SignoffState::Bulk
        );

        let defects = vec![checkpoint("LAR_UNCHECKED_FINAL")];
        assert_eq!(
            classify_run(&metadata(end), &defects, &tables, now),
            SignoffState::Done
        );

        assert_eq!(
            classify_run(&metadata(end), &[], &tables, now),
            SignoffState::FinalOk
        );
    }

    #[test]
    fn ordinary_defects_do_not_block_signoff() {
        let tables = example_tables();
        let defects = vec![DefectInterval {
            name: "HVTRIP".to_string(),
            channel: "LAR_EMBA_HVTRIP".to_string(),
            partition: Some("EMBA".to_string()),
            since_lb: 3,
            until_lb: 6,
            recoverable: true,
        }];
        assert_eq!(
            classify_run(&metadata(Some(HOUR_NS)), &defects, &tables, 100 * HOUR_NS),
            SignoffState::FinalOk
        );
    }
}
