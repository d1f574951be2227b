//! Lumiblock attribution: from raw defect intervals to per-defect
//! membership sets.
//!
//! Attribution runs in three passes over a run's defect intervals: a
//! corruption scan (a run with an absurd interval end is excluded wholesale),
//! the machine-state global filter, and the membership pass that fills the
//! per-defect sets and the deduplicated "any intolerable" aggregates.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::config::SystemTables;
use crate::error::{LossError, LossResult};
use crate::models::{LumiblockMembership, RunContext};

/// A defect interval ending this far past the run's lumiblock count is a
/// corruption signal in the source database, not a real interval.
pub const CORRUPT_LB_MARGIN: u32 = 100_000;

/// Machine-state defects are sometimes stored with a default, practically
/// infinite end-of-validity. Such records carry no real time range and the
/// filter skips them.
pub const OPEN_ENDED_IOV: u32 = 4_000_000_000;

/// Result of attributing one run.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Lumiblocks with the "ATLAS ready" flag, ascending.
    pub ready_lbs: Vec<u32>,
    /// Ready lumiblocks surviving the global filter; every subsequent piece
    /// of accounting normalises against this set.
    pub ready_filtered: BTreeSet<u32>,
    /// Whether the global filter removed at least one ready lumiblock.
    pub global_filter_applied: bool,
    pub membership: LumiblockMembership,
}

/// Attribute a run's defect intervals to lumiblocks.
///
/// # Errors
/// [`LossError::CorruptedInterval`] when any classified interval ends more
/// than [`CORRUPT_LB_MARGIN`] lumiblocks past the run's count; the run must
/// be excluded entirely, never partially processed.
pub fn attribute_run(
    ctx: &RunContext,
    tables: &SystemTables,
    apply_global_filter: bool,
) -> LossResult<Attribution> {
    let n_lb = ctx.n_lb();
    scan_for_corruption(ctx, tables, n_lb)?;

    let filtered_out = global_filter_lbs(ctx, tables);

    let mut ready_lbs: Vec<u32> = ctx
        .ready
        .iter()
        .filter(|(_, &ready)| ready)
        .map(|(&lb, _)| lb)
        .collect();
    ready_lbs.sort_unstable();

    let ready_filtered: BTreeSet<u32> = if apply_global_filter {
        ready_lbs
            .iter()
            .copied()
            .filter(|lb| !filtered_out.contains(lb))
            .collect()
    } else {
        ready_lbs.iter().copied().collect()
    };
    let global_filter_applied =
        apply_global_filter && ready_lbs.iter().any(|lb| filtered_out.contains(lb));
    if global_filter_applied {
        debug!(
            run = ctx.metadata.run,
            removed = ready_lbs.len() - ready_filtered.len(),
            "global filter removed ready lumiblocks"
        );
    }

    let mut membership = LumiblockMembership::default();
    let mut intolerable_seen: BTreeSet<String> = BTreeSet::new();

    for defect in &ctx.defects {
        if tables.is_signoff_channel(&defect.channel)
            || tables
                .global_filter_defects
                .iter()
                .any(|c| c == &defect.channel)
        {
            continue;
        }

        match tables.classify(&defect.name) {
            Some(class) if class.is_partitioned() => {
                let partition = defect.partition.as_deref().unwrap_or("UNKNOWN");
                let entry = membership.partition.entry(defect.name.clone()).or_default();
                for lb in defect.since_lb..defect.until_lb {
                    if !ready_filtered.contains(&lb) {
                        continue;
                    }
                    entry.insert(partition, lb);
                    if class.is_intolerable() {
                        membership.all_intolerable.insert(lb);
                        if !defect.recoverable {
                            membership.all_intolerable_irrecoverable.insert(lb);
                        }
                    }
                }
                if class.is_intolerable() {
                    intolerable_seen.insert(defect.name.clone());
                }
            }
            Some(class) => {
                // Global defects occasionally end one block past the run;
                // clamp before iterating.
                let until = defect.until_lb.min(n_lb + 1);
                let entry = membership.global.entry(defect.name.clone()).or_default();
                for lb in defect.since_lb..until {
                    if !ready_filtered.contains(&lb) {
                        continue;
                    }
                    entry.insert(lb);
                    if class.is_intolerable() {
                        membership.all_intolerable.insert(lb);
                        if !defect.recoverable {
                            membership.all_intolerable_irrecoverable.insert(lb);
                        }
                    }
                }
                if class.is_intolerable() {
                    intolerable_seen.insert(defect.name.clone());
                }
            }
            None if tables.owns_channel(&defect.channel) => {
                // No classification entry, but the channel belongs to this
                // system: keep it in the dedup bookkeeping under a
                // placeholder classification so the loss is not silently
                // dropped.
                warn!(
                    run = ctx.metadata.run,
                    channel = %defect.channel,
                    "defect not in classification tables, counting as intolerable"
                );
                let until = defect.until_lb.min(n_lb + 1);
                let entry = membership.global.entry(defect.name.clone()).or_default();
                for lb in defect.since_lb..until {
                    if !ready_filtered.contains(&lb) {
                        continue;
                    }
                    entry.insert(lb);
                    membership.all_intolerable.insert(lb);
                    if !defect.recoverable {
                        membership.all_intolerable_irrecoverable.insert(lb);
                    }
                }
                intolerable_seen.insert(defect.name.clone());
            }
            None => {}
        }
    }

    membership.finalize_recoverability(&intolerable_seen);

    Ok(Attribution {
        ready_lbs,
        ready_filtered,
        global_filter_applied,
        membership,
    })
}

fn scan_for_corruption(ctx: &RunContext, tables: &SystemTables, n_lb: u32) -> LossResult<()> {
    for defect in &ctx.defects {
        if tables.is_signoff_channel(&defect.channel)
            || tables
                .global_filter_defects
                .iter()
                .any(|c| c == &defect.channel)
        {
            continue;
        }
        if tables.classify(&defect.name).is_none() && !tables.owns_channel(&defect.channel) {
            continue;
        }
        if defect.until_lb > n_lb.saturating_add(CORRUPT_LB_MARGIN) {
            return Err(LossError::CorruptedInterval {
                run: ctx.metadata.run,
                defect: defect.channel.clone(),
                until_lb: defect.until_lb,
                n_lb,
            });
        }
    }
    Ok(())
}

/// Lumiblocks excluded wholesale by machine-state defects.
fn global_filter_lbs(ctx: &RunContext, tables: &SystemTables) -> BTreeSet<u32> {
    let mut filtered: BTreeSet<u32> = BTreeSet::new();
    for defect in &ctx.defects {
        if !tables
            .global_filter_defects
            .iter()
            .any(|c| c == &defect.channel)
        {
            continue;
        }
        if defect.until_lb > OPEN_ENDED_IOV {
            // Default end-of-validity, no real range.
            continue;
        }
        for lb in defect.since_lb..defect.until_lb {
            filtered.insert(lb);
        }
    }
    filtered
}
