//! Per-defect lumiblock membership derived during attribution.

use std::collections::{BTreeMap, BTreeSet};

/// Lumiblocks affected by one partition-scoped defect.
#[derive(Debug, Clone, Default)]
pub struct PartitionMembership {
    /// Partition -> affected lumiblocks.
    pub by_partition: BTreeMap<String, BTreeSet<u32>>,
    /// Union over all partitions, used for loss accounting.
    pub all_partitions: BTreeSet<u32>,
}

impl PartitionMembership {
    /// Record a lumiblock for one partition.
    pub fn insert(&mut self, partition: &str, lb: u32) {
        self.by_partition
            .entry(partition.to_string())
            .or_default()
            .insert(lb);
        self.all_partitions.insert(lb);
    }
}

/// Which lumiblocks each defect covers, plus the deduplicated "any
/// intolerable defect" aggregates.
///
/// `all_intolerable_recoverable` and `all_intolerable_irrecoverable`
/// partition `all_intolerable`: every intolerable lumiblock is in exactly
/// one of the two. Recoverability is tracked as explicit set pairs, both for
/// the aggregates and per defect.
#[derive(Debug, Clone, Default)]
pub struct LumiblockMembership {
    /// Partition defects: defect name -> per-partition membership.
    pub partition: BTreeMap<String, PartitionMembership>,
    /// Global defects: defect name -> affected lumiblocks.
    pub global: BTreeMap<String, BTreeSet<u32>>,
    /// Lumiblocks covered by at least one intolerable defect.
    pub all_intolerable: BTreeSet<u32>,
    /// Intolerable lumiblocks whose every covering defect is recoverable.
    pub all_intolerable_recoverable: BTreeSet<u32>,
    /// Intolerable lumiblocks covered by at least one irrecoverable defect.
    pub all_intolerable_irrecoverable: BTreeSet<u32>,
    /// Per intolerable defect: the subset of its lumiblocks that remains
    /// recoverable.
    pub recoverable_by_defect: BTreeMap<String, BTreeSet<u32>>,
}

impl LumiblockMembership {
    /// Lumiblocks of one defect, regardless of scope.
    pub fn lumiblocks_of(&self, defect: &str) -> Option<&BTreeSet<u32>> {
        self.global.get(defect).or_else(|| {
            self.partition
                .get(defect)
                .map(|p| &p.all_partitions)
        })
    }

    /// Derive the recoverable sets once all intervals have been attributed.
    ///
    /// A lumiblock is recoverable when no irrecoverable defect covers it, so
    /// the recoverable aggregate is the set difference of `all_intolerable`
    /// and `all_intolerable_irrecoverable`; the per-defect subsets are
    /// derived the same way.
    pub fn finalize_recoverability(&mut self, intolerable_names: &BTreeSet<String>) {
        self.all_intolerable_recoverable = self
            .all_intolerable
            .difference(&self.all_intolerable_irrecoverable)
            .copied()
            .collect();
        for name in intolerable_names {
            let Some(lbs) = self.lumiblocks_of(name) else {
                continue;
            };
            let recov: BTreeSet<u32> = lbs
                .difference(&self.all_intolerable_irrecoverable)
                .copied()
                .collect();
            self.recoverable_by_defect.insert(name.clone(), recov);
        }
    }
}
