//! Core data model for per-run loss accounting.
//!
//! The types here are constructed fresh for each processed run and are
//! immutable once computed for that run's pass:
//!
//! - [`context`]: everything retrieved from the external conditions/metadata
//!   service for one run (lumiblock timestamps, luminosity, defect and veto
//!   intervals).
//! - [`membership`]: per-defect lumiblock membership sets derived during
//!   attribution, including the deduplicated "any intolerable defect"
//!   aggregates.
//! - [`accounting`]: the per-run loss figures consumed by reporting and by
//!   the year-statistics merger.

pub mod accounting;
pub mod context;
pub mod membership;

pub use accounting::{LossEntry, RunAccounting, SignoffState, VetoPolicy};
pub use context::{DefectInterval, RunContext, RunMetadata, VetoWindow};
pub use membership::{LumiblockMembership, PartitionMembership};
