//! Year-statistics archive: period-indexed weighted means, the
//! processed-run ledger, persistence and the single-writer guard.
//!
//! The archive is the only durable shared mutable resource in the system.
//! It is loaded, extended and re-saved on each incremental update; a run
//! merged once is never merged again, and only an explicit reset may
//! overwrite accumulated means.

pub mod guard;
pub mod ledger;
pub mod merger;
pub mod series;
pub mod store;

pub use guard::UpdateGuard;
pub use ledger::ProcessedRunLedger;
pub use merger::{merge_batch, MergeOutcome};
pub use series::{PeriodSeries, SeriesKey, WeightedMean, ALL_PERIODS};
pub use store::{ArchiveStore, YearStatsArchive, ARCHIVE_FILE};
