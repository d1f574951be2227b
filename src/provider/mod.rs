//! Conditions/metadata provider interface.
//!
//! Retrieval of run metadata, lumiblock timestamps, luminosity, defect and
//! veto intervals lives behind [`ConditionsProvider`]; the engine never
//! talks to a conditions database directly. The in-memory
//! [`LocalProvider`] backs tests, local development and fixture-driven
//! batch runs.

mod local;

pub use local::{LocalProvider, RunFixture};

use std::collections::BTreeMap;

use crate::error::LossResult;
use crate::models::{DefectInterval, RunMetadata, VetoWindow};

/// Read access to per-run conditions and metadata.
///
/// All calls are blocking and atomic from the engine's perspective; the
/// engine is a single-threaded batch job and needs no async machinery.
pub trait ConditionsProvider {
    /// Run numbers this provider knows about.
    fn known_runs(&self) -> Vec<u32>;

    /// General run characteristics.
    fn run_metadata(&self, run: u32) -> LossResult<RunMetadata>;

    /// Lumiblock index -> (start_ns, end_ns), UTC nanoseconds.
    fn lumiblock_timestamps(&self, run: u32) -> LossResult<BTreeMap<u32, (u64, u64)>>;

    /// Lumiblock index -> delivered instantaneous luminosity.
    fn lumiblock_luminosity(&self, run: u32, lumi_tag: &str) -> LossResult<BTreeMap<u32, f64>>;

    /// Lumiblock index -> duration in seconds, live-fraction corrected where
    /// the luminosity-accounting tag provides it.
    fn lumiblock_duration(&self, run: u32, lumi_acct_tag: &str)
        -> LossResult<BTreeMap<u32, f64>>;

    /// Lumiblock index -> "ATLAS ready" flag.
    fn ready_flags(&self, run: u32) -> LossResult<BTreeMap<u32, bool>>;

    /// All defect intervals for the run under a defect tag, restricted to
    /// the given channel prefixes plus the explicitly named channels
    /// (sign-off checkpoints, global-filter defects).
    fn defect_intervals(
        &self,
        run: u32,
        defect_tag: &str,
        prefixes: &[String],
        channels: &[String],
    ) -> LossResult<Vec<DefectInterval>>;

    /// Veto name -> time windows, for the exact veto policy.
    fn veto_windows(
        &self,
        run: u32,
        veto_tag: &str,
        veto_names: &[String],
    ) -> LossResult<BTreeMap<String, Vec<VetoWindow>>>;

    /// Veto name -> total vetoed nanoseconds, for the rough veto policy.
    fn veto_time_totals(
        &self,
        run: u32,
        veto_tag: &str,
        veto_names: &[String],
    ) -> LossResult<BTreeMap<String, u64>>;
}
