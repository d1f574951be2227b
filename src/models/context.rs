//! Per-run data retrieved from the external conditions/metadata service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// General characteristics of a run as reported by the metadata service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run number.
    pub run: u32,
    /// Start of the run, nanoseconds since the Unix epoch.
    pub start_ns: u64,
    /// End of the run; `None` while the run is still ongoing.
    pub end_ns: Option<u64>,
    /// Data-taking periods this run belongs to. The first entry is the
    /// period used for year-statistics bookkeeping.
    pub periods: Vec<String>,
    /// Number of colliding bunches.
    pub n_bunches: u32,
}

impl RunMetadata {
    /// The period used for archive bookkeeping: the first assigned period,
    /// or `"?"` when the period list is still empty upstream.
    pub fn primary_period(&self) -> &str {
        self.periods.first().map(String::as_str).unwrap_or("?")
    }
}

/// A defect record from the defect database, already parsed into a bare
/// defect name and an optional partition. Covers lumiblocks in the half-open
/// range `[since_lb, until_lb)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectInterval {
    /// Bare defect name (without system/partition prefix).
    pub name: String,
    /// Full channel name as stored in the defect database. Sign-off
    /// checkpoints are matched against this.
    pub channel: String,
    /// Affected partition, `None` for global defects.
    pub partition: Option<String>,
    pub since_lb: u32,
    pub until_lb: u32,
    /// Whether the affected lumiblocks may later be reclassified as usable.
    pub recoverable: bool,
}

/// A time-window veto `[start_ns, end_ns)`, nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoWindow {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl VetoWindow {
    /// Window length in seconds.
    pub fn duration_s(&self) -> f64 {
        self.end_ns.saturating_sub(self.start_ns) as f64 / 1e9
    }
}

/// Everything retrieved from the conditions/metadata service for one run.
///
/// Constructed once per run by the orchestrator, read-only afterwards.
/// Missing per-lumiblock luminosity or duration entries have already been
/// substituted with zero (and logged) by the time this struct is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub metadata: RunMetadata,
    /// Lumiblock index -> (start_ns, end_ns).
    pub lb_timestamps: BTreeMap<u32, (u64, u64)>,
    /// Lumiblock index -> delivered instantaneous luminosity.
    pub inst_lumi: BTreeMap<u32, f64>,
    /// Lumiblock index -> duration in seconds (live-fraction corrected
    /// upstream when recorded-luminosity normalisation is requested).
    pub duration_s: BTreeMap<u32, f64>,
    /// Lumiblock index -> "ATLAS ready" flag.
    pub ready: BTreeMap<u32, bool>,
    /// All defect intervals retrieved for this run (including sign-off
    /// checkpoint records).
    pub defects: Vec<DefectInterval>,
    /// Veto name -> time windows.
    pub veto_windows: BTreeMap<String, Vec<VetoWindow>>,
    /// Veto name -> precomputed total vetoed time in nanoseconds, for the
    /// rough (time-weighted) veto policy.
    pub veto_time_ns: BTreeMap<String, u64>,
}

impl RunContext {
    /// Number of lumiblocks in the run.
    pub fn n_lb(&self) -> u32 {
        self.lb_timestamps.len() as u32
    }

    /// Luminosity weight of one lumiblock: duration x instantaneous
    /// luminosity. Missing entries count as zero.
    pub fn weight(&self, lb: u32) -> f64 {
        let lumi = self.inst_lumi.get(&lb).copied().unwrap_or(0.0);
        let dur = self.duration_s.get(&lb).copied().unwrap_or(0.0);
        lumi * dur
    }

    /// The lumiblock whose `[start, end)` timestamp range contains `t_ns`.
    /// Falls back to the last lumiblock when no range contains it (a veto
    /// window may end a few nanoseconds past the run).
    pub fn lb_at(&self, t_ns: u64) -> Option<u32> {
        for (&lb, &(start, end)) in &self.lb_timestamps {
            if t_ns >= start && t_ns < end {
                return Some(lb);
            }
        }
        self.lb_timestamps.keys().next_back().copied()
    }
}
