//! In-memory conditions provider.
//!
//! Stores complete per-run fixtures in memory, providing fast,
//! deterministic and isolated execution for unit tests, local development
//! and fixture-driven batch runs. Fixtures can be assembled in code or
//! loaded from a JSON document.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{LossError, LossResult};
use crate::models::{DefectInterval, RunMetadata, VetoWindow};
use crate::provider::ConditionsProvider;

/// Complete conditions data for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFixture {
    pub metadata: RunMetadata,
    pub lb_timestamps: BTreeMap<u32, (u64, u64)>,
    pub inst_lumi: BTreeMap<u32, f64>,
    pub duration_s: BTreeMap<u32, f64>,
    pub ready: BTreeMap<u32, bool>,
    #[serde(default)]
    pub defects: Vec<DefectInterval>,
    #[serde(default)]
    pub veto_windows: BTreeMap<String, Vec<VetoWindow>>,
    #[serde(default)]
    pub veto_time_ns: BTreeMap<String, u64>,
}

impl RunFixture {
    /// A run of `n_lb` lumiblocks, all ready, with uniform duration and
    /// instantaneous luminosity. Lumiblock indices start at 1; timestamps
    /// are laid out contiguously from `start_ns`.
    pub fn uniform(run: u32, n_lb: u32, duration_s: f64, inst_lumi: f64) -> Self {
        let start_ns = 1_600_000_000_000_000_000u64;
        let step_ns = (duration_s * 1e9) as u64;
        let mut lb_timestamps = BTreeMap::new();
        let mut lumi = BTreeMap::new();
        let mut duration = BTreeMap::new();
        let mut ready = BTreeMap::new();
        for i in 0..n_lb {
            let lb = i + 1;
            let s = start_ns + u64::from(i) * step_ns;
            lb_timestamps.insert(lb, (s, s + step_ns));
            lumi.insert(lb, inst_lumi);
            duration.insert(lb, duration_s);
            ready.insert(lb, true);
        }
        let end_ns = start_ns + u64::from(n_lb) * step_ns;
        Self {
            metadata: RunMetadata {
                run,
                start_ns,
                end_ns: Some(end_ns),
                periods: vec![],
                n_bunches: 0,
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

    /// Assign the run to a period.
    pub fn with_period(mut self, period: &str) -> Self {
        self.metadata.periods = vec![period.to_string()];
        self
    }

    /// Add a defect interval.
    pub fn with_defect(mut self, defect: DefectInterval) -> Self {
        self.defects.push(defect);
        self
    }
}

/// In-memory provider over a set of [`RunFixture`]s.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LocalProvider {
    runs: BTreeMap<u32, RunFixture>,
}

impl LocalProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load fixtures from a JSON document: a map of run number to fixture.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run fixtures from {}", path.display()))?;
        let runs: BTreeMap<u32, RunFixture> =
            serde_json::from_str(&raw).context("Failed to parse run fixture JSON")?;
        Ok(Self { runs })
    }

    /// Add or replace a run fixture.
    pub fn insert(&mut self, fixture: RunFixture) {
        self.runs.insert(fixture.metadata.run, fixture);
    }

    fn fixture(&self, run: u32) -> LossResult<&RunFixture> {
        self.runs
            .get(&run)
            .ok_or_else(|| LossError::provider(run, "run not present in fixture set"))
    }
}

impl ConditionsProvider for LocalProvider {
    fn known_runs(&self) -> Vec<u32> {
        self.runs.keys().copied().collect()
    }

    fn run_metadata(&self, run: u32) -> LossResult<RunMetadata> {
        Ok(self.fixture(run)?.metadata.clone())
    }

    fn lumiblock_timestamps(&self, run: u32) -> LossResult<BTreeMap<u32, (u64, u64)>> {
        Ok(self.fixture(run)?.lb_timestamps.clone())
    }

    fn lumiblock_luminosity(&self, run: u32, _lumi_tag: &str) -> LossResult<BTreeMap<u32, f64>> {
        Ok(self.fixture(run)?.inst_lumi.clone())
    }

    fn lumiblock_duration(
        &self,
        run: u32,
        _lumi_acct_tag: &str,
    ) -> LossResult<BTreeMap<u32, f64>> {
        Ok(self.fixture(run)?.duration_s.clone())
    }

    fn ready_flags(&self, run: u32) -> LossResult<BTreeMap<u32, bool>> {
        Ok(self.fixture(run)?.ready.clone())
    }

    fn defect_intervals(
        &self,
        run: u32,
        _defect_tag: &str,
        prefixes: &[String],
        channels: &[String],
    ) -> LossResult<Vec<DefectInterval>> {
        let fixture = self.fixture(run)?;
        Ok(fixture
            .defects
            .iter()
            .filter(|d| {
                prefixes.iter().any(|p| d.channel.starts_with(p.as_str()))
                    || channels.iter().any(|c| c == &d.channel)
            })
            .cloned()
            .collect())
    }

    fn veto_windows(
        &self,
        run: u32,
        _veto_tag: &str,
        veto_names: &[String],
    ) -> LossResult<BTreeMap<String, Vec<VetoWindow>>> {
        let fixture = self.fixture(run)?;
        Ok(fixture
            .veto_windows
            .iter()
            .filter(|(name, _)| veto_names.contains(name))
            .map(|(name, windows)| (name.clone(), windows.clone()))
            .collect())
    }

    fn veto_time_totals(
        &self,
        run: u32,
        _veto_tag: &str,
        veto_names: &[String],
    ) -> LossResult<BTreeMap<String, u64>> {
        let fixture = self.fixture(run)?;
        Ok(fixture
            .veto_time_ns
            .iter()
            .filter(|(name, _)| veto_names.contains(name))
            .map(|(name, &ns)| (name.clone(), ns))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_fixture_lays_out_contiguous_lumiblocks() {
        let fixture = RunFixture::uniform(100, 10, 60.0, 1.0);
        assert_eq!(fixture.lb_timestamps.len(), 10);
        let (s1, e1) = fixture.lb_timestamps[&1];
        let (s2, _) = fixture.lb_timestamps[&2];
        assert_eq!(e1, s2);
        assert_eq!(e1 - s1, 60_000_000_000);
        assert_eq!(fixture.metadata.end_ns, Some(s1 + 600_000_000_000));
    }

    #[test]
    fn defect_retrieval_filters_on_prefix_and_channel() {
        let mut provider = LocalProvider::new();
        let fixture = RunFixture::uniform(100, 5, 60.0, 1.0)
            .with_defect(DefectInterval {
                name: "HVTRIP".to_string(),
                channel: "LAR_EMBA_HVTRIP".to_string(),
                partition: Some("EMBA".to_string()),
                since_lb: 1,
                until_lb: 3,
                recoverable: true,
            })
            .with_defect(DefectInterval {
                name: "DISABLED".to_string(),
                channel: "PIXEL_BARREL_DISABLED".to_string(),
                partition: Some("BARREL".to_string()),
                since_lb: 1,
                until_lb: 2,
                recoverable: false,
            });
        provider.insert(fixture);

        let got = provider
            .defect_intervals(100, "HEAD", &["LAR".to_string()], &[])
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "HVTRIP");
    }

    #[test]
    fn unknown_run_is_a_provider_error() {
        let provider = LocalProvider::new();
        assert!(provider.run_metadata(1).is_err());
    }

    #[test]
    fn fixtures_round_trip_through_json() {
        let mut provider = LocalProvider::new();
        provider.insert(RunFixture::uniform(100, 3, 60.0, 2.0).with_period("B1"));
        let raw = serde_json::to_string(&provider.runs).unwrap();
        let back: BTreeMap<u32, RunFixture> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back[&100].metadata.periods, vec!["B1".to_string()]);
    }
}
