//! Batch-job configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::DetectorSystem;
use crate::error::{LossError, LossResult};
use crate::models::VetoPolicy;

/// Configuration for one invocation of the update job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Detector system whose tables and archive are used.
    pub system: DetectorSystem,
    /// Data-taking year label (may carry special conditions, e.g. "2023-5TeV").
    pub year: String,
    /// Defect tag selecting the run list and archive, e.g. "AtlasReady".
    pub tag: String,
    /// Directory holding run lists and configuration data.
    pub run_list_dir: PathBuf,
    /// Directory holding per-(system, year, tag) year-statistics archives.
    pub stats_dir: PathBuf,
    /// Merge fully-signed-off runs into the year statistics.
    pub update_year_stats: bool,
    /// Clear the archive and rebuild from scratch.
    pub reset_year_stats: bool,
    /// Drop runs already in the processed-run ledger before processing.
    pub skip_already_updated: bool,
    /// Apply the machine-state global filter.
    pub global_filter: bool,
    /// Consider time-window vetoes at all.
    pub use_veto: bool,
    /// Default veto-inefficiency policy; individual runs may be forced to
    /// the rough policy via the rough-veto run list.
    pub veto_policy: VetoPolicy,
    /// Optional inclusive run range restricting the run list.
    pub run_range: Option<(u32, u32)>,
}

impl JobConfig {
    /// Create a job configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `LUMILOSS_SYSTEM` (required): detector system, e.g. `LAr`, `Pixel`
    /// - `LUMILOSS_YEAR` (required): year label
    /// - `LUMILOSS_TAG` (optional, default `AtlasReady`): defect tag
    /// - `LUMILOSS_RUNLIST_DIR` (optional, default `./YearStats-common`)
    /// - `LUMILOSS_STATS_DIR` (optional, default `.`)
    /// - `LUMILOSS_UPDATE` (optional): `1`/`true` to update year statistics
    /// - `LUMILOSS_RESET` (optional): `1`/`true` to reset the archive
    /// - `LUMILOSS_SKIP_UPDATED` (optional): skip already-merged runs
    /// - `LUMILOSS_NO_GLOBAL_FILTER` (optional): disable the global filter
    /// - `LUMILOSS_NO_VETO` (optional): ignore veto information
    /// - `LUMILOSS_ROUGH_VETO` (optional): use the rough veto policy
    /// - `LUMILOSS_RUN_RANGE` (optional): `RUN` or `FIRST-LAST`, inclusive
    ///
    /// # Errors
    /// Returns an error if required variables are not set or unparsable.
    pub fn from_env() -> LossResult<Self> {
        let system = env::var("LUMILOSS_SYSTEM")
            .map_err(|_| LossError::config("LUMILOSS_SYSTEM environment variable not set"))?
            .parse::<DetectorSystem>()?;
        let year = env::var("LUMILOSS_YEAR")
            .map_err(|_| LossError::config("LUMILOSS_YEAR environment variable not set"))?;
        let tag = env::var("LUMILOSS_TAG").unwrap_or_else(|_| "AtlasReady".to_string());
        let run_list_dir = env::var("LUMILOSS_RUNLIST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("YearStats-common"));
        let stats_dir = env::var("LUMILOSS_STATS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let veto_policy = if flag("LUMILOSS_ROUGH_VETO") {
            VetoPolicy::Rough
        } else {
            VetoPolicy::Exact
        };

        let run_range = match env::var("LUMILOSS_RUN_RANGE") {
            Ok(raw) => Some(parse_run_range(&raw)?),
            Err(_) => None,
        };

        Ok(Self {
            system,
            year,
            tag,
            run_list_dir,
            stats_dir,
            update_year_stats: flag("LUMILOSS_UPDATE"),
            reset_year_stats: flag("LUMILOSS_RESET"),
            skip_already_updated: flag("LUMILOSS_SKIP_UPDATED"),
            global_filter: !flag("LUMILOSS_NO_GLOBAL_FILTER"),
            use_veto: !flag("LUMILOSS_NO_VETO"),
            veto_policy,
            run_range,
        })
    }

    /// `runlist-<year>-<tag>.dat` under the run-list directory.
    pub fn run_list_path(&self) -> PathBuf {
        self.run_list_dir
            .join(&self.year)
            .join(format!("runlist-{}-{}.dat", self.year, self.tag))
    }

    /// `roughVeto-<year>.dat`: runs forced to the rough veto policy.
    pub fn rough_veto_list_path(&self) -> PathBuf {
        self.run_list_dir
            .join(&self.year)
            .join(format!("roughVeto-{}.dat", self.year))
    }

    /// Archive directory for this (system, year, tag).
    pub fn year_stats_dir(&self) -> PathBuf {
        self.stats_dir
            .join(format!("YearStats-{}", self.system))
            .join(&self.year)
            .join(&self.tag)
    }
}

fn flag(var: &str) -> bool {
    env::var(var)
        .map(|v| {
            let v = v.to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}

fn parse_run_range(raw: &str) -> LossResult<(u32, u32)> {
    let parse = |s: &str| {
        u32::from_str(s.trim())
            .map_err(|_| LossError::config(format!("invalid run number '{s}' in LUMILOSS_RUN_RANGE")))
    };
    match raw.split_once('-') {
        Some((first, last)) => {
            let (first, last) = (parse(first)?, parse(last)?);
            if first > last {
                return Err(LossError::config(format!(
                    "empty run range {first}-{last}"
                )));
            }
            Ok((first, last))
        }
        None => {
            let run = parse(raw)?;
            Ok((run, run))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_range_parses_single_run_and_span() {
        assert_eq!(parse_run_range("431812").unwrap(), (431812, 431812));
        assert_eq!(parse_run_range("430000-431812").unwrap(), (430000, 431812));
        assert!(parse_run_range("431812-430000").is_err());
        assert!(parse_run_range("x").is_err());
    }
}
