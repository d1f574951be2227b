//! Persisted year-statistics archive.
//!
//! One JSON document per (system, year, tag) holds the period series, the
//! processed-run ledger and the last-reset timestamp. Saves are atomic:
//! the new document is written beside the old one and moved into place with
//! a rename, so an interrupted invocation leaves the archive in its
//! pre-run state.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::ledger::ProcessedRunLedger;
use crate::archive::series::PeriodSeries;
use crate::error::{LossError, LossResult};

/// File name of the archive document inside the year-statistics directory.
pub const ARCHIVE_FILE: &str = "year-stats.json";

/// The complete persisted archive state for one (system, year, tag).
///
/// Always passed into and returned from the merger as an explicit value;
/// there is no ambient store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YearStatsArchive {
    pub series: PeriodSeries,
    pub ledger: ProcessedRunLedger,
    /// When the archive was last rebuilt from scratch.
    pub last_reset: Option<DateTime<Utc>>,
}

/// Loads and saves the archive document for one year-statistics directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_path(&self) -> PathBuf {
        self.dir.join(ARCHIVE_FILE)
    }

    /// Load the archive, forcing a reset when the document is missing or
    /// empty where continuation was expected. The forced reset is a notable
    /// event, not an error: it is how the very first invocation starts.
    /// Returns the archive and whether a reset was forced.
    pub fn load_or_reset(&self) -> LossResult<(YearStatsArchive, bool)> {
        let path = self.archive_path();
        if !path.exists() {
            warn!(path = %path.display(), "no archive found, starting from scratch");
            return Ok((YearStatsArchive::default(), true));
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| LossError::archive(&path, format!("read failed: {e}")))?;
        if raw.trim().is_empty() {
            warn!(path = %path.display(), "archive file is empty, forcing a reset");
            return Ok((YearStatsArchive::default(), true));
        }
        let archive: YearStatsArchive = serde_json::from_str(&raw)
            .map_err(|e| LossError::archive(&path, format!("parse failed: {e}")))?;
        Ok((archive, false))
    }

    /// Write the archive atomically: serialize to a sibling temporary file,
    /// then rename over the old document.
    pub fn save(&self, archive: &YearStatsArchive) -> LossResult<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.archive_path();
        let tmp = self.dir.join(format!("{ARCHIVE_FILE}.tmp"));
        let raw = serde_json::to_string_pretty(archive)
            .map_err(|e| LossError::archive(&path, format!("serialize failed: {e}")))?;
        fs::write(&tmp, raw)
            .map_err(|e| LossError::archive(&tmp, format!("write failed: {e}")))?;
        fs::rename(&tmp, &path)
            .map_err(|e| LossError::archive(&path, format!("rename failed: {e}")))?;
        info!(path = %path.display(), "archive saved");
        Ok(())
    }

    /// Clear all accumulators and the ledger, stamping the reset time. The
    /// merge then restarts from an empty archive; this is the only
    /// operation allowed to overwrite already-accumulated means.
    pub fn reset(&self, now: DateTime<Utc>) -> YearStatsArchive {
        warn!(dir = %self.dir.display(), "resetting year statistics");
        YearStatsArchive {
            last_reset: Some(now),
            ..Default::default()
        }
    }
}
