//! Single-writer concurrency guard.
//!
//! Exactly one invocation may mutate the archive of a given
//! (system, year, tag) at a time. The guard is a presence-checked marker
//! file created before any archive mutation; a second invocation finding
//! the marker refuses to run and reports which marker blocks it, rather
//! than queuing or retrying. The marker is removed on drop, so every exit
//! path - including error paths - releases it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::DetectorSystem;
use crate::error::{LossError, LossResult};

/// Scoped single-writer lock over one archive.
#[derive(Debug)]
pub struct UpdateGuard {
    marker: PathBuf,
}

impl UpdateGuard {
    /// Marker path for a (system, year, tag) under the given directory.
    pub fn marker_path(dir: &Path, system: DetectorSystem, year: &str, tag: &str) -> PathBuf {
        dir.join(format!("update-{system}-{year}-{tag}.lock"))
    }

    /// Acquire the lock, creating the marker file. Fails with
    /// [`LossError::ConcurrencyConflict`] when the marker already exists.
    pub fn acquire(
        dir: &Path,
        system: DetectorSystem,
        year: &str,
        tag: &str,
    ) -> LossResult<Self> {
        std::fs::create_dir_all(dir)?;
        let marker = Self::marker_path(dir, system, year, tag);
        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker);
        match created {
            Ok(mut file) => {
                // Stamp the owner so a stale marker can be investigated.
                let _ = writeln!(file, "acquired {}", chrono::Utc::now().to_rfc3339());
                info!(marker = %marker.display(), "acquired archive lock");
                Ok(Self { marker })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LossError::ConcurrencyConflict { marker })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.marker) {
            warn!(
                marker = %self.marker.display(),
                "failed to remove lock marker: {e}"
            );
        } else {
            info!(marker = %self.marker.display(), "released archive lock");
        }
    }
}
