//! Year-statistics update job.
//!
//! Processes the configured run list for one (system, year, tag), prints a
//! summary of per-run losses, and - when requested - merges the fully
//! signed-off runs into the persisted year statistics.
//!
//! ## Environment Variables
//! - `LUMILOSS_SYSTEM`: detector system (required), e.g. `LAr`
//! - `LUMILOSS_YEAR`: year label (required)
//! - `LUMILOSS_TAG`: defect tag (default: `AtlasReady`)
//! - `LUMILOSS_TABLES`: path to the system's classification tables TOML (required)
//! - `LUMILOSS_YEAR_TAG_CONFIG`: path to the year/tag properties TOML (required)
//! - `LUMILOSS_FIXTURES`: path to the run-fixture JSON consumed by the
//!   in-memory conditions provider (required)
//! - `RUST_LOG`: log level (default: info)
//!
//! See [`lumiloss::config::JobConfig::from_env`] for the remaining knobs
//! (update/reset flags, run range, veto policy).

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use lumiloss::config::{JobConfig, SystemTables, YearTagConfig};
use lumiloss::provider::LocalProvider;
use lumiloss::services::YearStatsUpdater;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(false)
        .init();

    let job = JobConfig::from_env()?;
    info!(
        system = %job.system,
        year = %job.year,
        tag = %job.tag,
        "starting year-statistics update"
    );

    let tables_path = required_path("LUMILOSS_TABLES")?;
    let tables = SystemTables::from_toml_file(&tables_path)
        .with_context(|| format!("loading classification tables from {}", tables_path.display()))?;

    let year_tag_path = required_path("LUMILOSS_YEAR_TAG_CONFIG")?;
    let year_tag = YearTagConfig::from_toml_file(&year_tag_path)
        .with_context(|| format!("loading year/tag properties from {}", year_tag_path.display()))?;
    info!(
        defect_tag = %year_tag.defect_tag,
        veto_tag = year_tag.veto_tag.as_deref().unwrap_or("-"),
        "using database tags"
    );

    let fixtures_path = required_path("LUMILOSS_FIXTURES")?;
    let provider = LocalProvider::from_json_file(&fixtures_path)?;

    let updater = YearStatsUpdater::new(&provider, &tables, &year_tag, &job);
    let summary = updater.run(Utc::now())?;

    for acc in &summary.accountings {
        info!(
            run = acc.run,
            period = %acc.period,
            signoff = %acc.signoff,
            loss_pct = acc.any_intolerable.pct,
            veto_pct = acc.all_veto.pct,
            "run processed"
        );
    }
    for (run, state) in &summary.excluded {
        info!(run, state = %state, "run excluded");
    }
    if let Some(merge) = &summary.merge {
        info!(
            merged = merge.merged.len(),
            already_processed = merge.already_processed.len(),
            not_signed_off = merge.not_signed_off.len(),
            new_periods = ?merge.new_periods,
            "year statistics updated"
        );
    }
    info!("done");
    Ok(())
}

fn required_path(var: &str) -> anyhow::Result<PathBuf> {
    env::var(var)
        .map(PathBuf::from)
        .with_context(|| format!("{var} environment variable not set"))
}
