//! Textual run reports and loss-ledger lines.
//!
//! Everything here only formats and appends; no computation. The per-run
//! summary is written to the year-statistics directory for runs that passed
//! at least the bulk review; loss-ledger lines are appended once per
//! (run, defect) for runs newly entering the fully-signed-off state.

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use chrono::{TimeZone, Utc};

use crate::config::SystemTables;
use crate::error::LossResult;
use crate::models::{RunAccounting, SignoffState, VetoPolicy};

/// Compress a sorted lumiblock list into a compact range string:
/// `[3, 4, 5, 8]` becomes `"3-5 8"`.
pub fn listify(lbs: &[u32]) -> String {
    if lbs.is_empty() {
        return String::new();
    }
    let mut sorted = lbs.to_vec();
    sorted.sort_unstable();
    let mut out = String::new();
    let mut range_start = sorted[0];
    let mut prev = sorted[0];
    for &lb in &sorted[1..] {
        if lb == prev + 1 {
            prev = lb;
            continue;
        }
        if range_start == prev {
            let _ = write!(out, "{range_start} ");
        } else {
            let _ = write!(out, "{range_start}-{prev} ");
        }
        range_start = lb;
        prev = lb;
    }
    if range_start == prev {
        let _ = write!(out, "{range_start}");
    } else {
        let _ = write!(out, "{range_start}-{prev}");
    }
    out
}

/// Integrated luminosity in a human-readable unit. Input is in inverse
/// microbarns.
pub fn format_lumi(lumi_ub: f64, float_number: bool) -> String {
    let (value, unit) = if lumi_ub < 1e3 {
        (lumi_ub, "ub-1")
    } else if lumi_ub < 1e6 {
        (lumi_ub / 1e3, "nb-1")
    } else if lumi_ub < 1e9 {
        (lumi_ub / 1e6, "pb-1")
    } else {
        (lumi_ub / 1e9, "fb-1")
    };
    if float_number {
        format!("{value:.2} {unit}")
    } else {
        format!("{value:.0} {unit}")
    }
}

fn format_time(ns: u64) -> String {
    match Utc.timestamp_opt((ns / 1_000_000_000) as i64, 0) {
        chrono::LocalResult::Single(t) => t.format("%a, %d %b %H:%M").to_string(),
        _ => "-".to_string(),
    }
}

/// Render the per-run textual summary.
pub fn single_run_report(acc: &RunAccounting, tables: &SystemTables) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run start : {}", format_time(acc.start_ns));
    let _ = writeln!(
        out,
        "Run stop  : {}",
        acc.end_ns.map(format_time).unwrap_or_else(|| "-".to_string())
    );
    let _ = writeln!(
        out,
        "LB with ATLAS ready                      = {}",
        listify(&acc.ready_lbs)
    );
    let _ = writeln!(
        out,
        "LB with ATLAS ready and no global defect = {}",
        listify(&acc.ready_filtered_lbs)
    );
    let _ = writeln!(out, "Nb of bunches                            = {}", acc.n_bunches);
    let _ = writeln!(out, "Peak lumi                                = {:.1e}", acc.peak_lumi);
    let _ = writeln!(
        out,
        "Integrated luminosity used for normalis. = {}",
        format_lumi(acc.total_lumi, true)
    );
    let _ = writeln!(
        out,
        "{} GRL inefficiency                      : {:.2}% / {}",
        tables.system,
        acc.any_intolerable.pct,
        format_lumi(acc.any_intolerable.lost, true)
    );

    for (name, lbs) in &acc.affected_lbs {
        if lbs.is_empty() {
            continue;
        }
        let pct = acc
            .intol_defect_loss
            .get(name)
            .or_else(|| acc.tol_defect_loss.get(name))
            .map(|e| e.pct)
            .unwrap_or(0.0);
        let _ = writeln!(
            out,
            "Nb of LBs with {:>24}: {} -> {:.2}% ({})",
            tables.description(name),
            lbs.len(),
            pct,
            listify(lbs)
        );
    }

    if !acc.veto_loss.is_empty() {
        match acc.veto_policy {
            VetoPolicy::Exact => {
                let _ = writeln!(
                    out,
                    "Veto inefficiency                        : {:.3}%",
                    acc.all_veto.pct
                );
            }
            VetoPolicy::Rough => {
                let _ = writeln!(
                    out,
                    "Veto inefficiency (rough computat.)      : {:.3}%",
                    acc.all_veto.pct
                );
            }
        }
        for (veto, entry) in &acc.veto_loss {
            let _ = writeln!(
                out,
                "{} veto inefficiency : {:.3}%",
                tables.description(veto),
                entry.pct
            );
        }
    }
    let _ = writeln!(out, "Sign-off status : {}", acc.signoff);
    out
}

/// Write the per-run report under `<dir>/Run/`. Runs that have not reached
/// the bulk-review stage go to a scratch file instead, as their content is
/// still expected to change.
pub fn write_run_report(dir: &Path, acc: &RunAccounting, tables: &SystemTables) -> LossResult<()> {
    let run_dir = dir.join("Run");
    fs::create_dir_all(&run_dir)?;
    let on_disk = matches!(acc.signoff, SignoffState::Done | SignoffState::FinalOk);
    let path = if on_disk {
        run_dir.join(format!("{}.txt", acc.run))
    } else {
        run_dir.join("scratch.txt")
    };
    fs::write(path, single_run_report(acc, tables))?;
    Ok(())
}

/// Append a line to a file unless an identical line is already present.
/// Keeps the loss ledgers idempotent across re-runs.
pub fn append_unique(path: &Path, line: &str) -> LossResult<bool> {
    if path.exists() {
        let existing = fs::read_to_string(path)?;
        if existing.lines().any(|l| l == line) {
            return Ok(false);
        }
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(true)
}

/// Append the per-defect and per-veto loss-ledger lines for a run that was
/// just merged into year statistics.
pub fn append_loss_ledger(dir: &Path, acc: &RunAccounting) -> LossResult<()> {
    let run_string = format!("{} ({:.0} ub-1)", acc.run, acc.total_lumi);

    for (name, entry) in acc.intol_defect_loss.iter().chain(&acc.tol_defect_loss) {
        if entry.lost <= 0.0 {
            continue;
        }
        let line = if let Some(recov) = acc.recov_defect_loss.get(name) {
            format!(
                "{run_string} -> {:.6} pb-1 (recov: {:.6} pb-1)",
                entry.lost / 1e6,
                recov.lost / 1e6
            )
        } else {
            format!("{run_string} -> {:.6} pb-1", entry.lost / 1e6)
        };
        append_unique(&dir.join(format!("loss-{name}.dat")), &line)?;
    }

    if acc.all_veto.pct > 0.0 {
        for (veto, entry) in &acc.veto_loss {
            if entry.lost <= 0.0 {
                continue;
            }
            let line = format!("{run_string} -> {:.6} pb-1", entry.lost / 1e6);
            append_unique(&dir.join(format!("loss-{veto}VETO.dat")), &line)?;
        }
    }
    Ok(())
}

/// Overwrite the not-yet-signed-off report with the current batch's
/// unmerged runs.
pub fn write_not_signed_off(
    dir: &Path,
    runs: &[(u32, String, SignoffState)],
) -> LossResult<()> {
    fs::create_dir_all(dir)?;
    let mut out = String::new();
    for (run, period, state) in runs {
        let _ = writeln!(out, "{run} (period {period}) -> Current status : {state}");
    }
    fs::write(dir.join("runs-notYetSignedOff.dat"), out)?;
    Ok(())
}

/// Append a recovered-condition warning to the warnings log.
pub fn append_warning(dir: &Path, message: &str) -> LossResult<()> {
    fs::create_dir_all(dir)?;
    append_unique(&dir.join("warnings.log"), message)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::example_tables;
    use crate::models::accounting::LossEntry;
    use std::collections::BTreeMap;

    fn sample_accounting() -> RunAccounting {
        let mut intol = BTreeMap::new();
        intol.insert("HVTRIP".to_string(), LossEntry { lost: 180.0, pct: 30.0 });
        let mut affected = BTreeMap::new();
        affected.insert("HVTRIP".to_string(), vec![3, 4, 5]);
        RunAccounting {
            run: 431812,
            period: "B1".to_string(),
            start_ns: 1_600_000_000_000_000_000,
            end_ns: Some(1_600_000_600_000_000_000),
            n_bunches: 2462,
            peak_lumi: 2.0,
            ready_lbs: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            ready_filtered_lbs: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            global_filter_applied: false,
            total_lumi: 600.0,
            intol_defect_loss: intol,
            tol_defect_loss: BTreeMap::new(),
            recov_defect_loss: BTreeMap::new(),
            any_intolerable: LossEntry { lost: 180.0, pct: 30.0 },
            any_recoverable: LossEntry { lost: 180.0, pct: 30.0 },
            any_irrecoverable: LossEntry::default(),
            veto_loss: BTreeMap::new(),
            all_veto: LossEntry::default(),
            veto_policy: VetoPolicy::Exact,
            signoff: SignoffState::FinalOk,
            affected_lbs: affected,
        }
    }

    #[test]
    fn listify_compresses_ranges() {
        assert_eq!(listify(&[]), "");
        assert_eq!(listify(&[7]), "7");
        assert_eq!(listify(&[3, 4, 5, 8]), "3-5 8");
        assert_eq!(listify(&[8, 3, 5, 4]), "3-5 8");
        assert_eq!(listify(&[1, 3, 5]), "1 3 5");
        assert_eq!(listify(&[1, 2, 3]), "1-3");
    }

    #[test]
    fn lumi_formatting_picks_the_unit() {
        assert_eq!(format_lumi(500.0, false), "500 ub-1");
        assert_eq!(format_lumi(2_500.0, false), "2 nb-1");
        assert_eq!(format_lumi(2_500_000.0, true), "2.50 pb-1");
        assert_eq!(format_lumi(3_000_000_000.0, true), "3.00 fb-1");
    }

    #[test]
    fn run_report_mentions_the_loss_and_the_lumiblocks() {
        let tables = example_tables();
        let report = single_run_report(&sample_accounting(), &tables);
        assert!(report.contains("LB with ATLAS ready                      = 1-10"));
        assert!(report.contains("High voltage trip"));
        assert!(report.contains("30.00%"));
        assert!(report.contains("3-5"));
        assert!(report.contains("FINAL OK"));
    }

    #[test]
    fn rough_veto_results_are_labeled() {
        let tables = example_tables();
        let mut acc = sample_accounting();
        acc.veto_policy = VetoPolicy::Rough;
        acc.veto_loss
            .insert("noiseBurst".to_string(), LossEntry { lost: 3e10, pct: 0.5 });
        acc.all_veto = LossEntry { lost: 3e10, pct: 0.5 };
        let report = single_run_report(&acc, &tables);
        assert!(report.contains("rough computat."));
    }

    #[test]
    fn append_unique_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss-HVTRIP.dat");
        assert!(append_unique(&path, "run 100 -> 1 pb-1").unwrap());
        assert!(!append_unique(&path, "run 100 -> 1 pb-1").unwrap());
        assert!(append_unique(&path, "run 101 -> 2 pb-1").unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn signed_off_reports_land_under_their_run_number() {
        let dir = tempfile::tempdir().unwrap();
        let tables = example_tables();
        let acc = sample_accounting();
        write_run_report(dir.path(), &acc, &tables).unwrap();
        assert!(dir.path().join("Run/431812.txt").exists());

        let mut pending = sample_accounting();
        pending.run = 431813;
        pending.signoff = SignoffState::Expr;
        write_run_report(dir.path(), &pending, &tables).unwrap();
        assert!(!dir.path().join("Run/431813.txt").exists());
        assert!(dir.path().join("Run/scratch.txt").exists());
    }

    #[test]
    fn loss_ledger_carries_the_recoverable_share() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = sample_accounting();
        acc.recov_defect_loss
            .insert("HVTRIP".to_string(), LossEntry { lost: 180.0, pct: 30.0 });
        append_loss_ledger(dir.path(), &acc).unwrap();
        let content = std::fs::read_to_string(dir.path().join("loss-HVTRIP.dat")).unwrap();
        assert!(content.contains("recov: 0.000180 pb-1"));
        // Appending the same run again leaves a single line.
        append_loss_ledger(dir.path(), &acc).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
