//! Period-indexed weighted-mean series.
//!
//! The archive's time axis is the list of data-taking periods, kept in
//! chronological order (alphabetic prefix, then numeric suffix). Each
//! (series, period) cell is an incrementally-updated weighted mean of loss
//! percentages, weighted by integrated luminosity; a reserved trailing
//! `"All"` bin accumulates over every period independently.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reserved label of the trailing all-periods bin.
pub const ALL_PERIODS: &str = "All";

/// Incrementally-updated weighted mean.
///
/// The update `mean += (value - mean) * w / (weight + w)` is algebraically
/// the standard weighted mean but numerically stable for weight sequences
/// spanning many orders of magnitude: a near-zero weight cannot perturb an
/// established mean materially, and a zero weight is an exact no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedMean {
    pub mean: f64,
    pub weight: f64,
}

impl WeightedMean {
    /// Fold one (value, weight) observation into the accumulator.
    pub fn add(&mut self, value: f64, w: f64) {
        if w <= 0.0 {
            return;
        }
        let new_weight = self.weight + w;
        self.mean += (value - self.mean) * (w / new_weight);
        self.weight = new_weight;
    }

    /// True when no weight has been accumulated yet.
    pub fn is_empty(&self) -> bool {
        self.weight == 0.0
    }
}

/// A defect-or-veto series name in the archive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeriesKey {
    /// One intolerable defect.
    Defect(String),
    /// The recoverable share of one intolerable defect.
    DefectRecoverable(String),
    /// Any intolerable defect, deduplicated.
    AnyIntolerable,
    /// Recoverable share of the deduplicated loss.
    AnyIntolerableRecoverable,
    /// One time-window veto.
    Veto(String),
    /// All vetoes summed (no-overlap approximation).
    AllVeto,
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defect(name) => write!(f, "defect:{name}"),
            Self::DefectRecoverable(name) => write!(f, "defect_recov:{name}"),
            Self::AnyIntolerable => f.write_str("any_intolerable"),
            Self::AnyIntolerableRecoverable => f.write_str("any_intolerable_recov"),
            Self::Veto(name) => write!(f, "veto:{name}"),
            Self::AllVeto => f.write_str("all_veto"),
        }
    }
}

impl FromStr for SeriesKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("defect_recov:") {
            Ok(Self::DefectRecoverable(name.to_string()))
        } else if let Some(name) = s.strip_prefix("defect:") {
            Ok(Self::Defect(name.to_string()))
        } else if let Some(name) = s.strip_prefix("veto:") {
            Ok(Self::Veto(name.to_string()))
        } else {
            match s {
                "any_intolerable" => Ok(Self::AnyIntolerable),
                "any_intolerable_recov" => Ok(Self::AnyIntolerableRecoverable),
                "all_veto" => Ok(Self::AllVeto),
                other => Err(format!("unknown series key '{other}'")),
            }
        }
    }
}

/// Chronological sort key of a period label: alphabetic part, then numeric
/// part ("B2" before "B10", "A..." before "B...").
pub fn period_sort_key(label: &str) -> (String, u32) {
    let letters: String = label.chars().filter(|c| !c.is_ascii_digit()).collect();
    let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
    (letters, digits.parse().unwrap_or(0))
}

/// The period-indexed weighted-mean table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeriodSeries {
    /// Period labels in chronological order; never contains
    /// [`ALL_PERIODS`].
    pub periods: Vec<String>,
    /// Series key (display form) -> period label or [`ALL_PERIODS`] ->
    /// accumulator.
    pub rows: BTreeMap<String, BTreeMap<String, WeightedMean>>,
    /// Period label or [`ALL_PERIODS`] -> accumulated integrated
    /// luminosity, independent of which series is queried.
    pub period_lumi: BTreeMap<String, f64>,
}

impl PeriodSeries {
    /// Extend the period axis with new labels, keeping chronological order.
    /// Returns the labels that were actually new.
    pub fn extend_periods<I>(&mut self, labels: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = Vec::new();
        for label in labels {
            if label == ALL_PERIODS || label == "?" {
                continue;
            }
            if !self.periods.contains(&label) {
                self.periods.push(label.clone());
                added.push(label);
            }
        }
        if !added.is_empty() {
            self.periods.sort_by_key(|p| period_sort_key(p));
        }
        added
    }

    /// Fold one run's (loss percentage, luminosity weight) into a series
    /// cell and into the trailing all-periods bin.
    pub fn accumulate(&mut self, key: &SeriesKey, period: &str, pct: f64, weight: f64) {
        let row = self.rows.entry(key.to_string()).or_default();
        row.entry(period.to_string()).or_default().add(pct, weight);
        row.entry(ALL_PERIODS.to_string())
            .or_default()
            .add(pct, weight);
    }

    /// Add integrated luminosity to a period (and the all-periods bin).
    pub fn add_period_lumi(&mut self, period: &str, lumi: f64) {
        *self.period_lumi.entry(period.to_string()).or_default() += lumi;
        *self.period_lumi.entry(ALL_PERIODS.to_string()).or_default() += lumi;
    }

    /// Accumulator of one (series, period) cell, if any weight was ever
    /// recorded there.
    pub fn cell(&self, key: &SeriesKey, period: &str) -> Option<WeightedMean> {
        self.rows.get(&key.to_string())?.get(period).copied()
    }

    /// True when nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.periods.is_empty()
    }
}
