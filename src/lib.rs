//! # lumiloss
//!
//! Luminosity-loss accounting engine for detector data quality.
//!
//! Computes, per data-taking run and incrementally over a data-taking year,
//! which fraction of the delivered collision luminosity is lost to detector
//! defects and time-window vetoes, and which part of the loss is
//! recoverable.
//!
//! ## Features
//!
//! - **Attribution**: defect and veto intervals mapped onto discrete
//!   lumiblocks, with a machine-state global filter and deduplication of
//!   overlapping defects into a single "any intolerable" indicator
//! - **Aggregation**: loss fractions weighted by instantaneous luminosity
//!   x lumiblock duration, with exact and rough veto policies
//! - **Sign-off gating**: runs enter the permanent statistics only after
//!   the expert -> bulk -> final review chain completes
//! - **Incremental archive**: a period-indexed weighted-mean time series
//!   that never double-counts a run and supports full rebuild
//! - **Single-writer guard**: one archive writer per (system, year, tag)
//!
//! ## Architecture
//!
//! The crate is organized into several logical modules:
//!
//! - [`models`]: per-run data model (contexts, membership, accounting)
//! - [`config`]: defect classification tables and year/tag properties
//! - [`provider`]: conditions/metadata service interface
//! - [`services`]: attribution, aggregation, sign-off, orchestration
//! - [`archive`]: persisted year statistics, ledger and lock guard

pub mod archive;
pub mod config;
pub mod error;
pub mod models;
pub mod provider;
pub mod services;

pub use error::{LossError, LossResult};
