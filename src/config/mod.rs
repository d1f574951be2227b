//! Static configuration: defect classification tables and year/tag
//! properties.
//!
//! The classification tables partition each detector system's defect names
//! into partition/global x tolerable/intolerable sets, list its veto names
//! and sign-off checkpoints, and carry display descriptions. They are
//! external data: resolved once at startup from TOML files and treated as
//! immutable afterwards.

mod job;

pub use job::JobConfig;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LossError, LossResult};

/// Detector systems with monitored defect tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DetectorSystem {
    Pixel,
    Sct,
    Trt,
    Lar,
    Tile,
    Csc,
    Mdt,
    Rpc,
    Tgc,
    IdGlobal,
    CaloGlobal,
    Btag,
    Trigger,
    Global,
}

impl DetectorSystem {
    /// Canonical name, as used in archive directories and lock markers.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pixel => "Pixel",
            Self::Sct => "SCT",
            Self::Trt => "TRT",
            Self::Lar => "LAr",
            Self::Tile => "Tile",
            Self::Csc => "CSC",
            Self::Mdt => "MDT",
            Self::Rpc => "RPC",
            Self::Tgc => "TGC",
            Self::IdGlobal => "IDGlobal",
            Self::CaloGlobal => "CaloGlobal",
            Self::Btag => "BTag",
            Self::Trigger => "Trig",
            Self::Global => "Global",
        }
    }
}

impl FromStr for DetectorSystem {
    type Err = LossError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pixel" => Ok(Self::Pixel),
            "sct" => Ok(Self::Sct),
            "trt" => Ok(Self::Trt),
            "lar" => Ok(Self::Lar),
            "tile" => Ok(Self::Tile),
            "csc" => Ok(Self::Csc),
            "mdt" => Ok(Self::Mdt),
            "rpc" => Ok(Self::Rpc),
            "tgc" => Ok(Self::Tgc),
            "idglobal" => Ok(Self::IdGlobal),
            "caloglobal" => Ok(Self::CaloGlobal),
            "btag" => Ok(Self::Btag),
            "trig" | "trigger" => Ok(Self::Trigger),
            "global" => Ok(Self::Global),
            other => Err(LossError::config(format!(
                "unknown detector system '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for DetectorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How one defect name is classified by the system tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectClass {
    PartitionIntolerable,
    PartitionTolerable,
    GlobalIntolerable,
    GlobalTolerable,
}

impl DefectClass {
    pub fn is_intolerable(self) -> bool {
        matches!(self, Self::PartitionIntolerable | Self::GlobalIntolerable)
    }

    pub fn is_partitioned(self) -> bool {
        matches!(self, Self::PartitionIntolerable | Self::PartitionTolerable)
    }
}

/// Defect classification tables for one detector system.
///
/// Deserialized from a TOML document; see `demos/tables-example.toml` for
/// the layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemTables {
    pub system: DetectorSystem,
    /// Channel-name prefixes owned by this system. A defect with no
    /// classification entry still participates in the "any intolerable"
    /// bookkeeping when its channel matches one of these.
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Partitions of this system, in display order.
    #[serde(default)]
    pub partitions: Vec<String>,
    #[serde(default)]
    pub partition_intolerable: Vec<String>,
    #[serde(default)]
    pub partition_tolerable: Vec<String>,
    #[serde(default)]
    pub global_intolerable: Vec<String>,
    #[serde(default)]
    pub global_tolerable: Vec<String>,
    /// Veto names, empty for systems without time-window vetoes.
    #[serde(default)]
    pub vetoes: Vec<String>,
    /// Channel names marking the expert-review checkpoint.
    #[serde(default)]
    pub signoff_expert: Vec<String>,
    /// Channel names marking the bulk-review checkpoint.
    #[serde(default)]
    pub signoff_bulk: Vec<String>,
    /// Channel names marking the final-review checkpoint.
    #[serde(default)]
    pub signoff_final: Vec<String>,
    /// Machine-state defect channels that exclude lumiblocks wholesale
    /// before any per-system accounting.
    #[serde(default)]
    pub global_filter_defects: Vec<String>,
    /// Display description per defect/veto name.
    #[serde(default)]
    pub descriptions: BTreeMap<String, String>,
    /// Veto name -> channel name in the conditions database.
    #[serde(default)]
    pub veto_db_channels: BTreeMap<String, String>,
}

impl SystemTables {
    /// Load the tables for one system from a TOML file.
    pub fn from_toml_file(path: &Path) -> LossResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LossError::config(format!("cannot read tables {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            LossError::config(format!("cannot parse tables {}: {e}", path.display()))
        })
    }

    /// Classify a bare defect name, `None` when the tables do not list it.
    pub fn classify(&self, name: &str) -> Option<DefectClass> {
        if self.partition_intolerable.iter().any(|n| n == name) {
            Some(DefectClass::PartitionIntolerable)
        } else if self.partition_tolerable.iter().any(|n| n == name) {
            Some(DefectClass::PartitionTolerable)
        } else if self.global_intolerable.iter().any(|n| n == name) {
            Some(DefectClass::GlobalIntolerable)
        } else if self.global_tolerable.iter().any(|n| n == name) {
            Some(DefectClass::GlobalTolerable)
        } else {
            None
        }
    }

    /// Whether a full channel name belongs to this system.
    pub fn owns_channel(&self, channel: &str) -> bool {
        self.prefixes.iter().any(|p| channel.starts_with(p.as_str()))
    }

    /// Display description for a defect or veto name. Unknown names get a
    /// placeholder so reports stay readable.
    pub fn description(&self, name: &str) -> String {
        self.descriptions
            .get(name)
            .cloned()
            .unwrap_or_else(|| format!("Unclassified ({name})"))
    }

    /// All intolerable defect names, partition and global.
    pub fn intolerable_names(&self) -> impl Iterator<Item = &String> {
        self.partition_intolerable
            .iter()
            .chain(self.global_intolerable.iter())
    }

    /// Whether a channel name is one of the sign-off checkpoints.
    pub fn is_signoff_channel(&self, channel: &str) -> bool {
        self.signoff_expert.iter().any(|c| c == channel)
            || self.signoff_bulk.iter().any(|c| c == channel)
            || self.signoff_final.iter().any(|c| c == channel)
    }
}

/// Year/tag properties: which database tags the conditions provider should
/// be queried with. Loaded from a per-(year, tag) TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearTagConfig {
    pub description: String,
    /// Tag for the defect database.
    pub defect_tag: String,
    /// Tag for the veto folders; absent for systems without vetoes.
    #[serde(default)]
    pub veto_tag: Option<String>,
    /// Offline luminosity tag.
    pub lumi_tag: String,
    /// Luminosity-accounting tag (precise lumiblock durations and live
    /// fractions).
    pub lumi_acct_tag: String,
}

impl YearTagConfig {
    pub fn from_toml_file(path: &Path) -> LossResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LossError::config(format!(
                "cannot read year/tag properties {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str(&raw).map_err(|e| {
            LossError::config(format!(
                "cannot parse year/tag properties {}: {e}",
                path.display()
            ))
        })
    }
}

#[cfg(test)]
pub(crate) fn example_tables() -> SystemTables {
    SystemTables {
        system: DetectorSystem::Lar,
        prefixes: vec!["LAR".to_string(), "CALO_ONLINEDB".to_string()],
        partitions: ["EMBA", "EMBC", "EMECA", "EMECC"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        partition_intolerable: vec!["HVTRIP".to_string(), "SEVNOISEBURST".to_string()],
        partition_tolerable: vec!["COVERAGE".to_string()],
        global_intolerable: vec!["DATACORRUPT".to_string(), "BADTIMING".to_string()],
        global_tolerable: vec![],
        descriptions: [
            ("HVTRIP", "High voltage trip"),
            ("SEVNOISEBURST", "Noise burst"),
            ("COVERAGE", "Coverage (tolerable)"),
            ("DATACORRUPT", "Data corruption"),
            ("BADTIMING", "Bad timing"),
            ("noiseBurst", "Noise burst veto"),
            ("corruption", "Data corruption veto"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
        vetoes: vec!["noiseBurst".to_string(), "corruption".to_string()],
        veto_db_channels: [("noiseBurst", "allNoise"), ("corruption", "allCorruption")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        signoff_expert: vec!["LAR_UNCHECKED".to_string()],
        signoff_bulk: vec!["LAR_BULK_UNCHECKED".to_string()],
        signoff_final: vec!["LAR_UNCHECKED_FINAL".to_string()],
        global_filter_defects: vec![
            "GLOBAL_LHC_COMMISSIONING".to_string(),
            "GLOBAL_NOTCONSIDERED".to_string(),
        ],
    }
}
