//! Identifiers and the monitor / subprobe / reading hierarchy.

mod monitor;

pub use monitor::*;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Row id of a monitor. Zero means "not yet saved".
    MonitorId(i64)
);
id_type!(SubprobeId(i64));
id_type!(ReadingId(i64));
id_type!(TriggerId(i64));
id_type!(
    /// Row id of a silence. Zero means "not yet saved".
    SilenceId(i64)
);
id_type!(DatasourceId(i64));
id_type!(LabelId(i64));
id_type!(
    /// Registered probe kind, stored next to the encoded probe.
    ProbeType(u16)
);
id_type!(
    /// Registered target kind, stored next to the encoded target.
    TargetTypeId(u16)
);
id_type!(
    /// Registered datasource kind.
    SourceType(u16)
);

/// Flat string-to-string view of a configuration for the presentation
/// layer. Absent values are empty strings.
pub type DisplayFields = BTreeMap<String, String>;

/// Template ids keyed by page role (`"edit"`, `"view"`).
pub type Templates = BTreeMap<&'static str, &'static str>;

/// Script names keyed by page role.
pub type Scripts = BTreeMap<&'static str, Vec<&'static str>>;

/// Severity derived from a probe, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    #[default]
    Normal,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Normal,
        AlertLevel::Warning,
        AlertLevel::Error,
        AlertLevel::Critical,
    ];

    pub fn as_i64(self) -> i64 {
        match self {
            AlertLevel::Normal => 0,
            AlertLevel::Warning => 1,
            AlertLevel::Error => 2,
            AlertLevel::Critical => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        AlertLevel::ALL.into_iter().find(|l| l.as_i64() == v)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete thing evaluated under a monitor, e.g. a host or shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subprobe {
    pub id: SubprobeId,
    pub monitor_id: MonitorId,
    pub name: String,
}

/// An immutable evaluation result for a subprobe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: ReadingId,
    pub subprobe_id: SubprobeId,
    pub recorded: DateTime<Utc>,
    pub level: AlertLevel,
    /// Opaque value written by whoever produced the reading.
    pub value: String,
}
