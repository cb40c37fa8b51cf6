//! Probe model: pluggable strategies that turn metric datapoints into an
//! alert level.
//!
//! Every probe kind owns three encodings of its configuration:
//! - the user-submitted payload, with periods as a count plus a unit;
//! - the stored payload, with periods normalised to milliseconds and no
//!   type tag (the [`ProbeType`] lives in the owning monitor row);
//! - the display fields handed to the presentation layer.

mod graphite;

pub use graphite::*;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datasource::{DatasourceLookup, DatasourceRecord};
use crate::error::ModelError;
use crate::model::{AlertLevel, DatasourceId, DisplayFields, ProbeType, Scripts, SourceType, Templates};

/// A registered kind of probe.
pub trait ProbeKind: Send + Sync {
    fn id(&self) -> ProbeType;

    /// Stable, human-readable name.
    fn name(&self) -> &'static str;

    /// Parse an edit-form payload. Performs no storage reads.
    fn load_from_user_input(&self, raw: &str) -> Result<Box<dyn Probe>, ModelError>;

    /// Parse a stored payload and resolve its datasource through `tx`.
    fn load_from_storage(
        &self,
        encoded: &str,
        tx: &dyn DatasourceLookup,
    ) -> Result<Box<dyn Probe>, ModelError>;

    /// Zero-valued instance backing an empty edit form.
    fn blank(&self) -> Box<dyn Probe>;

    /// Datasource kinds this probe can read from.
    fn accepted_source_kinds(&self) -> &'static [SourceType];

    fn templates(&self) -> Templates;

    fn scripts(&self) -> Scripts {
        Scripts::new()
    }
}

/// A loaded probe configuration.
pub trait Probe: fmt::Debug + Send + Sync {
    fn kind(&self) -> ProbeType;

    fn uses_datasource(&self, id: DatasourceId) -> bool;

    fn to_display_fields(&self) -> DisplayFields;

    fn to_storage_encoding(&self) -> Result<String, ModelError>;

    /// Human-readable problems with the configuration, in a stable order.
    /// Empty means valid.
    fn validate(&self) -> Vec<String>;

    /// Derive an alert level from the datapoints fetched for one subprobe.
    fn assess(&self, points: &[DataPoint], now: DateTime<Utc>) -> Assessment;
}

/// One metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Outcome of [`Probe::assess`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub level: AlertLevel,
    /// The aggregate the thresholds were compared against, if any points
    /// fell inside the audit window.
    pub value: Option<f64>,
}

/// Fetch the datasource a probe points at and check the probe accepts its
/// kind.
pub fn resolve_datasource(
    kind: &dyn ProbeKind,
    id: DatasourceId,
    tx: &dyn DatasourceLookup,
) -> Result<DatasourceRecord, ModelError> {
    let record = tx
        .load_datasource(id)?
        .ok_or(ModelError::UnknownDatasource(id))?;
    if !kind.accepted_source_kinds().contains(&record.source_type) {
        return Err(ModelError::IncompatibleDatasource {
            id,
            found: record.source_type,
        });
    }
    Ok(record)
}

/// Direction in which a value crosses a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Above,
    AtLeast,
    Below,
    AtMost,
}

impl Comparator {
    pub const ALL: [Comparator; 4] = [
        Comparator::Above,
        Comparator::AtLeast,
        Comparator::Below,
        Comparator::AtMost,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Above => ">",
            Comparator::AtLeast => ">=",
            Comparator::Below => "<",
            Comparator::AtMost => "<=",
        }
    }

    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Above => value > threshold,
            Comparator::AtLeast => value >= threshold,
            Comparator::Below => value < threshold,
            Comparator::AtMost => value <= threshold,
        }
    }

    /// Whether larger thresholds are more severe.
    pub fn ascending(self) -> bool {
        matches!(self, Comparator::Above | Comparator::AtLeast)
    }
}

impl FromStr for Comparator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Comparator::ALL.into_iter().find(|c| c.symbol() == s).ok_or(())
    }
}

/// How the datapoints inside the audit window are reduced to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditFunction {
    Max,
    Min,
    Avg,
    Sum,
    Last,
}

impl AuditFunction {
    pub const ALL: [AuditFunction; 5] = [
        AuditFunction::Max,
        AuditFunction::Min,
        AuditFunction::Avg,
        AuditFunction::Sum,
        AuditFunction::Last,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuditFunction::Max => "max",
            AuditFunction::Min => "min",
            AuditFunction::Avg => "avg",
            AuditFunction::Sum => "sum",
            AuditFunction::Last => "last",
        }
    }

    /// Reduce `values`, skipping NaN gaps. `None` if nothing is left.
    pub fn aggregate(self, values: impl IntoIterator<Item = f64>) -> Option<f64> {
        let values: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
        if values.is_empty() {
            return None;
        }
        let result = match self {
            AuditFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AuditFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AuditFunction::Sum => values.iter().sum(),
            AuditFunction::Avg => values.iter().sum::<f64>() / values.len() as f64,
            AuditFunction::Last => values[values.len() - 1],
        };
        Some(result)
    }
}

impl FromStr for AuditFunction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditFunction::ALL.into_iter().find(|f| f.as_str() == s).ok_or(())
    }
}

/// Shortest decimal that parses back to the same `f64`; empty when absent.
pub fn format_threshold(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator() {
        assert_eq!(">=".parse::<Comparator>(), Ok(Comparator::AtLeast));
        assert!("=>".parse::<Comparator>().is_err());
        assert!(Comparator::Above.holds(95.0, 90.0));
        assert!(!Comparator::Above.holds(90.0, 90.0));
        assert!(Comparator::AtLeast.holds(90.0, 90.0));
        assert!(Comparator::Below.holds(1.0, 2.0));
        assert!(!Comparator::Below.ascending());
    }

    #[test]
    fn test_audit_functions() {
        let values = [3.0, f64::NAN, 1.0, 8.0];
        assert_eq!(AuditFunction::Max.aggregate(values), Some(8.0));
        assert_eq!(AuditFunction::Min.aggregate(values), Some(1.0));
        assert_eq!(AuditFunction::Sum.aggregate(values), Some(12.0));
        assert_eq!(AuditFunction::Avg.aggregate(values), Some(4.0));
        assert_eq!(AuditFunction::Last.aggregate(values), Some(8.0));
        assert_eq!(AuditFunction::Max.aggregate([f64::NAN]), None);
        assert_eq!(AuditFunction::Avg.aggregate(Vec::new()), None);
    }

    #[test]
    fn test_format_threshold() {
        assert_eq!(format_threshold(Some(90.0)), "90");
        assert_eq!(format_threshold(Some(0.1)), "0.1");
        assert_eq!(format_threshold(Some(1.0 / 3.0)), "0.3333333333333333");
        assert_eq!(format_threshold(Some(-2.5)), "-2.5");
        assert_eq!(format_threshold(None), "");
    }
}
