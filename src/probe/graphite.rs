//! Threshold probe over a Graphite expression.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{
    format_threshold, resolve_datasource, Assessment, AuditFunction, Comparator, DataPoint, Probe,
    ProbeKind,
};
use crate::datasource::{DatasourceLookup, GraphiteDatasource, GRAPHITE_SOURCE};
use crate::error::ModelError;
use crate::model::{AlertLevel, DatasourceId, DisplayFields, ProbeType, Scripts, SourceType, Templates};
use crate::period::{self, PeriodUnit};

pub const GRAPHITE_THRESHOLD: ProbeType = ProbeType(1);

static ACCEPTED_SOURCES: [SourceType; 1] = [GRAPHITE_SOURCE];

/// The Graphite threshold probe kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphiteThreshold;

impl ProbeKind for GraphiteThreshold {
    fn id(&self) -> ProbeType {
        GRAPHITE_THRESHOLD
    }

    fn name(&self) -> &'static str {
        "Graphite Threshold"
    }

    fn load_from_user_input(&self, raw: &str) -> Result<Box<dyn Probe>, ModelError> {
        Ok(Box::new(GraphiteThresholdProbe::from_user_input(raw)?))
    }

    fn load_from_storage(
        &self,
        encoded: &str,
        tx: &dyn DatasourceLookup,
    ) -> Result<Box<dyn Probe>, ModelError> {
        Ok(Box::new(GraphiteThresholdProbe::from_storage(encoded, tx)?))
    }

    fn blank(&self) -> Box<dyn Probe> {
        Box::new(GraphiteThresholdProbe::default())
    }

    fn accepted_source_kinds(&self) -> &'static [SourceType] {
        &ACCEPTED_SOURCES
    }

    fn templates(&self) -> Templates {
        Templates::from([("edit", "graphite-edit.html"), ("view", "graphite-view.html")])
    }

    fn scripts(&self) -> Scripts {
        Scripts::from([
            ("edit", vec!["graphite-threshold.js", "graphite-ds-loader.js"]),
            ("preview", vec!["graphite-preview.js"]),
        ])
    }
}

/// Warning / error / critical bounds; each is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Thresholds {
    pub warning: Option<f64>,
    pub error: Option<f64>,
    pub critical: Option<f64>,
}

impl Thresholds {
    /// Present thresholds, least severe first.
    fn present(&self) -> Vec<(AlertLevel, f64)> {
        [
            (AlertLevel::Warning, self.warning),
            (AlertLevel::Error, self.error),
            (AlertLevel::Critical, self.critical),
        ]
        .into_iter()
        .filter_map(|(level, t)| t.map(|t| (level, t)))
        .collect()
    }
}

/// Edit-form shape of the probe. Periods are a count plus a unit name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GraphiteThresholdProbe {
    /// Filled from the datasource on load; ignored on save.
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "SourceID")]
    pub source_id: DatasourceId,
    pub expression: String,
    pub thresholds: Thresholds,
    pub audit_function: String,
    pub check_period: i64,
    pub check_period_type: String,
    pub trigger_if: String,
    pub audit_period: i64,
    pub audit_period_type: String,
    pub ignored_period: i64,
    pub ignored_period_type: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThresholdsRecord {
    warning: Option<f64>,
    error: Option<f64>,
    critical: Option<f64>,
}

/// Stored shape of the probe. Periods are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphiteThresholdRecord {
    source_id: DatasourceId,
    expression: String,
    thresholds: ThresholdsRecord,
    trigger_if: String,
    check_period_milli: i64,
    time_to_audit_milli: i64,
    #[serde(default)]
    recent_time_to_ignore_milli: i64,
    audit_function: String,
}

impl GraphiteThresholdProbe {
    pub fn from_user_input(raw: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_storage(encoded: &str, tx: &dyn DatasourceLookup) -> Result<Self, ModelError> {
        let record: GraphiteThresholdRecord = serde_json::from_str(encoded)?;

        let ds = resolve_datasource(&GraphiteThreshold, record.source_id, tx)?;
        let source = GraphiteDatasource::decode(&ds.source)?;

        let (check_period, check_unit) = period::to_period_and_unit(record.check_period_milli);
        let (audit_period, audit_unit) = period::to_period_and_unit(record.time_to_audit_milli);
        let (ignored_period, ignored_unit) =
            period::to_period_and_unit(record.recent_time_to_ignore_milli);

        Ok(Self {
            url: source.url,
            source_id: record.source_id,
            expression: record.expression,
            thresholds: Thresholds {
                warning: record.thresholds.warning,
                error: record.thresholds.error,
                critical: record.thresholds.critical,
            },
            audit_function: record.audit_function,
            check_period,
            check_period_type: check_unit.to_string(),
            trigger_if: record.trigger_if,
            audit_period,
            audit_period_type: audit_unit.to_string(),
            ignored_period,
            ignored_period_type: ignored_unit.to_string(),
        })
    }

    fn record(&self) -> GraphiteThresholdRecord {
        GraphiteThresholdRecord {
            source_id: self.source_id,
            expression: self.expression.clone(),
            thresholds: ThresholdsRecord {
                warning: self.thresholds.warning,
                error: self.thresholds.error,
                critical: self.thresholds.critical,
            },
            trigger_if: self.trigger_if.clone(),
            check_period_milli: self.check_period_ms(),
            time_to_audit_milli: self.audit_period_ms(),
            recent_time_to_ignore_milli: self.ignored_period_ms(),
            audit_function: self.audit_function.clone(),
        }
    }

    pub fn check_period_ms(&self) -> i64 {
        period::to_millis_str(self.check_period, &self.check_period_type)
    }

    pub fn audit_period_ms(&self) -> i64 {
        period::to_millis_str(self.audit_period, &self.audit_period_type)
    }

    pub fn ignored_period_ms(&self) -> i64 {
        period::to_millis_str(self.ignored_period, &self.ignored_period_type)
    }

    /// Level for a single aggregated value, most severe threshold first.
    pub fn level_for(&self, value: f64) -> AlertLevel {
        let Ok(cmp) = self.trigger_if.parse::<Comparator>() else {
            return AlertLevel::Normal;
        };
        self.thresholds
            .present()
            .into_iter()
            .rev()
            .find(|(_, threshold)| cmp.holds(value, *threshold))
            .map(|(level, _)| level)
            .unwrap_or(AlertLevel::Normal)
    }

    fn validate_thresholds(&self, errs: &mut Vec<String>) {
        let present = self.thresholds.present();
        let Ok(cmp) = self.trigger_if.parse::<Comparator>() else {
            return;
        };
        let ordered = present.windows(2).all(|pair| {
            let (less, more) = (pair[0].1, pair[1].1);
            if cmp.ascending() {
                less < more
            } else {
                less > more
            }
        });
        if !ordered {
            let direction = if cmp.ascending() { "increase" } else { "decrease" };
            errs.push(format!(
                "Thresholds must {} from warning to error to critical",
                direction
            ));
        }
    }
}

fn is_period_unit(unit: &str) -> bool {
    unit.parse::<PeriodUnit>().is_ok()
}

/// Zero also covers unknown units and overflowing counts.
fn is_positive_period(ms: i64) -> bool {
    ms > 0 && ms <= period::MAX_PERIOD_MS
}

impl Probe for GraphiteThresholdProbe {
    fn kind(&self) -> ProbeType {
        GRAPHITE_THRESHOLD
    }

    fn uses_datasource(&self, id: DatasourceId) -> bool {
        self.source_id == id
    }

    fn to_display_fields(&self) -> DisplayFields {
        DisplayFields::from([
            ("Expression".to_string(), self.expression.clone()),
            ("URL".to_string(), self.url.clone()),
            ("Warning".to_string(), format_threshold(self.thresholds.warning)),
            ("Error".to_string(), format_threshold(self.thresholds.error)),
            ("Critical".to_string(), format_threshold(self.thresholds.critical)),
            ("TriggerIf".to_string(), self.trigger_if.clone()),
            ("AuditFunction".to_string(), self.audit_function.clone()),
        ])
    }

    fn to_storage_encoding(&self) -> Result<String, ModelError> {
        serde_json::to_string(&self.record()).map_err(ModelError::Encode)
    }

    fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();

        if self.expression.is_empty() {
            errs.push("Graphite expression is required".to_string());
        }
        if !is_period_unit(&self.check_period_type) {
            errs.push("Invalid check period type".to_string());
        }
        if !is_period_unit(&self.audit_period_type) {
            errs.push("Invalid audit period type".to_string());
        }
        if !is_positive_period(self.check_period_ms()) {
            errs.push("Invalid check period".to_string());
        }
        if !is_positive_period(self.audit_period_ms()) {
            errs.push("Invalid audit period".to_string());
        }
        if self.ignored_period != 0
            && (!is_period_unit(&self.ignored_period_type)
                || !is_positive_period(self.ignored_period_ms()))
        {
            errs.push("Invalid ignored period".to_string());
        }
        if self.trigger_if.parse::<Comparator>().is_err() {
            errs.push("Invalid trigger condition".to_string());
        }
        if self.audit_function.parse::<AuditFunction>().is_err() {
            errs.push("Invalid audit function".to_string());
        }
        self.validate_thresholds(&mut errs);

        errs
    }

    fn assess(&self, points: &[DataPoint], now: DateTime<Utc>) -> Assessment {
        let before_now = |ms: i64, from: DateTime<Utc>| {
            Duration::try_milliseconds(ms.max(0)).and_then(|d| from.checked_sub_signed(d))
        };
        // a window reaching past the representable range holds no points
        let Some((start, end)) = before_now(self.ignored_period_ms(), now)
            .and_then(|end| before_now(self.audit_period_ms(), end).map(|start| (start, end)))
        else {
            return Assessment {
                level: AlertLevel::Normal,
                value: None,
            };
        };
        let window = points
            .iter()
            .filter(|p| p.at >= start && p.at <= end)
            .map(|p| p.value);

        let value = self
            .audit_function
            .parse::<AuditFunction>()
            .ok()
            .and_then(|f| f.aggregate(window));

        Assessment {
            level: value.map(|v| self.level_for(v)).unwrap_or(AlertLevel::Normal),
            value,
        }
    }
}
