//! Monitors: one probe plus the triggers that act on its readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AlertLevel, MonitorId, ProbeType, TargetTypeId, TriggerId};
use crate::period;
use crate::probe::Probe;
use crate::registry::Catalog;
use crate::trigger::{Trigger, TriggerOwner, TriggerRecord};

#[derive(Debug)]
pub struct Monitor {
    pub id: MonitorId,
    pub name: String,
    pub owner: String,
    pub description: String,
    /// Free-text instructions for whoever gets paged.
    pub response: String,
    pub probe_type: ProbeType,
    pub probe: Box<dyn Probe>,
    pub triggers: Vec<Trigger>,
    pub changed: DateTime<Utc>,
}

/// Monitor row without its probe or triggers, for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSummary {
    pub id: MonitorId,
    pub name: String,
    pub owner: String,
    pub description: String,
    pub probe_type: ProbeType,
    pub changed: DateTime<Utc>,
}

fn default_period_type() -> String {
    "minute".to_string()
}

/// Trigger as submitted from the monitor edit form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInput {
    #[serde(default)]
    pub id: TriggerId,
    pub level: AlertLevel,
    #[serde(default)]
    pub period: i64,
    #[serde(default = "default_period_type")]
    pub period_type: String,
    #[serde(default)]
    pub subprobes: String,
    pub target_type: TargetTypeId,
    /// Target payload, interpreted by the `target_type` kind.
    pub target: serde_json::Value,
}

/// Monitor as submitted from the edit form. Saving replaces the monitor
/// and all of its triggers.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorInput {
    #[serde(default)]
    pub id: MonitorId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub response: String,
    pub probe_type: ProbeType,
    /// Probe payload, interpreted by the `probe_type` kind.
    pub probe: serde_json::Value,
    #[serde(default)]
    pub triggers: Vec<TriggerInput>,
}

impl MonitorInput {
    /// Load the probe and triggers and validate the whole monitor.
    ///
    /// Every problem found is returned, in form order.
    pub fn build(self, catalog: &Catalog, now: DateTime<Utc>) -> Result<Monitor, Vec<String>> {
        let mut errs = Vec::new();

        if self.name.trim().is_empty() {
            errs.push("Monitor name is required".to_string());
        }

        let probe = match catalog.probe_from_user_input(self.probe_type, &self.probe.to_string()) {
            Ok(probe) => {
                errs.extend(probe.validate());
                Some(probe)
            }
            Err(e) => {
                errs.push(format!("Invalid probe: {}", e));
                None
            }
        };

        let mut triggers = Vec::with_capacity(self.triggers.len());
        for input in self.triggers {
            if input.period != 0 && input.period_type.parse::<period::PeriodUnit>().is_err() {
                errs.push("Invalid trigger period type".to_string());
            }
            let record = TriggerRecord {
                id: input.id,
                level: input.level,
                period_milli: period::to_millis_str(input.period, &input.period_type),
                target_type: input.target_type,
                target: input.target.to_string(),
            };
            let mut trigger = Trigger::new(
                record,
                TriggerOwner::Monitor {
                    subprobes: input.subprobes,
                },
                self.id,
            );
            let trigger_errs = trigger.validate(catalog);
            if trigger_errs.is_empty() {
                // store the kind's canonical encoding rather than the raw form
                match trigger.resolve_target(catalog).and_then(|t| t.encode()) {
                    Ok(encoded) => trigger.target = encoded,
                    Err(e) => errs.push(format!("Invalid target: {}", e)),
                }
            }
            errs.extend(trigger_errs);
            triggers.push(trigger);
        }

        match probe {
            Some(probe) if errs.is_empty() => Ok(Monitor {
                id: self.id,
                name: self.name.trim().to_string(),
                owner: self.owner,
                description: self.description,
                response: self.response,
                probe_type: self.probe_type,
                probe,
                triggers,
                changed: now,
            }),
            _ => Err(errs),
        }
    }
}
