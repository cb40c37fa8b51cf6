//! Rules that turn alert levels into notifications.
//!
//! Triggers are stored in two shapes: attached to a monitor (optionally
//! narrowed to a subprobe pattern) or attached to a label, in which case
//! they cover every subprobe of every labelled monitor. Both normalise to
//! one [`Trigger`].

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::model::{AlertLevel, LabelId, MonitorId, TargetTypeId, TriggerId};
use crate::pattern::SubprobePattern;
use crate::registry::Catalog;
use crate::silence::Silence;
use crate::target::Target;

/// The columns every stored trigger has, whatever owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRecord {
    pub id: TriggerId,
    /// Minimum level that fires.
    pub level: AlertLevel,
    /// How long the level must persist before firing.
    pub period_milli: i64,
    pub target_type: TargetTypeId,
    /// Target configuration, encoded by the `target_type` kind.
    pub target: String,
}

/// What a trigger is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "owner", rename_all = "camelCase")]
pub enum TriggerOwner {
    Monitor { subprobes: String },
    #[serde(rename_all = "camelCase")]
    Label { label_id: LabelId },
}

/// A trigger as applied to one monitor.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: TriggerId,
    pub monitor_id: MonitorId,
    pub owner: TriggerOwner,
    pub level: AlertLevel,
    pub period_milli: i64,
    pub target_type: TargetTypeId,
    pub target: String,
    pattern: SubprobePattern,
}

impl Trigger {
    pub fn new(record: TriggerRecord, owner: TriggerOwner, monitor_id: MonitorId) -> Self {
        let pattern = match &owner {
            TriggerOwner::Monitor { subprobes } => SubprobePattern::new(subprobes),
            TriggerOwner::Label { .. } => SubprobePattern::new(""),
        };
        Self {
            id: record.id,
            monitor_id,
            owner,
            level: record.level,
            period_milli: record.period_milli,
            target_type: record.target_type,
            target: record.target,
            pattern,
        }
    }

    /// Split back into the stored shape.
    pub fn record(&self) -> TriggerRecord {
        TriggerRecord {
            id: self.id,
            level: self.level,
            period_milli: self.period_milli,
            target_type: self.target_type,
            target: self.target.clone(),
        }
    }

    /// Subprobe pattern; empty when the trigger covers every subprobe.
    pub fn subprobes(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn applies_to(&self, subprobe: &str) -> bool {
        self.pattern.matches(subprobe)
    }

    /// Whether any of `silences` suppresses `subprobe` at `at`.
    pub fn is_silenced(&self, subprobe: &str, at: DateTime<Utc>, silences: &[Silence]) -> bool {
        silences
            .iter()
            .any(|s| s.is_active_at(at) && s.covers(self.monitor_id, subprobe))
    }

    /// Instantaneous firing decision, ignoring the wait period.
    pub fn should_fire(
        &self,
        level: AlertLevel,
        subprobe: &str,
        at: DateTime<Utc>,
        silences: &[Silence],
    ) -> bool {
        level >= self.level && self.applies_to(subprobe) && !self.is_silenced(subprobe, at, silences)
    }

    /// Load the target this trigger notifies.
    pub fn resolve_target(&self, catalog: &Catalog) -> Result<Box<dyn Target>, ModelError> {
        catalog.load_target(self.target_type, &self.target)
    }

    pub fn validate(&self, catalog: &Catalog) -> Vec<String> {
        let mut errs = Vec::new();
        if self.period_milli < 0 {
            errs.push("Trigger period cannot be negative.".to_string());
        }
        if !SubprobePattern::is_valid(self.subprobes()) {
            errs.push(format!("Invalid subprobe pattern: {}", self.subprobes()));
        }
        match self.resolve_target(catalog) {
            Ok(target) => errs.extend(target.validate()),
            Err(e) => errs.push(format!("Invalid target: {}", e)),
        }
        errs
    }
}

/// Tracks how long each (trigger, monitor, subprobe) has continuously met
/// its trigger's level, so wait periods can be enforced.
///
/// Not synchronised: keep one per evaluating worker.
#[derive(Debug, Default)]
pub struct Escalation {
    since: HashMap<(TriggerId, MonitorId, String), DateTime<Utc>>,
}

impl Escalation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading and decide whether `trigger` fires for it.
    ///
    /// A level below the trigger's minimum clears the tracked start time.
    /// Silences suppress firing without resetting the tracked time.
    pub fn observe(
        &mut self,
        trigger: &Trigger,
        level: AlertLevel,
        subprobe: &str,
        at: DateTime<Utc>,
        silences: &[Silence],
    ) -> bool {
        if !trigger.applies_to(subprobe) {
            return false;
        }
        let key = (trigger.id, trigger.monitor_id, subprobe.to_string());
        if level < trigger.level {
            self.since.remove(&key);
            return false;
        }

        let since = *self.since.entry(key).or_insert(at);
        if trigger.is_silenced(subprobe, at, silences) {
            return false;
        }
        at - since >= Duration::milliseconds(trigger.period_milli)
    }

    /// When the condition for this pair started, if it is ongoing.
    pub fn condition_since(
        &self,
        trigger: &Trigger,
        subprobe: &str,
    ) -> Option<DateTime<Utc>> {
        self.since
            .get(&(trigger.id, trigger.monitor_id, subprobe.to_string()))
            .copied()
    }

    /// Forget every pair belonging to `monitor_id`.
    pub fn forget_monitor(&mut self, monitor_id: MonitorId) {
        self.since.retain(|(_, m, _), _| *m != monitor_id);
    }

    /// Drop pairs of `monitor_id` whose trigger is no longer in `live`.
    pub fn retain_triggers(&mut self, monitor_id: MonitorId, live: &HashSet<TriggerId>) {
        self.since
            .retain(|(t, m, _), _| *m != monitor_id || live.contains(t));
    }

    /// Drop pairs of every monitor not in `live`.
    pub fn retain_monitors(&mut self, live: &HashSet<MonitorId>) {
        self.since.retain(|(_, m, _), _| live.contains(m));
    }

    /// Number of tracked pairs.
    pub fn len(&self) -> usize {
        self.since.len()
    }

    pub fn is_empty(&self) -> bool {
        self.since.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SilenceId;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn record(level: AlertLevel, period_milli: i64) -> TriggerRecord {
        TriggerRecord {
            id: TriggerId(1),
            level,
            period_milli,
            target_type: TargetTypeId(1),
            target: r#"{"Addresses":[{"To":"oncall@example.com"}]}"#.to_string(),
        }
    }

    fn monitor_trigger(level: AlertLevel) -> Trigger {
        Trigger::new(
            record(level, 0),
            TriggerOwner::Monitor {
                subprobes: String::new(),
            },
            MonitorId(7),
        )
    }

    fn silence_for(subprobe: &str) -> Silence {
        Silence {
            id: SilenceId(1),
            monitor_id: MonitorId(7),
            monitor_name: String::new(),
            subprobe: subprobe.to_string(),
            start: now() - Duration::hours(1),
            end: now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_fires_at_or_above_level() {
        let t = monitor_trigger(AlertLevel::Error);
        assert!(t.should_fire(AlertLevel::Critical, "shard-3", now(), &[]));
        assert!(t.should_fire(AlertLevel::Error, "shard-3", now(), &[]));
        assert!(!t.should_fire(AlertLevel::Warning, "shard-3", now(), &[]));
    }

    #[test]
    fn test_matching_silence_suppresses() {
        let t = monitor_trigger(AlertLevel::Warning);
        assert!(!t.should_fire(AlertLevel::Critical, "shard-3", now(), &[silence_for("shard-3")]));
        assert!(t.should_fire(AlertLevel::Critical, "shard-3", now(), &[silence_for("shard-4")]));
    }

    #[test]
    fn test_silence_for_other_monitor_or_time_is_ignored() {
        let t = monitor_trigger(AlertLevel::Warning);
        let mut other_monitor = silence_for("shard-3");
        other_monitor.monitor_id = MonitorId(8);
        assert!(t.should_fire(AlertLevel::Critical, "shard-3", now(), &[other_monitor]));

        let expired = silence_for("shard-3");
        let later = expired.end;
        assert!(t.should_fire(AlertLevel::Critical, "shard-3", later, &[expired]));
    }

    #[test]
    fn test_pattern_scoping() {
        let t = Trigger::new(
            record(AlertLevel::Warning, 0),
            TriggerOwner::Monitor {
                subprobes: r"db-\d+".to_string(),
            },
            MonitorId(7),
        );
        assert_eq!(t.subprobes(), r"db-\d+");
        assert!(t.should_fire(AlertLevel::Error, "db-2", now(), &[]));
        assert!(!t.should_fire(AlertLevel::Error, "web-2", now(), &[]));
    }

    #[test]
    fn test_label_trigger_covers_every_subprobe() {
        let t = Trigger::new(
            record(AlertLevel::Warning, 0),
            TriggerOwner::Label {
                label_id: LabelId(3),
            },
            MonitorId(7),
        );
        assert_eq!(t.subprobes(), "");
        assert!(t.should_fire(AlertLevel::Warning, "anything", now(), &[]));
        assert_eq!(t.record(), record(AlertLevel::Warning, 0));
    }

    #[test]
    fn test_resolve_target() {
        let catalog = Catalog::builtin().unwrap();
        let t = monitor_trigger(AlertLevel::Warning);
        let target = t.resolve_target(&catalog).unwrap();
        assert_eq!(target.recipients(), "oncall@example.com");
        assert!(t.validate(&catalog).is_empty());

        let mut unknown = monitor_trigger(AlertLevel::Warning);
        unknown.target_type = TargetTypeId(9);
        assert!(unknown.resolve_target(&catalog).unwrap_err().is_referential());
        assert_eq!(unknown.validate(&catalog).len(), 1);

        let mut garbled = monitor_trigger(AlertLevel::Warning);
        garbled.target = "{".to_string();
        assert!(matches!(
            garbled.resolve_target(&catalog),
            Err(ModelError::Decode(_))
        ));
    }

    #[test]
    fn test_validate_bad_address_and_pattern() {
        let catalog = Catalog::builtin().unwrap();
        let mut rec = record(AlertLevel::Warning, -5);
        rec.target = r#"{"Addresses":[{"To":"nope"}]}"#.to_string();
        let t = Trigger::new(
            rec,
            TriggerOwner::Monitor {
                subprobes: "db-(".to_string(),
            },
            MonitorId(7),
        );
        assert_eq!(
            t.validate(&catalog),
            vec![
                "Trigger period cannot be negative.",
                "Invalid subprobe pattern: db-(",
                "An invalid email to was provided.",
            ]
        );
    }

    #[test]
    fn test_escalation_waits_for_period() {
        let t = Trigger::new(
            record(AlertLevel::Error, 5 * 60 * 1000),
            TriggerOwner::Monitor {
                subprobes: String::new(),
            },
            MonitorId(7),
        );
        let mut esc = Escalation::new();

        assert!(!esc.observe(&t, AlertLevel::Critical, "shard-3", now(), &[]));
        assert_eq!(esc.condition_since(&t, "shard-3"), Some(now()));
        assert!(!esc.observe(&t, AlertLevel::Error, "shard-3", now() + Duration::minutes(4), &[]));
        assert!(esc.observe(&t, AlertLevel::Error, "shard-3", now() + Duration::minutes(5), &[]));

        // a dip below the level restarts the clock
        assert!(!esc.observe(&t, AlertLevel::Warning, "shard-3", now() + Duration::minutes(6), &[]));
        assert_eq!(esc.condition_since(&t, "shard-3"), None);
        assert!(!esc.observe(&t, AlertLevel::Error, "shard-3", now() + Duration::minutes(7), &[]));
        assert!(esc.observe(&t, AlertLevel::Error, "shard-3", now() + Duration::minutes(12), &[]));
    }

    #[test]
    fn test_escalation_tracks_subprobes_independently() {
        let t = Trigger::new(
            record(AlertLevel::Error, 60_000),
            TriggerOwner::Monitor {
                subprobes: String::new(),
            },
            MonitorId(7),
        );
        let mut esc = Escalation::new();
        esc.observe(&t, AlertLevel::Error, "a", now(), &[]);
        esc.observe(&t, AlertLevel::Error, "b", now() + Duration::seconds(30), &[]);
        assert!(esc.observe(&t, AlertLevel::Error, "a", now() + Duration::seconds(60), &[]));
        assert!(!esc.observe(&t, AlertLevel::Error, "b", now() + Duration::seconds(60), &[]));

        esc.forget_monitor(MonitorId(7));
        assert_eq!(esc.condition_since(&t, "a"), None);
    }

    #[test]
    fn test_escalation_prunes_removed_triggers_and_monitors() {
        let kept = monitor_trigger(AlertLevel::Error);
        let mut dropped = monitor_trigger(AlertLevel::Error);
        dropped.id = TriggerId(2);
        let mut elsewhere = monitor_trigger(AlertLevel::Error);
        elsewhere.monitor_id = MonitorId(8);

        let mut esc = Escalation::new();
        for t in [&kept, &dropped, &elsewhere] {
            esc.observe(t, AlertLevel::Critical, "a", now(), &[]);
        }
        assert_eq!(esc.len(), 3);

        esc.retain_triggers(MonitorId(7), &HashSet::from([TriggerId(1)]));
        assert_eq!(esc.len(), 2);
        assert_eq!(esc.condition_since(&dropped, "a"), None);
        assert_eq!(esc.condition_since(&elsewhere, "a"), Some(now()));

        esc.retain_monitors(&HashSet::from([MonitorId(7)]));
        assert_eq!(esc.len(), 1);
        assert_eq!(esc.condition_since(&kept, "a"), Some(now()));
    }

    #[test]
    fn test_escalation_respects_silence_without_resetting() {
        let t = Trigger::new(
            record(AlertLevel::Error, 0),
            TriggerOwner::Monitor {
                subprobes: String::new(),
            },
            MonitorId(7),
        );
        let mut esc = Escalation::new();
        let silences = [silence_for("shard-3")];
        assert!(!esc.observe(&t, AlertLevel::Critical, "shard-3", now(), &silences));
        assert_eq!(esc.condition_since(&t, "shard-3"), Some(now()));
        assert!(esc.observe(&t, AlertLevel::Critical, "shard-3", now() + Duration::hours(1), &silences));
    }
}
