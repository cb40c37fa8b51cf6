//! Alert daemon: turns fresh readings into notifications.

mod notify;

pub use notify::*;

use crate::db::{DbError, Store};
use crate::error::ModelError;
use crate::model::{MonitorId, MonitorSummary, Reading, ReadingId, Subprobe, SubprobeId, TriggerId};
use crate::registry::Catalog;
use crate::trigger::Escalation;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Walks every monitor's new readings and fires the triggers they meet.
pub struct Evaluator {
    store: Arc<Store>,
    catalog: Arc<Catalog>,
    notifier: Arc<dyn Notifier>,
    escalation: Escalation,
    /// Newest reading observed per subprobe, with its monitor.
    last_seen: HashMap<SubprobeId, (MonitorId, ReadingId)>,
}

impl Evaluator {
    pub fn new(store: Arc<Store>, catalog: Arc<Catalog>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            catalog,
            notifier,
            escalation: Escalation::new(),
            last_seen: HashMap::new(),
        }
    }

    /// Run one pass over every monitor, returning how many alerts were
    /// delivered. A monitor that fails to evaluate is logged and skipped.
    pub fn evaluate(&mut self) -> Result<usize, DbError> {
        let monitors = self.store.get_monitor_summaries()?;
        let live: HashSet<MonitorId> = monitors.iter().map(|m| m.id).collect();
        self.escalation.retain_monitors(&live);
        self.last_seen.retain(|_, (m, _)| live.contains(m));

        let mut delivered = 0;
        for monitor in &monitors {
            let alerts = match self.evaluate_monitor(monitor) {
                Ok(alerts) => alerts,
                Err(e) => {
                    tracing::error!("Evaluator: Failed to evaluate monitor {}: {}", monitor.name, e);
                    continue;
                }
            };

            for alert in alerts {
                match self.notifier.notify(&alert) {
                    Ok(()) => delivered += 1,
                    Err(e) => tracing::error!("Evaluator: {}", e),
                }
            }
        }

        if delivered > 0 {
            tracing::info!("Evaluator: Dispatched {} alerts", delivered);
        }
        Ok(delivered)
    }

    /// Readings of `subprobe` not yet observed, oldest first. A subprobe
    /// seen for the first time starts from its newest reading.
    fn unseen_readings(&self, subprobe: &Subprobe) -> Result<Vec<Reading>, DbError> {
        match self.last_seen.get(&subprobe.id) {
            Some((_, seen)) => self.store.get_readings_after(subprobe.id, *seen),
            None => self.store.get_readings(subprobe.id, 1),
        }
    }

    fn evaluate_monitor(&mut self, monitor: &MonitorSummary) -> Result<Vec<Alert>, ModelError> {
        let triggers = self.store.get_triggers(monitor.id)?;
        let trigger_ids: HashSet<TriggerId> = triggers.iter().map(|t| t.id).collect();
        self.escalation.retain_triggers(monitor.id, &trigger_ids);

        let mut alerts = Vec::new();
        for subprobe in self.store.get_subprobes(monitor.id)? {
            for reading in self.unseen_readings(&subprobe)? {
                self.last_seen.insert(subprobe.id, (monitor.id, reading.id));
                let silences = self.store.get_active_silences(monitor.id, reading.recorded)?;

                for trigger in &triggers {
                    let fires = self.escalation.observe(
                        trigger,
                        reading.level,
                        &subprobe.name,
                        reading.recorded,
                        &silences,
                    );
                    if !fires {
                        continue;
                    }

                    let target = match trigger.resolve_target(&self.catalog) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::warn!(
                                "Evaluator: Skipping trigger {} on monitor {}: {}",
                                trigger.id,
                                monitor.name,
                                e
                            );
                            continue;
                        }
                    };

                    alerts.push(Alert {
                        trigger_id: trigger.id,
                        monitor_id: monitor.id,
                        monitor_name: monitor.name.clone(),
                        subprobe: subprobe.name.clone(),
                        level: reading.level,
                        value: reading.value.clone(),
                        recorded: reading.recorded,
                        target_type: trigger.target_type,
                        recipients: target.recipients(),
                    });
                }
            }
        }

        Ok(alerts)
    }

    /// Evaluate every `period` until `stop` fires.
    pub fn start(mut self, period: Duration, mut stop: broadcast::Receiver<()>) -> JoinHandle<()> {
        tracing::info!(
            "Evaluator: Starting with {} notifier every {:?}",
            self.notifier.name(),
            period
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop.recv() => {
                        tracing::info!("Evaluator: Stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.evaluate() {
                            tracing::error!("Evaluator: Failed to list monitors: {}", e);
                        }
                    }
                }
            }
        })
    }
}
