//! Notification delivery seam.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::{AlertLevel, MonitorId, TargetTypeId, TriggerId};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("delivery via {notifier} failed: {reason}")]
    Delivery { notifier: String, reason: String },
}

/// A trigger that fired for one subprobe reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub trigger_id: TriggerId,
    pub monitor_id: MonitorId,
    pub monitor_name: String,
    pub subprobe: String,
    pub level: AlertLevel,
    pub value: String,
    pub recorded: DateTime<Utc>,
    pub target_type: TargetTypeId,
    /// Who the target reaches, as rendered by the target kind.
    pub recipients: String,
}

pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes each alert to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, alert: &Alert) -> Result<(), NotifyError> {
        tracing::warn!(
            monitor = %alert.monitor_name,
            subprobe = %alert.subprobe,
            level = %alert.level,
            value = %alert.value,
            "Alert: notifying {}",
            alert.recipients
        );
        Ok(())
    }
}
