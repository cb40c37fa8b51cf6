//! Suppression windows over a monitor's subprobes.
//!
//! A silence moves through [`SilenceState`]s purely with the passage of
//! time. Validation takes the current instant and the previously stored
//! version explicitly, so it is deterministic under test.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{MonitorId, SilenceId};
use crate::pattern::SubprobePattern;
use crate::period;

pub const MIN_SILENCE_MS: i64 = 60 * 60 * 1000;
pub const MAX_SILENCE_MS: i64 = 14 * 24 * 60 * 60 * 1000;

/// Where a silence sits relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    Future,
    Present,
    Past,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Silence {
    #[serde(default)]
    pub id: SilenceId,
    pub monitor_id: MonitorId,
    #[serde(default)]
    pub monitor_name: String,
    /// Subprobe name or pattern. Empty silences every subprobe.
    #[serde(default)]
    pub subprobe: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Silence {
    pub fn state(&self, now: DateTime<Utc>) -> SilenceState {
        if now < self.start {
            SilenceState::Future
        } else if now < self.end {
            SilenceState::Present
        } else {
            SilenceState::Past
        }
    }

    /// Whether the window `[start, end)` contains `at`.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Whether this silence applies to `subprobe` under `monitor_id`.
    pub fn covers(&self, monitor_id: MonitorId, subprobe: &str) -> bool {
        self.monitor_id == monitor_id && SubprobePattern::new(&self.subprobe).matches(subprobe)
    }

    /// Future and running silences may be edited; finished ones may not.
    pub fn editable(&self, now: DateTime<Utc>) -> bool {
        now < self.end
    }

    /// Check this silence as it is about to be saved.
    ///
    /// `previous` is the stored version when editing, `None` when creating.
    pub fn validate(&self, now: DateTime<Utc>, previous: Option<&Silence>) -> Vec<String> {
        let mut errs = Vec::new();

        if self.end <= self.start {
            errs.push("Start must be before end.".to_string());
        }

        let duration = self.end - self.start;
        if duration > Duration::milliseconds(MAX_SILENCE_MS) {
            errs.push(format!(
                "End cannot be more than {} after start.",
                period::describe(MAX_SILENCE_MS)
            ));
        }
        if duration < Duration::milliseconds(MIN_SILENCE_MS) {
            errs.push(format!(
                "End cannot be less than {} after start.",
                period::describe(MIN_SILENCE_MS)
            ));
        }

        match previous {
            None => errs.extend(self.validate_new(now)),
            Some(old) => match self.validate_edit(now, old) {
                Ok(more) => errs.extend(more),
                Err(rejected) => return rejected,
            },
        }

        errs
    }

    fn validate_new(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut errs = Vec::new();
        if self.monitor_id == MonitorId(0) {
            errs.push("Monitor id must be provided.".to_string());
        }
        if self.start <= now || self.end <= now {
            errs.push("Start and end must be in the future.".to_string());
        }
        errs
    }

    /// `Err` rejects the edit outright, replacing any other errors.
    fn validate_edit(&self, now: DateTime<Utc>, old: &Silence) -> Result<Vec<String>, Vec<String>> {
        let state = old.state(now);
        if state == SilenceState::Past {
            return Err(vec!["Silences from the past cannot be edited.".to_string()]);
        }

        let mut errs = Vec::new();
        if old.monitor_id != self.monitor_id {
            errs.push("Monitor cannot be changed. Create a new silence instead.".to_string());
        }
        if old.subprobe != self.subprobe {
            errs.push("Subprobe cannot be changed. Create a new silence instead.".to_string());
        }
        if state == SilenceState::Present && self.start != old.start {
            errs.push("Start cannot be changed for a currently running silence.".to_string());
        }
        Ok(errs)
    }
}
