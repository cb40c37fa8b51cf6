//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row, Transaction};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::datasource::{DatasourceLookup, DatasourceRecord};
use crate::error::ModelError;
use crate::model::{
    AlertLevel, DatasourceId, LabelId, Monitor, MonitorId, MonitorSummary, ProbeType, Reading,
    ReadingId, SilenceId, SourceType, Subprobe, SubprobeId, TargetTypeId, TriggerId,
};
use crate::registry::Catalog;
use crate::silence::Silence;
use crate::trigger::{Trigger, TriggerOwner, TriggerRecord};

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Database connection lock poisoned")]
    Poisoned,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// An open transaction. Every read made through it sees one snapshot.
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl DatasourceLookup for StoreTx<'_> {
    fn load_datasource(&self, id: DatasourceId) -> Result<Option<DatasourceRecord>, DbError> {
        Ok(query_datasource(&self.tx, id)?)
    }
}

impl StoreTx<'_> {
    pub fn triggers(&self, monitor_id: MonitorId) -> Result<Vec<Trigger>, DbError> {
        Ok(query_triggers(&self.tx, monitor_id)?)
    }
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Run `f` inside one transaction, committing if it succeeds.
    ///
    /// The caller owns retry policy; nothing here retries.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction().map_err(DbError::from)?;
        let stx = StoreTx { tx };
        let out = f(&stx)?;
        stx.tx.commit().map_err(DbError::from)?;
        Ok(out)
    }

    // --- Datasources ---

    /// Insert or update a datasource. Id zero inserts.
    pub fn save_datasource(&self, record: &mut DatasourceRecord) -> Result<DatasourceId, DbError> {
        let conn = self.conn()?;
        write_datasource(&conn, record)
    }

    /// Save several datasources in one transaction; either all are written
    /// or none are.
    pub fn save_datasources(&self, records: &mut [DatasourceRecord]) -> Result<(), DbError> {
        self.transaction(|stx| {
            for record in records.iter_mut() {
                write_datasource(&stx.tx, record)?;
            }
            Ok(())
        })
    }

    pub fn get_datasources(&self) -> Result<Vec<DatasourceRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, source_type, source FROM datasources ORDER BY id")?;
        let records = stmt
            .query_map([], datasource_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }

    // --- Monitors ---

    /// Replace a monitor, its probe and all of its triggers. Id zero
    /// inserts. Ids assigned by the database are written back.
    ///
    /// The encoded probe must load back against the datasources visible in
    /// the same transaction, so a saved monitor can always be reopened.
    pub fn save_monitor(&self, monitor: &mut Monitor, catalog: &Catalog) -> Result<MonitorId, ModelError> {
        let probe = monitor.probe.to_storage_encoding()?;
        self.transaction(|stx| {
            catalog.probe_from_storage(monitor.probe_type, &probe, stx)?;
            write_monitor(&stx.tx, monitor, &probe)?;
            Ok::<_, ModelError>(monitor.id)
        })
    }

    pub fn get_monitor_summaries(&self) -> Result<Vec<MonitorSummary>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, owner, description, probe_type, changed FROM monitors ORDER BY name",
        )?;
        let monitors = stmt
            .query_map([], |row| {
                Ok(MonitorSummary {
                    id: MonitorId(row.get(0)?),
                    name: row.get(1)?,
                    owner: row.get(2)?,
                    description: row.get(3)?,
                    probe_type: ProbeType(row.get(4)?),
                    changed: time_column(row, 5)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(monitors)
    }

    /// Load a monitor with its probe and triggers, resolving the probe's
    /// datasource in the same transaction.
    pub fn load_monitor(&self, id: MonitorId, catalog: &Catalog) -> Result<Option<Monitor>, ModelError> {
        self.transaction(|stx| {
            let row = stx
                .tx
                .query_row(
                    "SELECT name, owner, description, response, probe_type, probe, changed
                     FROM monitors WHERE id = ?1",
                    params![id.0],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            ProbeType(row.get(4)?),
                            row.get::<_, String>(5)?,
                            time_column(row, 6)?,
                        ))
                    },
                )
                .optional()
                .map_err(DbError::from)?;

            let Some((name, owner, description, response, probe_type, probe, changed)) = row else {
                return Ok(None);
            };

            let probe = catalog.probe_from_storage(probe_type, &probe, stx)?;
            let triggers = stx.triggers(id)?;

            Ok(Some(Monitor {
                id,
                name,
                owner,
                description,
                response,
                probe_type,
                probe,
                triggers,
                changed,
            }))
        })
    }

    pub fn get_triggers(&self, monitor_id: MonitorId) -> Result<Vec<Trigger>, DbError> {
        let conn = self.conn()?;
        Ok(query_triggers(&conn, monitor_id)?)
    }

    // --- Labels ---

    pub fn add_label(&self, name: &str) -> Result<LabelId, DbError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO labels (name) VALUES (?1)", params![name])?;
        Ok(LabelId(conn.last_insert_rowid()))
    }

    pub fn label_monitor(&self, label_id: LabelId, monitor_id: MonitorId) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO label_monitors (label_id, monitor_id) VALUES (?1, ?2)",
            params![label_id.0, monitor_id.0],
        )?;
        Ok(())
    }

    /// Attach a new trigger to a label, returning the trigger's id.
    pub fn add_label_trigger(&self, label_id: LabelId, record: &TriggerRecord) -> Result<TriggerId, DbError> {
        self.transaction(|stx| {
            let id = insert_trigger(&stx.tx, record)?;
            stx.tx.execute(
                "INSERT INTO label_triggers (label_id, trigger_id) VALUES (?1, ?2)",
                params![label_id.0, id.0],
            )?;
            Ok(id)
        })
    }

    // --- Subprobes and readings ---

    /// Find the subprobe named `name` under `monitor_id`, creating it on
    /// first sight.
    pub fn upsert_subprobe(&self, monitor_id: MonitorId, name: &str) -> Result<Subprobe, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO subprobes (monitor_id, name) VALUES (?1, ?2)",
            params![monitor_id.0, name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM subprobes WHERE monitor_id = ?1 AND name = ?2",
            params![monitor_id.0, name],
            |row| row.get(0),
        )?;
        Ok(Subprobe {
            id: SubprobeId(id),
            monitor_id,
            name: name.to_string(),
        })
    }

    pub fn get_subprobes(&self, monitor_id: MonitorId) -> Result<Vec<Subprobe>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, monitor_id, name FROM subprobes WHERE monitor_id = ?1 ORDER BY name",
        )?;
        let subprobes = stmt
            .query_map(params![monitor_id.0], |row| {
                Ok(Subprobe {
                    id: SubprobeId(row.get(0)?),
                    monitor_id: MonitorId(row.get(1)?),
                    name: row.get(2)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(subprobes)
    }

    /// Append a reading.
    pub fn add_reading(
        &self,
        subprobe_id: SubprobeId,
        recorded: DateTime<Utc>,
        level: AlertLevel,
        value: &str,
    ) -> Result<Reading, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO readings (subprobe_id, recorded, level, value) VALUES (?1, ?2, ?3, ?4)",
            params![subprobe_id.0, format_db_time(recorded), level.as_i64(), value],
        )?;
        Ok(Reading {
            id: ReadingId(conn.last_insert_rowid()),
            subprobe_id,
            recorded,
            level,
            value: value.to_string(),
        })
    }

    /// Most recent readings for a subprobe, newest first.
    pub fn get_readings(&self, subprobe_id: SubprobeId, limit: i64) -> Result<Vec<Reading>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, subprobe_id, recorded, level, value FROM readings
             WHERE subprobe_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let readings = stmt
            .query_map(params![subprobe_id.0, limit], |row| reading_from_row(row, 0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(readings)
    }

    /// Readings of a subprobe newer than `after`, oldest first.
    pub fn get_readings_after(&self, subprobe_id: SubprobeId, after: ReadingId) -> Result<Vec<Reading>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, subprobe_id, recorded, level, value FROM readings
             WHERE subprobe_id = ?1 AND id > ?2 ORDER BY id",
        )?;
        let readings = stmt
            .query_map(params![subprobe_id.0, after.0], |row| reading_from_row(row, 0))?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(readings)
    }

    /// Each subprobe of a monitor paired with its latest reading. Subprobes
    /// without readings are omitted.
    pub fn get_latest_readings(&self, monitor_id: MonitorId) -> Result<Vec<(Subprobe, Reading)>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.monitor_id, s.name, r.id, r.subprobe_id, r.recorded, r.level, r.value
             FROM subprobes s
             JOIN readings r ON r.id = (SELECT MAX(id) FROM readings WHERE subprobe_id = s.id)
             WHERE s.monitor_id = ?1
             ORDER BY s.name",
        )?;
        let rows = stmt
            .query_map(params![monitor_id.0], |row| {
                let subprobe = Subprobe {
                    id: SubprobeId(row.get(0)?),
                    monitor_id: MonitorId(row.get(1)?),
                    name: row.get(2)?,
                };
                Ok((subprobe, reading_from_row(row, 3)?))
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(rows)
    }

    // --- Silences ---

    /// Insert or update a silence. Id zero inserts.
    pub fn save_silence(&self, silence: &mut Silence) -> Result<SilenceId, DbError> {
        let conn = self.conn()?;
        if silence.id == SilenceId(0) {
            conn.execute(
                "INSERT INTO silences (monitor_id, subprobe, start_time, end_time) VALUES (?1, ?2, ?3, ?4)",
                params![
                    silence.monitor_id.0,
                    silence.subprobe,
                    format_db_time(silence.start),
                    format_db_time(silence.end),
                ],
            )?;
            silence.id = SilenceId(conn.last_insert_rowid());
        } else {
            let n = conn.execute(
                "UPDATE silences SET monitor_id=?1, subprobe=?2, start_time=?3, end_time=?4 WHERE id=?5",
                params![
                    silence.monitor_id.0,
                    silence.subprobe,
                    format_db_time(silence.start),
                    format_db_time(silence.end),
                    silence.id.0,
                ],
            )?;
            if n == 0 {
                return Err(DbError::NotFound);
            }
        }
        Ok(silence.id)
    }

    pub fn get_silence(&self, id: SilenceId) -> Result<Option<Silence>, DbError> {
        let conn = self.conn()?;
        let silence = conn
            .query_row(
                &format!("{} WHERE s.id = ?1", SILENCE_SELECT),
                params![id.0],
                silence_from_row,
            )
            .optional()?;
        Ok(silence)
    }

    pub fn get_silences(&self) -> Result<Vec<Silence>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY s.start_time DESC", SILENCE_SELECT))?;
        let silences = stmt
            .query_map([], silence_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(silences)
    }

    /// Silences of `monitor_id` whose window contains `at`.
    pub fn get_active_silences(&self, monitor_id: MonitorId, at: DateTime<Utc>) -> Result<Vec<Silence>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE s.monitor_id = ?1 AND s.start_time <= ?2 AND s.end_time > ?2",
            SILENCE_SELECT
        ))?;
        let silences = stmt
            .query_map(params![monitor_id.0, format_db_time(at)], silence_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(silences)
    }
}

const SILENCE_SELECT: &str = "SELECT s.id, s.monitor_id, COALESCE(m.name, ''), s.subprobe, s.start_time, s.end_time
     FROM silences s LEFT JOIN monitors m ON m.id = s.monitor_id";

fn silence_from_row(row: &Row<'_>) -> SqlResult<Silence> {
    Ok(Silence {
        id: SilenceId(row.get(0)?),
        monitor_id: MonitorId(row.get(1)?),
        monitor_name: row.get(2)?,
        subprobe: row.get(3)?,
        start: time_column(row, 4)?,
        end: time_column(row, 5)?,
    })
}

fn write_datasource(conn: &Connection, record: &mut DatasourceRecord) -> Result<DatasourceId, DbError> {
    if record.id == DatasourceId(0) {
        conn.execute(
            "INSERT INTO datasources (source_type, source) VALUES (?1, ?2)",
            params![record.source_type.0, record.source],
        )?;
        record.id = DatasourceId(conn.last_insert_rowid());
    } else {
        let n = conn.execute(
            "UPDATE datasources SET source_type=?1, source=?2 WHERE id=?3",
            params![record.source_type.0, record.source, record.id.0],
        )?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
    }
    Ok(record.id)
}

fn datasource_from_row(row: &Row<'_>) -> SqlResult<DatasourceRecord> {
    Ok(DatasourceRecord {
        id: DatasourceId(row.get(0)?),
        source_type: SourceType(row.get(1)?),
        source: row.get(2)?,
    })
}

fn reading_from_row(row: &Row<'_>, first: usize) -> SqlResult<Reading> {
    Ok(Reading {
        id: ReadingId(row.get(first)?),
        subprobe_id: SubprobeId(row.get(first + 1)?),
        recorded: time_column(row, first + 2)?,
        level: level_column(row, first + 3)?,
        value: row.get(first + 4)?,
    })
}

fn query_datasource(conn: &Connection, id: DatasourceId) -> SqlResult<Option<DatasourceRecord>> {
    conn.query_row(
        "SELECT id, source_type, source FROM datasources WHERE id = ?1",
        params![id.0],
        datasource_from_row,
    )
    .optional()
}

/// Triggers attached to the monitor directly, then those reaching it
/// through a label.
fn query_triggers(conn: &Connection, monitor_id: MonitorId) -> SqlResult<Vec<Trigger>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.level, t.period_milli, t.target_type, t.target, mt.subprobes
         FROM monitor_triggers mt JOIN triggers t ON t.id = mt.trigger_id
         WHERE mt.monitor_id = ?1 ORDER BY t.id",
    )?;
    let mut triggers = stmt
        .query_map(params![monitor_id.0], |row| {
            let owner = TriggerOwner::Monitor {
                subprobes: row.get(5)?,
            };
            Ok(Trigger::new(trigger_from_row(row)?, owner, monitor_id))
        })?
        .collect::<SqlResult<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT t.id, t.level, t.period_milli, t.target_type, t.target, lt.label_id
         FROM label_monitors lm
         JOIN label_triggers lt ON lt.label_id = lm.label_id
         JOIN triggers t ON t.id = lt.trigger_id
         WHERE lm.monitor_id = ?1 ORDER BY t.id",
    )?;
    let labelled = stmt
        .query_map(params![monitor_id.0], |row| {
            let owner = TriggerOwner::Label {
                label_id: LabelId(row.get(5)?),
            };
            Ok(Trigger::new(trigger_from_row(row)?, owner, monitor_id))
        })?
        .collect::<SqlResult<Vec<_>>>()?;

    triggers.extend(labelled);
    Ok(triggers)
}

fn trigger_from_row(row: &Row<'_>) -> SqlResult<TriggerRecord> {
    Ok(TriggerRecord {
        id: TriggerId(row.get(0)?),
        level: level_column(row, 1)?,
        period_milli: row.get(2)?,
        target_type: TargetTypeId(row.get(3)?),
        target: row.get(4)?,
    })
}

fn insert_trigger(conn: &Connection, record: &TriggerRecord) -> SqlResult<TriggerId> {
    conn.execute(
        "INSERT INTO triggers (level, period_milli, target_type, target) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.level.as_i64(),
            record.period_milli,
            record.target_type.0,
            record.target,
        ],
    )?;
    Ok(TriggerId(conn.last_insert_rowid()))
}

fn write_monitor(conn: &Connection, monitor: &mut Monitor, probe: &str) -> Result<(), DbError> {
    let changed = format_db_time(monitor.changed);
    if monitor.id == MonitorId(0) {
        conn.execute(
            "INSERT INTO monitors (name, owner, description, response, probe_type, probe, changed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                monitor.name,
                monitor.owner,
                monitor.description,
                monitor.response,
                monitor.probe_type.0,
                probe,
                changed,
            ],
        )?;
        monitor.id = MonitorId(conn.last_insert_rowid());
    } else {
        let n = conn.execute(
            "UPDATE monitors SET name=?1, owner=?2, description=?3, response=?4, probe_type=?5,
             probe=?6, changed=?7 WHERE id=?8",
            params![
                monitor.name,
                monitor.owner,
                monitor.description,
                monitor.response,
                monitor.probe_type.0,
                probe,
                changed,
                monitor.id.0,
            ],
        )?;
        if n == 0 {
            return Err(DbError::NotFound);
        }
    }

    let existing: HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT trigger_id FROM monitor_triggers WHERE monitor_id = ?1")?;
        let ids = stmt
            .query_map(params![monitor.id.0], |row| row.get(0))?
            .collect::<SqlResult<HashSet<i64>>>()?;
        ids
    };
    conn.execute(
        "DELETE FROM monitor_triggers WHERE monitor_id = ?1",
        params![monitor.id.0],
    )?;

    let mut kept = HashSet::new();
    for trigger in monitor.triggers.iter_mut() {
        // Keep ids of triggers that already belong to this monitor so
        // escalation state survives an edit.
        if existing.contains(&trigger.id.0) {
            conn.execute(
                "UPDATE triggers SET level=?1, period_milli=?2, target_type=?3, target=?4 WHERE id=?5",
                params![
                    trigger.level.as_i64(),
                    trigger.period_milli,
                    trigger.target_type.0,
                    trigger.target,
                    trigger.id.0,
                ],
            )?;
        } else {
            trigger.id = insert_trigger(conn, &trigger.record())?;
        }
        kept.insert(trigger.id.0);
        trigger.monitor_id = monitor.id;

        conn.execute(
            "INSERT INTO monitor_triggers (monitor_id, trigger_id, subprobes) VALUES (?1, ?2, ?3)",
            params![monitor.id.0, trigger.id.0, trigger.subprobes()],
        )?;
    }

    for stale in existing.difference(&kept) {
        conn.execute("DELETE FROM triggers WHERE id = ?1", params![stale])?;
    }
    Ok(())
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("bad timestamp {:?}", s).into())
    })
}

fn level_column(row: &Row<'_>, idx: usize) -> SqlResult<AlertLevel> {
    let v: i64 = row.get(idx)?;
    AlertLevel::from_i64(v).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, format!("bad alert level {}", v).into())
    })
}

fn format_db_time(t: DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::GRAPHITE_SOURCE;
    use crate::model::MonitorInput;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn graphite(store: &Store) -> DatasourceId {
        let mut record = DatasourceRecord {
            id: DatasourceId(0),
            source_type: GRAPHITE_SOURCE,
            source: r#"{"URL":"http://graphite.internal"}"#.to_string(),
        };
        store.save_datasource(&mut record).unwrap()
    }

    fn monitor(catalog: &Catalog, source: DatasourceId) -> Monitor {
        let input: MonitorInput = serde_json::from_value(json!({
            "name": "queue depth",
            "probeType": 1,
            "probe": {
                "SourceID": source.0,
                "Expression": "queues.*.depth",
                "Thresholds": {"Critical": 90},
                "AuditFunction": "last",
                "CheckPeriod": 5,
                "CheckPeriodType": "minute",
                "TriggerIf": ">",
                "AuditPeriod": 5,
                "AuditPeriodType": "minute"
            },
            "triggers": [
                {"level": "critical", "targetType": 1,
                 "target": {"Addresses": [{"To": "a@b.com"}]}},
                {"level": "warning", "subprobes": "shard-.*", "targetType": 1,
                 "target": {"Addresses": [{"To": "c@d.com"}]}}
            ]
        }))
        .unwrap();
        input.build(catalog, Utc::now()).unwrap()
    }

    #[test]
    fn test_time_format_round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap() + Duration::nanoseconds(5);
        assert_eq!(parse_db_time(&format_db_time(t)), Some(t));
        assert!(parse_db_time("yesterday").is_none());
    }

    #[test]
    fn test_datasource_lookup_in_transaction() {
        let (_tmp, store) = store();
        let id = graphite(&store);

        let found = store
            .transaction(|tx| tx.load_datasource(id))
            .unwrap()
            .unwrap();
        assert_eq!(found.source_type, GRAPHITE_SOURCE);

        let missing = store
            .transaction(|tx| tx.load_datasource(DatasourceId(99)))
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(store.get_datasources().unwrap().len(), 1);
    }

    #[test]
    fn test_save_datasources_is_all_or_nothing() {
        let (_tmp, store) = store();
        let existing = graphite(&store);

        let mut batch = vec![
            DatasourceRecord {
                id: DatasourceId(0),
                source_type: GRAPHITE_SOURCE,
                source: r#"{"URL":"http://a"}"#.to_string(),
            },
            DatasourceRecord {
                id: DatasourceId(77),
                source_type: GRAPHITE_SOURCE,
                source: r#"{"URL":"http://b"}"#.to_string(),
            },
        ];
        assert!(matches!(store.save_datasources(&mut batch), Err(DbError::NotFound)));
        assert_eq!(store.get_datasources().unwrap().len(), 1);

        batch[1].id = existing;
        batch[0].id = DatasourceId(0);
        store.save_datasources(&mut batch).unwrap();
        let all = store.get_datasources().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source, r#"{"URL":"http://b"}"#);
    }

    #[test]
    fn test_monitor_save_and_load() {
        let (_tmp, store) = store();
        let catalog = Catalog::builtin().unwrap();
        let source = graphite(&store);

        let mut m = monitor(&catalog, source);
        let id = store.save_monitor(&mut m, &catalog).unwrap();
        assert!(id.0 > 0);
        assert!(m.triggers.iter().all(|t| t.id.0 > 0 && t.monitor_id == id));

        let loaded = store.load_monitor(id, &catalog).unwrap().unwrap();
        assert_eq!(loaded.name, "queue depth");
        assert!(loaded.probe.uses_datasource(source));
        assert_eq!(loaded.probe.to_display_fields()["URL"], "http://graphite.internal");
        assert_eq!(
            loaded.probe.to_storage_encoding().unwrap(),
            m.probe.to_storage_encoding().unwrap()
        );
        assert_eq!(loaded.triggers.len(), 2);
        assert_eq!(loaded.triggers[1].subprobes(), "shard-.*");

        assert_eq!(store.get_monitor_summaries().unwrap().len(), 1);
        assert!(store.load_monitor(MonitorId(404), &catalog).unwrap().is_none());
    }

    #[test]
    fn test_monitor_full_replace_keeps_surviving_triggers() {
        let (_tmp, store) = store();
        let catalog = Catalog::builtin().unwrap();
        let source = graphite(&store);

        let mut m = monitor(&catalog, source);
        store.save_monitor(&mut m, &catalog).unwrap();
        let kept_id = m.triggers[0].id;

        m.triggers.truncate(1);
        m.triggers[0].level = AlertLevel::Error;
        store.save_monitor(&mut m, &catalog).unwrap();

        let triggers = store.get_triggers(m.id).unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].id, kept_id);
        assert_eq!(triggers[0].level, AlertLevel::Error);
    }

    #[test]
    fn test_save_monitor_rejects_dangling_datasource() {
        let (_tmp, store) = store();
        let catalog = Catalog::builtin().unwrap();

        let mut m = monitor(&catalog, DatasourceId(12));
        let err = store.save_monitor(&mut m, &catalog).unwrap_err();
        assert!(matches!(err, ModelError::UnknownDatasource(DatasourceId(12))));
        assert!(store.get_monitor_summaries().unwrap().is_empty());

        let mut foreign = DatasourceRecord {
            id: DatasourceId(0),
            source_type: SourceType(9),
            source: "{}".to_string(),
        };
        let foreign_id = store.save_datasource(&mut foreign).unwrap();
        let mut m = monitor(&catalog, foreign_id);
        let err = store.save_monitor(&mut m, &catalog).unwrap_err();
        assert!(err.is_referential());
        assert!(store.get_monitor_summaries().unwrap().is_empty());
    }

    #[test]
    fn test_load_monitor_after_datasource_removed() {
        let (_tmp, store) = store();
        let catalog = Catalog::builtin().unwrap();
        let source = graphite(&store);

        let mut m = monitor(&catalog, source);
        let id = store.save_monitor(&mut m, &catalog).unwrap();
        store
            .conn()
            .unwrap()
            .execute("DELETE FROM datasources WHERE id = ?1", params![source.0])
            .unwrap();
        let err = store.load_monitor(id, &catalog).unwrap_err();
        assert!(err.is_referential());
    }

    #[test]
    fn test_label_triggers_reach_labelled_monitors() {
        let (_tmp, store) = store();
        let catalog = Catalog::builtin().unwrap();
        let source = graphite(&store);
        let mut m = monitor(&catalog, source);
        m.triggers.clear();
        store.save_monitor(&mut m, &catalog).unwrap();

        let label = store.add_label("payments").unwrap();
        store.label_monitor(label, m.id).unwrap();
        let record = TriggerRecord {
            id: TriggerId(0),
            level: AlertLevel::Error,
            period_milli: 0,
            target_type: TargetTypeId(1),
            target: r#"{"Addresses":[{"To":"a@b.com"}]}"#.to_string(),
        };
        let trigger_id = store.add_label_trigger(label, &record).unwrap();

        let triggers = store.get_triggers(m.id).unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].id, trigger_id);
        assert_eq!(triggers[0].owner, TriggerOwner::Label { label_id: label });
        assert_eq!(triggers[0].subprobes(), "");
    }

    #[test]
    fn test_subprobes_and_readings() {
        let (_tmp, store) = store();
        let catalog = Catalog::builtin().unwrap();
        let source = graphite(&store);
        let mut m = monitor(&catalog, source);
        store.save_monitor(&mut m, &catalog).unwrap();

        let a = store.upsert_subprobe(m.id, "shard-1").unwrap();
        let again = store.upsert_subprobe(m.id, "shard-1").unwrap();
        assert_eq!(a.id, again.id);
        let b = store.upsert_subprobe(m.id, "shard-2").unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.add_reading(a.id, t0, AlertLevel::Normal, "10").unwrap();
        store
            .add_reading(a.id, t0 + Duration::minutes(1), AlertLevel::Critical, "95")
            .unwrap();

        let readings = store.get_readings(a.id, 10).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].level, AlertLevel::Critical);

        let after_first = store.get_readings_after(a.id, readings[1].id).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].value, "95");
        let all = store.get_readings_after(a.id, ReadingId(0)).unwrap();
        assert_eq!(all.iter().map(|r| r.value.as_str()).collect::<Vec<_>>(), vec!["10", "95"]);

        let latest = store.get_latest_readings(m.id).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].0.name, "shard-1");
        assert_eq!(latest[0].1.value, "95");

        assert_eq!(store.get_subprobes(m.id).unwrap().len(), 2);
        assert!(store.get_readings(b.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_silence_crud_and_activity() {
        let (_tmp, store) = store();
        let catalog = Catalog::builtin().unwrap();
        let source = graphite(&store);
        let mut m = monitor(&catalog, source);
        store.save_monitor(&mut m, &catalog).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut s = Silence {
            id: SilenceId(0),
            monitor_id: m.id,
            monitor_name: String::new(),
            subprobe: "shard-3".to_string(),
            start: now,
            end: now + Duration::hours(2),
        };
        let id = store.save_silence(&mut s).unwrap();

        let loaded = store.get_silence(id).unwrap().unwrap();
        assert_eq!(loaded.monitor_name, "queue depth");
        assert_eq!(loaded.start, now);

        assert_eq!(store.get_active_silences(m.id, now).unwrap().len(), 1);
        assert!(store
            .get_active_silences(m.id, now + Duration::hours(2))
            .unwrap()
            .is_empty());
        assert!(store
            .get_active_silences(MonitorId(999), now)
            .unwrap()
            .is_empty());

        s.end = now + Duration::hours(3);
        store.save_silence(&mut s).unwrap();
        assert_eq!(store.get_silences().unwrap()[0].end, now + Duration::hours(3));

        let mut ghost = s.clone();
        ghost.id = SilenceId(4242);
        assert!(matches!(store.save_silence(&mut ghost), Err(DbError::NotFound)));
    }
}
