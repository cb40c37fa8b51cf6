//! HTTP request handlers.

use super::AppState;
use crate::datasource::DatasourceRecord;
use crate::db::DbError;
use crate::error::ModelError;
use crate::model::{
    DatasourceId, DisplayFields, MonitorId, MonitorInput, ProbeType, Reading, Scripts, SilenceId,
    SourceType, Subprobe, TargetTypeId, Templates, TriggerId,
};
use crate::period;
use crate::probe::{format_threshold, DataPoint};
use crate::silence::{Silence, SilenceState};
use crate::trigger::{Trigger, TriggerOwner};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

// ============================================================================
// Responses
// ============================================================================

fn internal_error(e: impl fmt::Display) -> Response {
    tracing::error!("Web: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, format!("{} not found", what)).into_response()
}

/// Validation failures are reported in-band so forms can show them.
fn validation_errors(errors: Vec<String>) -> Response {
    Json(json!({ "errors": errors })).into_response()
}

/// A stored monitor whose probe points at a missing or incompatible
/// datasource. Reported in the same shape as validation failures.
fn broken_reference(e: &ModelError) -> Response {
    (
        StatusCode::CONFLICT,
        Json(json!({ "errors": [format!("Invalid probe: {}", e)] })),
    )
        .into_response()
}

fn load_failure(e: ModelError) -> Response {
    if e.is_referential() {
        broken_reference(&e)
    } else {
        internal_error(e)
    }
}

fn redirect(to: String) -> Response {
    Json(json!({ "redirect": to })).into_response()
}

fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("malformed request: {}", e)).into_response()
    })
}

// ============================================================================
// API: Monitors
// ============================================================================

pub async fn handle_get_monitors(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_monitor_summaries() {
        Ok(monitors) => Json(monitors).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerView {
    pub id: TriggerId,
    pub level: crate::model::AlertLevel,
    pub period_milli: i64,
    /// Wait period in words, e.g. "10 minutes".
    pub period: String,
    #[serde(flatten)]
    pub owner: TriggerOwner,
    pub target_type: TargetTypeId,
    pub target: DisplayFields,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorView {
    pub id: MonitorId,
    pub name: String,
    pub owner: String,
    pub description: String,
    pub response: String,
    pub probe_type: ProbeType,
    pub probe_name: &'static str,
    pub probe: DisplayFields,
    pub triggers: Vec<TriggerView>,
    pub changed: DateTime<Utc>,
}

fn trigger_view(state: &AppState, trigger: &Trigger) -> TriggerView {
    let target = match trigger.resolve_target(&state.catalog) {
        Ok(target) => target.to_display_fields(),
        Err(e) => {
            tracing::warn!("Web: Unable to load target of trigger {}: {}", trigger.id, e);
            DisplayFields::new()
        }
    };
    TriggerView {
        id: trigger.id,
        level: trigger.level,
        period_milli: trigger.period_milli,
        period: period::describe(trigger.period_milli),
        owner: trigger.owner.clone(),
        target_type: trigger.target_type,
        target,
    }
}

pub async fn handle_get_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    let monitor = match state.store.load_monitor(MonitorId(id), &state.catalog) {
        Ok(Some(m)) => m,
        Ok(None) => return not_found("Monitor"),
        Err(e) => return load_failure(e),
    };

    let probe_name = state
        .catalog
        .probe_kind(monitor.probe_type)
        .map(|k| k.name())
        .unwrap_or_default();

    let view = MonitorView {
        id: monitor.id,
        probe_name,
        probe: monitor.probe.to_display_fields(),
        triggers: monitor.triggers.iter().map(|t| trigger_view(&state, t)).collect(),
        name: monitor.name,
        owner: monitor.owner,
        description: monitor.description,
        response: monitor.response,
        probe_type: monitor.probe_type,
        changed: monitor.changed,
    };
    Json(view).into_response()
}

pub async fn handle_save_monitor(State(state): State<AppState>, body: Bytes) -> Response {
    let input: MonitorInput = match decode_body(&body) {
        Ok(input) => input,
        Err(resp) => return resp,
    };

    let mut monitor = match input.build(&state.catalog, Utc::now()) {
        Ok(m) => m,
        Err(errs) => return validation_errors(errs),
    };

    match state.store.save_monitor(&mut monitor, &state.catalog) {
        Ok(id) => {
            tracing::info!("Web: Saved monitor {} ({})", monitor.name, id);
            redirect(format!("/monitors/{}", id))
        }
        Err(ModelError::Storage(DbError::NotFound)) => not_found("Monitor"),
        Err(e) if e.is_referential() => validation_errors(vec![format!("Invalid probe: {}", e)]),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// API: Subprobes and readings
// ============================================================================

#[derive(Debug, Serialize)]
pub struct LatestReading {
    pub subprobe: Subprobe,
    pub reading: Reading,
}

pub async fn handle_get_readings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_latest_readings(MonitorId(id)) {
        Ok(rows) => {
            let latest: Vec<LatestReading> = rows
                .into_iter()
                .map(|(subprobe, reading)| LatestReading { subprobe, reading })
                .collect();
            Json(latest).into_response()
        }
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SampleRequest {
    pub points: Vec<DataPoint>,
}

/// Accept datapoints fetched for one subprobe, assess them with the
/// monitor's probe and record the resulting reading.
pub async fn handle_post_samples(
    State(state): State<AppState>,
    Path((id, name)): Path<(i64, String)>,
    body: Bytes,
) -> Response {
    let req: SampleRequest = match decode_body(&body) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Subprobe name is required").into_response();
    }

    let monitor = match state.store.load_monitor(MonitorId(id), &state.catalog) {
        Ok(Some(m)) => m,
        Ok(None) => return not_found("Monitor"),
        Err(e) => return load_failure(e),
    };

    let now = Utc::now();
    let assessment = monitor.probe.assess(&req.points, now);

    let recorded = state
        .store
        .upsert_subprobe(monitor.id, &name)
        .and_then(|sp| {
            state
                .store
                .add_reading(sp.id, now, assessment.level, &format_threshold(assessment.value))
        });

    match recorded {
        Ok(reading) => {
            tracing::debug!(
                "Web: Recorded {} for {}/{} from {} points",
                reading.level,
                monitor.name,
                name,
                req.points.len()
            );
            Json(reading).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// API: Kinds
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindView {
    pub id: u16,
    pub name: &'static str,
    #[serde(skip_serializing_if = "Templates::is_empty")]
    pub templates: Templates,
    #[serde(skip_serializing_if = "Scripts::is_empty")]
    pub scripts: Scripts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub accepted_source_types: Vec<SourceType>,
}

pub async fn handle_get_probe_kinds(State(state): State<AppState>) -> impl IntoResponse {
    let kinds: Vec<KindView> = state
        .catalog
        .probe_kinds()
        .map(|k| KindView {
            id: k.id().0,
            name: k.name(),
            templates: k.templates(),
            scripts: k.scripts(),
            accepted_source_types: k.accepted_source_kinds().to_vec(),
        })
        .collect();
    Json(kinds)
}

pub async fn handle_get_target_kinds(State(state): State<AppState>) -> impl IntoResponse {
    let kinds: Vec<KindView> = state
        .catalog
        .target_kinds()
        .map(|k| KindView {
            id: k.id().0,
            name: k.name(),
            templates: k.templates(),
            scripts: k.scripts(),
            accepted_source_types: Vec::new(),
        })
        .collect();
    Json(kinds)
}

pub async fn handle_get_source_kinds(State(state): State<AppState>) -> impl IntoResponse {
    let kinds: Vec<KindView> = state
        .catalog
        .source_kinds()
        .map(|k| KindView {
            id: k.id().0,
            name: k.name(),
            templates: Templates::new(),
            scripts: Scripts::new(),
            accepted_source_types: Vec::new(),
        })
        .collect();
    Json(kinds)
}

/// Display fields of an empty probe, backing a blank edit form.
pub async fn handle_blank_probe(
    State(state): State<AppState>,
    Path(id): Path<u16>,
) -> impl IntoResponse {
    match state.catalog.probe_kind(ProbeType(id)) {
        Ok(kind) => Json(kind.blank().to_display_fields()).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

pub async fn handle_blank_target(
    State(state): State<AppState>,
    Path(id): Path<u16>,
) -> impl IntoResponse {
    match state.catalog.target_kind(TargetTypeId(id)) {
        Ok(kind) => Json(kind.blank().to_display_fields()).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Silences
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SilenceView {
    #[serde(flatten)]
    pub silence: Silence,
    pub editable: bool,
    pub state: SilenceState,
}

impl SilenceView {
    fn new(silence: Silence, now: DateTime<Utc>) -> Self {
        Self {
            editable: silence.editable(now),
            state: silence.state(now),
            silence,
        }
    }
}

fn silence_views(silences: Vec<Silence>) -> Vec<SilenceView> {
    let now = Utc::now();
    silences.into_iter().map(|s| SilenceView::new(s, now)).collect()
}

pub async fn handle_get_silences(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_silences() {
        Ok(silences) => Json(silence_views(silences)).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_get_silence(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_silence(SilenceId(id)) {
        Ok(Some(s)) => Json(SilenceView::new(s, Utc::now())).into_response(),
        Ok(None) => not_found("Silence"),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// Silences of one monitor in force at `at` (default now).
pub async fn handle_get_active_silences(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ActiveQuery>,
) -> impl IntoResponse {
    let at = query.at.unwrap_or_else(Utc::now);
    match state.store.get_active_silences(MonitorId(id), at) {
        Ok(silences) => Json(silence_views(silences)).into_response(),
        Err(e) => internal_error(e),
    }
}

pub async fn handle_save_silence(State(state): State<AppState>, body: Bytes) -> Response {
    let mut silence: Silence = match decode_body(&body) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let previous = if silence.id == SilenceId(0) {
        None
    } else {
        match state.store.get_silence(silence.id) {
            Ok(Some(old)) => Some(old),
            Ok(None) => {
                return validation_errors(vec![format!(
                    "Unable to load original silence with id {}",
                    silence.id
                )])
            }
            Err(e) => return internal_error(e),
        }
    };

    let errs = silence.validate(Utc::now(), previous.as_ref());
    if !errs.is_empty() {
        return validation_errors(errs);
    }

    match state.store.save_silence(&mut silence) {
        Ok(id) => {
            tracing::info!("Web: Saved silence {} for monitor {}", id, silence.monitor_id);
            redirect("/silences".to_string())
        }
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// API: Settings (datasources)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceView {
    pub id: DatasourceId,
    pub source_type: SourceType,
    pub source_name: &'static str,
    pub fields: DisplayFields,
}

pub async fn handle_get_datasources(State(state): State<AppState>) -> impl IntoResponse {
    let records = match state.store.get_datasources() {
        Ok(r) => r,
        Err(e) => return internal_error(e),
    };

    let views: Vec<DatasourceView> = records
        .into_iter()
        .map(|record| {
            let source_name = state
                .catalog
                .source_kind(record.source_type)
                .map(|k| k.name())
                .unwrap_or_default();
            let fields = match state.catalog.load_source(record.source_type, &record.source) {
                Ok(ds) => ds.to_display_fields(),
                Err(e) => {
                    tracing::warn!("Web: Unable to load data source {}: {}", record.id, e);
                    DisplayFields::new()
                }
            };
            DatasourceView {
                id: record.id,
                source_type: record.source_type,
                source_name,
                fields,
            }
        })
        .collect();
    Json(views).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceInput {
    #[serde(default)]
    pub id: DatasourceId,
    pub source_type: SourceType,
    pub source: serde_json::Value,
}

/// Validate every submitted datasource, then save them all together.
pub async fn handle_save_datasources(State(state): State<AppState>, body: Bytes) -> Response {
    let inputs: Vec<DatasourceInput> = match decode_body(&body) {
        Ok(inputs) => inputs,
        Err(resp) => return resp,
    };

    let mut errs = Vec::new();
    let mut records = Vec::with_capacity(inputs.len());
    for input in inputs {
        let loaded = state
            .catalog
            .load_source(input.source_type, &input.source.to_string());
        let ds = match loaded {
            Ok(ds) => ds,
            Err(e) => {
                errs.push(format!("Invalid data source: {}", e));
                continue;
            }
        };
        errs.extend(ds.validate());
        match ds.encode() {
            Ok(source) => records.push(DatasourceRecord {
                id: input.id,
                source_type: input.source_type,
                source,
            }),
            Err(e) => errs.push(format!("Invalid data source: {}", e)),
        }
    }

    if !errs.is_empty() {
        return validation_errors(errs);
    }

    match state.store.save_datasources(&mut records) {
        Ok(()) => {
            tracing::info!("Web: Saved {} data sources", records.len());
            redirect("/settings".to_string())
        }
        Err(DbError::NotFound) => not_found("Data source"),
        Err(e) => internal_error(e),
    }
}
