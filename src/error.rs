//! Error types shared by the probe, target, datasource and trigger models.

use thiserror::Error;

use crate::db::DbError;
use crate::model::{DatasourceId, ProbeType, SourceType, TargetTypeId};

/// Failure to load, encode or resolve a piece of configuration.
///
/// None of these are fatal: callers surface them for the unit of work
/// (one monitor, one trigger, one request) and carry on.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("malformed configuration: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unable to encode configuration: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("no data source found: {0}")]
    UnknownDatasource(DatasourceId),
    #[error("data source {id} has type {found}, which this probe does not accept")]
    IncompatibleDatasource { id: DatasourceId, found: SourceType },
    #[error("probe type not found: {0}")]
    UnknownProbeType(ProbeType),
    #[error("target type not found: {0}")]
    UnknownTargetType(TargetTypeId),
    #[error("data source type not found: {0}")]
    UnknownSourceType(SourceType),
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl ModelError {
    /// True for errors caused by a dangling or mismatched reference rather
    /// than a malformed payload.
    pub fn is_referential(&self) -> bool {
        matches!(
            self,
            ModelError::UnknownDatasource(_)
                | ModelError::IncompatibleDatasource { .. }
                | ModelError::UnknownProbeType(_)
                | ModelError::UnknownTargetType(_)
                | ModelError::UnknownSourceType(_)
        )
    }
}

/// Startup-time registration failure.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{registry} type {id} registered twice")]
    Duplicate { registry: &'static str, id: String },
}
