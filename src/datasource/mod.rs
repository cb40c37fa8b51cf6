//! External systems that probes read metrics from.
//!
//! Datasources are stored independently of monitors and referenced by id.
//! Each kind owns its own configuration schema.

mod graphite;

pub use graphite::*;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::db::DbError;
use crate::error::ModelError;
use crate::model::{DatasourceId, DisplayFields, SourceType};

/// A registered kind of datasource.
pub trait SourceKind: Send + Sync {
    fn id(&self) -> SourceType;

    fn name(&self) -> &'static str;

    /// Parse a configuration payload, submitted or stored (both share one
    /// encoding).
    fn load(&self, raw: &str) -> Result<Box<dyn Datasource>, ModelError>;
}

/// A loaded datasource configuration.
pub trait Datasource: fmt::Debug + Send + Sync {
    fn kind(&self) -> SourceType;

    fn validate(&self) -> Vec<String>;

    fn encode(&self) -> Result<String, ModelError>;

    fn to_display_fields(&self) -> DisplayFields;
}

/// A datasource row: its kind plus its still-encoded configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceRecord {
    pub id: DatasourceId,
    pub source_type: SourceType,
    pub source: String,
}

/// Read access to persisted datasources, scoped to one transaction.
///
/// Probe loading performs every cross-reference read through this handle
/// so it observes a single consistent snapshot. Implementations must not
/// open transactions of their own or retry.
pub trait DatasourceLookup {
    fn load_datasource(&self, id: DatasourceId) -> Result<Option<DatasourceRecord>, DbError>;
}

/// An in-memory snapshot of datasource rows, keyed by id.
impl DatasourceLookup for BTreeMap<DatasourceId, DatasourceRecord> {
    fn load_datasource(&self, id: DatasourceId) -> Result<Option<DatasourceRecord>, DbError> {
        Ok(self.get(&id).cloned())
    }
}
