//! Graphite render API endpoint.

use serde::{Deserialize, Serialize};

use super::{Datasource, SourceKind};
use crate::error::ModelError;
use crate::model::{DisplayFields, SourceType};

pub const GRAPHITE_SOURCE: SourceType = SourceType(1);

/// The Graphite datasource kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphiteSource;

impl SourceKind for GraphiteSource {
    fn id(&self) -> SourceType {
        GRAPHITE_SOURCE
    }

    fn name(&self) -> &'static str {
        "Graphite"
    }

    fn load(&self, raw: &str) -> Result<Box<dyn Datasource>, ModelError> {
        Ok(Box::new(GraphiteDatasource::decode(raw)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphiteDatasource {
    #[serde(rename = "URL", default)]
    pub url: String,
}

impl GraphiteDatasource {
    pub fn decode(raw: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl Datasource for GraphiteDatasource {
    fn kind(&self) -> SourceType {
        GRAPHITE_SOURCE
    }

    fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if self.url.is_empty() {
            errs.push("Graphite URL is required".to_string());
        } else if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            errs.push("Graphite URL must start with http:// or https://".to_string());
        }
        errs
    }

    fn encode(&self) -> Result<String, ModelError> {
        serde_json::to_string(self).map_err(ModelError::Encode)
    }

    fn to_display_fields(&self) -> DisplayFields {
        DisplayFields::from([("URL".to_string(), self.url.clone())])
    }
}
