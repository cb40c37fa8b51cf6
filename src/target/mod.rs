//! Notification channel configurations.
//!
//! Targets are shared: many triggers may point at equivalent target
//! configurations. Unlike probes they hold no cross-references, so one
//! encoding serves both user input and storage.

mod email;

pub use email::*;

use std::fmt;

use crate::error::ModelError;
use crate::model::{DisplayFields, Scripts, TargetTypeId, Templates};

/// A registered kind of target.
pub trait TargetKind: Send + Sync {
    fn id(&self) -> TargetTypeId;

    fn name(&self) -> &'static str;

    fn load(&self, raw: &str) -> Result<Box<dyn Target>, ModelError>;

    /// Zero-valued instance backing an empty edit form.
    fn blank(&self) -> Box<dyn Target>;

    fn templates(&self) -> Templates;

    fn scripts(&self) -> Scripts {
        Scripts::new()
    }
}

/// A loaded target configuration.
pub trait Target: fmt::Debug + Send + Sync {
    fn kind(&self) -> TargetTypeId;

    fn validate(&self) -> Vec<String>;

    fn encode(&self) -> Result<String, ModelError>;

    fn to_display_fields(&self) -> DisplayFields;

    /// Short description of where notifications go, for logs.
    fn recipients(&self) -> String;
}
