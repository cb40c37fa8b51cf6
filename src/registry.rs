//! Tables of the probe, target and datasource kinds compiled into the
//! process.
//!
//! A [`Catalog`] is built once at startup and shared read-only afterwards
//! (behind an `Arc`), so lookups need no locking. Tests build their own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::datasource::{Datasource, DatasourceLookup, GraphiteSource, SourceKind};
use crate::error::{ModelError, RegistryError};
use crate::model::{ProbeType, SourceType, TargetTypeId};
use crate::probe::{GraphiteThreshold, Probe, ProbeKind};
use crate::target::{Email, Target, TargetKind};

/// Kinds of one family keyed by their stable integer id.
pub struct Registry<K, T: ?Sized> {
    family: &'static str,
    kinds: BTreeMap<K, Arc<T>>,
}

impl<K, T> Registry<K, T>
where
    K: Ord + Copy + fmt::Display,
    T: ?Sized,
{
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            kinds: BTreeMap::new(),
        }
    }

    /// Add a kind. A second kind claiming the same id is rejected.
    pub fn register(&mut self, id: K, kind: Arc<T>) -> Result<(), RegistryError> {
        if self.kinds.contains_key(&id) {
            return Err(RegistryError::Duplicate {
                registry: self.family,
                id: id.to_string(),
            });
        }
        self.kinds.insert(id, kind);
        Ok(())
    }

    pub fn lookup(&self, id: K) -> Option<&Arc<T>> {
        self.kinds.get(&id)
    }

    /// All kinds, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = &Arc<T>> + '_ {
        self.kinds.values()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Every registered probe, target and datasource kind.
pub struct Catalog {
    probes: Registry<ProbeType, dyn ProbeKind>,
    targets: Registry<TargetTypeId, dyn TargetKind>,
    sources: Registry<SourceType, dyn SourceKind>,
}

impl Catalog {
    pub fn empty() -> Self {
        Self {
            probes: Registry::new("probe"),
            targets: Registry::new("target"),
            sources: Registry::new("data source"),
        }
    }

    /// Catalog holding every kind shipped with this crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut catalog = Self::empty();
        catalog.register_source(Arc::new(GraphiteSource))?;
        catalog.register_probe(Arc::new(GraphiteThreshold))?;
        catalog.register_target(Arc::new(Email))?;
        Ok(catalog)
    }

    pub fn register_probe(&mut self, kind: Arc<dyn ProbeKind>) -> Result<(), RegistryError> {
        let (id, name) = (kind.id(), kind.name());
        self.probes.register(id, kind)?;
        tracing::debug!("Registered probe type {} ({})", id, name);
        Ok(())
    }

    pub fn register_target(&mut self, kind: Arc<dyn TargetKind>) -> Result<(), RegistryError> {
        let (id, name) = (kind.id(), kind.name());
        self.targets.register(id, kind)?;
        tracing::debug!("Registered target type {} ({})", id, name);
        Ok(())
    }

    pub fn register_source(&mut self, kind: Arc<dyn SourceKind>) -> Result<(), RegistryError> {
        let (id, name) = (kind.id(), kind.name());
        self.sources.register(id, kind)?;
        tracing::debug!("Registered data source type {} ({})", id, name);
        Ok(())
    }

    pub fn probe_kind(&self, id: ProbeType) -> Result<&Arc<dyn ProbeKind>, ModelError> {
        self.probes.lookup(id).ok_or(ModelError::UnknownProbeType(id))
    }

    pub fn target_kind(&self, id: TargetTypeId) -> Result<&Arc<dyn TargetKind>, ModelError> {
        self.targets.lookup(id).ok_or(ModelError::UnknownTargetType(id))
    }

    pub fn source_kind(&self, id: SourceType) -> Result<&Arc<dyn SourceKind>, ModelError> {
        self.sources.lookup(id).ok_or(ModelError::UnknownSourceType(id))
    }

    pub fn probe_kinds(&self) -> impl Iterator<Item = &Arc<dyn ProbeKind>> + '_ {
        self.probes.all()
    }

    pub fn target_kinds(&self) -> impl Iterator<Item = &Arc<dyn TargetKind>> + '_ {
        self.targets.all()
    }

    pub fn source_kinds(&self) -> impl Iterator<Item = &Arc<dyn SourceKind>> + '_ {
        self.sources.all()
    }

    pub fn probe_from_user_input(
        &self,
        id: ProbeType,
        raw: &str,
    ) -> Result<Box<dyn Probe>, ModelError> {
        self.probe_kind(id)?.load_from_user_input(raw)
    }

    pub fn probe_from_storage(
        &self,
        id: ProbeType,
        encoded: &str,
        tx: &dyn DatasourceLookup,
    ) -> Result<Box<dyn Probe>, ModelError> {
        self.probe_kind(id)?.load_from_storage(encoded, tx)
    }

    pub fn load_target(&self, id: TargetTypeId, raw: &str) -> Result<Box<dyn Target>, ModelError> {
        self.target_kind(id)?.load(raw)
    }

    pub fn load_source(&self, id: SourceType, raw: &str) -> Result<Box<dyn Datasource>, ModelError> {
        self.source_kind(id)?.load(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = Catalog::builtin().unwrap();
        assert_eq!(catalog.probe_kinds().count(), 1);
        assert_eq!(catalog.target_kinds().count(), 1);
        assert_eq!(catalog.source_kinds().count(), 1);

        let email = catalog.target_kind(TargetTypeId(1)).unwrap();
        assert_eq!(email.name(), "Email");
        let graphite = catalog.probe_kind(ProbeType(1)).unwrap();
        assert_eq!(graphite.name(), "Graphite Threshold");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut catalog = Catalog::builtin().unwrap();
        let err = catalog.register_target(Arc::new(Email)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                registry: "target",
                id: "1".to_string()
            }
        );
        assert!(catalog.register_probe(Arc::new(GraphiteThreshold)).is_err());
    }

    #[test]
    fn test_unknown_ids() {
        let catalog = Catalog::builtin().unwrap();
        assert!(matches!(
            catalog.target_kind(TargetTypeId(42)),
            Err(ModelError::UnknownTargetType(TargetTypeId(42)))
        ));
        assert!(matches!(
            catalog.probe_kind(ProbeType(0)),
            Err(ModelError::UnknownProbeType(_))
        ));
        assert!(catalog.load_target(TargetTypeId(7), "{}").unwrap_err().is_referential());
    }

    #[test]
    fn test_registry_orders_by_id() {
        let mut registry: Registry<u16, str> = Registry::new("word");
        registry.register(3, Arc::from("three")).unwrap();
        registry.register(1, Arc::from("one")).unwrap();
        let names: Vec<&str> = registry.all().map(|s| &**s).collect();
        assert_eq!(names, vec!["one", "three"]);
        assert!(registry.lookup(2).is_none());
        assert_eq!(registry.len(), 2);
    }
}
