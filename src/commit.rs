//! Commit orchestration
//!
//! Validates and commits every dirty configuration class, syncing the
//! address model into the IP handle first. Commit is fail-fast and not
//! transactional across classes: a failure aborts the remaining commits
//! and already-committed classes are not rolled back.

use crate::address::AddressModel;
use crate::error::{NcuError, NcuResult};
use crate::handles::{HandleRegistry, NcuClass};
use crate::store::props;
use tracing::{debug, info, warn};

/// Per-class outcome of one commit run
pub struct CommitReport {
    /// One entry per attempted class, in commit order
    pub results: Vec<(NcuClass, NcuResult<()>)>,
    /// Desired enabled value after the run (forced false when both
    /// families ended up inactive)
    pub enabled: bool,
    /// False when a class failure aborted the remaining commits
    pub completed: bool,
}

/// Orchestrates validate → sync-address-model → commit over dirty classes
pub struct CommitPipeline<'a> {
    registry: &'a mut HandleRegistry,
    addresses: &'a AddressModel,
}

impl<'a> CommitPipeline<'a> {
    pub fn new(registry: &'a mut HandleRegistry, addresses: &'a AddressModel) -> Self {
        Self { registry, addresses }
    }

    /// Validates every dirty class with a present handle; the first
    /// failure short-circuits and names the class and property.
    pub fn validate(&self) -> NcuResult<()> {
        for class in NcuClass::ALL {
            if self.registry.is_modified(class) && self.registry.handle(class).is_some() {
                self.registry.validate(class)?;
            }
        }
        Ok(())
    }

    /// Commits every dirty class. Precondition: [`validate`](Self::validate)
    /// succeeded.
    ///
    /// The IP class gets the address model synced in first so the address
    /// arrays reflect the latest edits; when both families end up inactive
    /// the NCU is additionally marked disabled ("no IP family active means
    /// the interface is off"). After a successful IP commit the store's
    /// `enabled` value is reconciled against the desired one with an
    /// explicit enable/disable call, since some activation modes make
    /// `enabled` a derived property.
    pub fn commit(&mut self, desired_enabled: bool) -> NcuResult<CommitReport> {
        let mut enabled = desired_enabled;

        if self.registry.is_modified(NcuClass::Ip) && self.registry.handle(NcuClass::Ip).is_some() {
            let any_active = self.addresses.sync(self.registry)?;
            if !any_active && enabled {
                info!(ncu = self.registry.name(), "no IP family active, disabling NCU");
                enabled = false;
            }
        }

        let mut results = Vec::new();
        let mut completed = true;

        for class in NcuClass::ALL {
            if !self.registry.is_modified(class) {
                continue;
            }
            // A dirty class without a handle cannot be persisted; dropping
            // the edit silently is not an option, so the commit fails.
            if self.registry.handle(class).is_none() {
                warn!(ncu = self.registry.name(), %class, "dirty class has no configuration object");
                results.push((
                    class,
                    Err(NcuError::CommitFailed {
                        class,
                        reason: "class not configured in the store".to_string(),
                    }),
                ));
                completed = false;
                break;
            }
            match self.registry.commit(class) {
                Ok(()) => {
                    if class == NcuClass::Ip {
                        self.reconcile_enabled(enabled);
                    }
                    results.push((class, Ok(())));
                }
                Err(e) => {
                    warn!(ncu = self.registry.name(), %class, error = %e, "commit aborted");
                    results.push((
                        class,
                        Err(NcuError::CommitFailed { class, reason: e.to_string() }),
                    ));
                    completed = false;
                    break;
                }
            }
        }

        Ok(CommitReport { results, enabled, completed })
    }

    /// Issues an explicit enable/disable when the store's committed
    /// `enabled` value disagrees with the desired one. Best-effort: a
    /// reconciliation failure is logged, not propagated.
    fn reconcile_enabled(&mut self, desired: bool) {
        let Some(phys) = self.registry.handle(NcuClass::Phys) else {
            return;
        };
        let stored = self
            .registry
            .get_prop(NcuClass::Phys, props::ENABLED)
            .ok()
            .and_then(|v| v.as_bool(props::ENABLED).ok());
        if stored == Some(desired) {
            return;
        }

        debug!(ncu = self.registry.name(), desired, ?stored, "reconciling enabled state");
        let result = if desired {
            self.registry.store().enable(phys)
        } else {
            self.registry.store().disable(phys)
        };
        if let Err(e) = result {
            warn!(ncu = self.registry.name(), error = %e, "enable/disable reconciliation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::IpFamily;
    use crate::store::{MemoryStore, OpenMode};
    use crate::value::PropertyValue;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, HandleRegistry, AddressModel) {
        let store = Arc::new(MemoryStore::new());
        store.seed_ncu("net0", &[NcuClass::Phys, NcuClass::Ip]);
        let mut registry = HandleRegistry::new(store.clone(), "net0");
        assert!(registry.open(OpenMode::Open).is_empty());
        (store, registry, AddressModel::new())
    }

    #[test]
    fn test_validation_short_circuits_with_property_name() {
        let (store, mut registry, model) = setup();
        registry
            .set_prop(NcuClass::Ip, props::IP_VERSION, vec![4u64].into())
            .unwrap();
        store.inject_validate_failure(NcuClass::Ip, props::IPV4_ADDR);

        let pipeline = CommitPipeline::new(&mut registry, &model);
        let err = pipeline.validate().unwrap_err();
        match err {
            NcuError::ValidationFailed { class, property } => {
                assert_eq!(class, NcuClass::Ip);
                assert_eq!(property, props::IPV4_ADDR);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_partial_class_failure_keeps_ip_dirty() {
        let (store, mut registry, mut model) = setup();
        registry
            .set_prop(NcuClass::Phys, props::VANITY_NAME, "Office".into())
            .unwrap();
        model.add_static(IpFamily::V4, "10.0.0.9", "24").unwrap();
        registry.mark_modified(NcuClass::Ip);
        store.inject_commit_failure(NcuClass::Ip, "daemon rejected");

        let mut pipeline = CommitPipeline::new(&mut registry, &model);
        let report = pipeline.commit(true).unwrap();

        assert!(!report.completed);
        assert_eq!(report.results.len(), 2);
        assert!(report.results[0].1.is_ok());
        assert!(report.results[1].1.is_err());
        // PHYS committed and clean, IP still dirty; no rollback of PHYS.
        assert!(!registry.is_modified(NcuClass::Phys));
        assert!(registry.is_modified(NcuClass::Ip));
        assert_eq!(
            store.committed_prop("net0", NcuClass::Phys, props::VANITY_NAME),
            Some(PropertyValue::from("Office"))
        );
    }

    #[test]
    fn test_both_families_inactive_disables_ncu() {
        let (store, mut registry, mut model) = setup();
        model.set_active(IpFamily::V4, false);
        model.set_active(IpFamily::V6, false);
        registry.mark_modified(NcuClass::Ip);

        let mut pipeline = CommitPipeline::new(&mut registry, &model);
        let report = pipeline.commit(true).unwrap();

        assert!(report.completed);
        assert!(!report.enabled);
        assert_eq!(
            store.committed_prop("net0", NcuClass::Phys, props::ENABLED),
            Some(PropertyValue::from(false))
        );
    }

    #[test]
    fn test_dirty_class_without_handle_fails_commit() {
        let store = Arc::new(MemoryStore::new());
        store.seed_ncu("net0", &[NcuClass::Phys]);
        let mut registry = HandleRegistry::new(store, "net0");
        assert!(registry.open(OpenMode::Open).is_empty());
        assert!(registry.handle(NcuClass::Ip).is_none());

        // Address-model edits dirty the IP class even though the store has
        // no IP object yet.
        let mut model = AddressModel::new();
        model.set_active(IpFamily::V4, true);
        model.set_dhcp(IpFamily::V4, true);
        registry.mark_modified(NcuClass::Ip);

        let mut pipeline = CommitPipeline::new(&mut registry, &model);
        let report = pipeline.commit(true).unwrap();

        assert!(!report.completed);
        let (class, result) = report.results.last().unwrap();
        assert_eq!(*class, NcuClass::Ip);
        assert!(matches!(result, Err(NcuError::CommitFailed { class: NcuClass::Ip, .. })));
        // The edit is not dropped: the class stays dirty for a retry.
        assert!(registry.is_modified(NcuClass::Ip));
    }

    #[test]
    fn test_sync_runs_before_ip_commit() {
        let (store, mut registry, mut model) = setup();
        model.add_static(IpFamily::V4, "192.168.7.2", "24").unwrap();
        registry.mark_modified(NcuClass::Ip);

        let mut pipeline = CommitPipeline::new(&mut registry, &model);
        let report = pipeline.commit(true).unwrap();
        assert!(report.completed);

        assert_eq!(
            store.committed_prop("net0", NcuClass::Ip, props::IPV4_ADDR),
            Some(PropertyValue::from(vec!["192.168.7.2/24".to_string()]))
        );
    }
}
