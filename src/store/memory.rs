//! In-process implementation of the configuration store
//!
//! Backs the test suite and lets embedders run the NCU layer without a
//! daemon. Writes land in a pending overlay per object and only become
//! visible to a re-opened handle after `commit`, which mirrors how the
//! daemon separates a handle's staged edits from persisted configuration.
//! Validation and commit failures can be injected per class to exercise
//! the fail-fast commit paths.

use super::{expected_kind, is_read_only, props, ConfigStore, HandleId, OpenMode};
use crate::error::{NcuError, NcuResult};
use crate::handles::NcuClass;
use crate::state::{AuxState, UnitState};
use crate::value::PropertyValue;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

struct StoreObject {
    name: String,
    class: NcuClass,
    committed: HashMap<String, PropertyValue>,
    /// Staged writes; `None` is a deletion tombstone
    pending: HashMap<String, Option<PropertyValue>>,
    state: (UnitState, AuxState),
}

impl StoreObject {
    fn new(name: &str, class: NcuClass) -> Self {
        let mut committed = HashMap::new();
        committed.insert(props::TYPE.to_string(), PropertyValue::from("ncu"));
        committed.insert(props::CLASS.to_string(), PropertyValue::from(class.as_str()));
        committed.insert(props::PARENT.to_string(), PropertyValue::from("Automatic"));
        Self {
            name: name.to_string(),
            class,
            committed,
            pending: HashMap::new(),
            state: (UnitState::Uninitialized, AuxState::Uninitialized),
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    objects: HashMap<u64, StoreObject>,
    by_key: HashMap<(String, NcuClass), u64>,
    fail_validate: HashMap<NcuClass, String>,
    fail_commit: HashMap<NcuClass, String>,
}

/// In-memory [`ConfigStore`]
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seeds committed (already persisted) objects for the given classes
    pub fn seed_ncu(&self, name: &str, classes: &[NcuClass]) {
        let mut inner = self.locked();
        for class in classes {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.objects.insert(id, StoreObject::new(name, *class));
            inner.by_key.insert((name.to_string(), *class), id);
        }
    }

    /// Writes a committed property directly, bypassing the pending overlay
    pub fn seed_prop(&self, name: &str, class: NcuClass, property: &str, value: PropertyValue) {
        let mut inner = self.locked();
        let Some(id) = inner.by_key.get(&(name.to_string(), class)).copied() else {
            return;
        };
        if let Some(object) = inner.objects.get_mut(&id) {
            object.committed.insert(property.to_string(), value);
        }
    }

    /// Injects a validation failure naming `property` for every handle of
    /// the given class
    pub fn inject_validate_failure(&self, class: NcuClass, property: &str) {
        self.locked().fail_validate.insert(class, property.to_string());
    }

    /// Injects a commit failure for every handle of the given class
    pub fn inject_commit_failure(&self, class: NcuClass, reason: &str) {
        self.locked().fail_commit.insert(class, reason.to_string());
    }

    /// Removes all injected failures
    pub fn clear_failures(&self) {
        let mut inner = self.locked();
        inner.fail_validate.clear();
        inner.fail_commit.clear();
    }

    /// Sets the daemon-reported state pair for an object
    pub fn set_object_state(&self, name: &str, class: NcuClass, state: UnitState, aux: AuxState) {
        let mut inner = self.locked();
        let Some(id) = inner.by_key.get(&(name.to_string(), class)).copied() else {
            return;
        };
        if let Some(object) = inner.objects.get_mut(&id) {
            object.state = (state, aux);
        }
    }

    /// Committed view of a property, for assertions
    pub fn committed_prop(&self, name: &str, class: NcuClass, property: &str) -> Option<PropertyValue> {
        let inner = self.locked();
        let id = inner.by_key.get(&(name.to_string(), class))?;
        inner.objects.get(id)?.committed.get(property).cloned()
    }
}

fn stale(handle: HandleId) -> NcuError {
    NcuError::NotFound(format!("handle {}", handle.0))
}

impl ConfigStore for MemoryStore {
    fn open(&self, name: &str, class: NcuClass, mode: OpenMode) -> NcuResult<HandleId> {
        let mut inner = self.locked();
        let key = (name.to_string(), class);
        match mode {
            OpenMode::Create => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.objects.insert(id, StoreObject::new(name, class));
                inner.by_key.insert(key, id);
                debug!(ncu = name, %class, id, "created store object");
                Ok(HandleId(id))
            }
            OpenMode::Open => {
                let id = inner
                    .by_key
                    .get(&key)
                    .copied()
                    .ok_or_else(|| NcuError::NotFound(format!("{}/{}", name, class)))?;
                // A fresh handle sees only committed state.
                if let Some(object) = inner.objects.get_mut(&id) {
                    object.pending.clear();
                }
                Ok(HandleId(id))
            }
        }
    }

    fn get_prop(&self, handle: HandleId, property: &str) -> NcuResult<PropertyValue> {
        let inner = self.locked();
        let object = inner.objects.get(&handle.0).ok_or_else(|| stale(handle))?;
        match object.pending.get(property) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(NcuError::NotFound(property.to_string())),
            None => object
                .committed
                .get(property)
                .cloned()
                .ok_or_else(|| NcuError::NotFound(property.to_string())),
        }
    }

    fn set_prop(&self, handle: HandleId, property: &str, value: PropertyValue) -> NcuResult<()> {
        if is_read_only(property) {
            return Err(NcuError::ReadOnly { property: property.to_string() });
        }
        if let Some(expected) = expected_kind(property) {
            if expected != value.kind() {
                return Err(NcuError::TypeMismatch {
                    property: property.to_string(),
                    expected,
                    actual: value.kind(),
                });
            }
        }
        let mut inner = self.locked();
        let object = inner.objects.get_mut(&handle.0).ok_or_else(|| stale(handle))?;
        object.pending.insert(property.to_string(), Some(value));
        Ok(())
    }

    fn delete_prop(&self, handle: HandleId, property: &str) -> NcuResult<()> {
        if is_read_only(property) {
            return Err(NcuError::ReadOnly { property: property.to_string() });
        }
        let mut inner = self.locked();
        let object = inner.objects.get_mut(&handle.0).ok_or_else(|| stale(handle))?;
        object.pending.insert(property.to_string(), None);
        Ok(())
    }

    fn validate(&self, handle: HandleId) -> NcuResult<()> {
        let inner = self.locked();
        let object = inner.objects.get(&handle.0).ok_or_else(|| stale(handle))?;
        if let Some(property) = inner.fail_validate.get(&object.class) {
            return Err(NcuError::ValidationFailed {
                class: object.class,
                property: property.clone(),
            });
        }
        Ok(())
    }

    fn commit(&self, handle: HandleId) -> NcuResult<()> {
        let mut inner = self.locked();
        let object = inner.objects.get(&handle.0).ok_or_else(|| stale(handle))?;
        if let Some(reason) = inner.fail_commit.get(&object.class) {
            return Err(NcuError::CommitFailed {
                class: object.class,
                reason: reason.clone(),
            });
        }
        let object = inner.objects.get_mut(&handle.0).ok_or_else(|| stale(handle))?;
        for (property, staged) in object.pending.drain() {
            match staged {
                Some(value) => {
                    object.committed.insert(property, value);
                }
                None => {
                    object.committed.remove(&property);
                }
            }
        }
        debug!(ncu = %object.name, class = %object.class, "committed store object");
        Ok(())
    }

    fn destroy(&self, handle: HandleId) -> NcuResult<()> {
        let mut inner = self.locked();
        let object = inner.objects.remove(&handle.0).ok_or_else(|| stale(handle))?;
        inner.by_key.remove(&(object.name.clone(), object.class));
        debug!(ncu = %object.name, class = %object.class, "destroyed store object");
        Ok(())
    }

    fn get_state(&self, handle: HandleId) -> NcuResult<(UnitState, AuxState)> {
        let inner = self.locked();
        let object = inner.objects.get(&handle.0).ok_or_else(|| stale(handle))?;
        Ok(object.state)
    }

    fn enable(&self, handle: HandleId) -> NcuResult<()> {
        let mut inner = self.locked();
        let object = inner.objects.get_mut(&handle.0).ok_or_else(|| stale(handle))?;
        object.committed.insert(props::ENABLED.to_string(), PropertyValue::from(true));
        Ok(())
    }

    fn disable(&self, handle: HandleId) -> NcuResult<()> {
        let mut inner = self.locked();
        let object = inner.objects.get_mut(&handle.0).ok_or_else(|| stale(handle))?;
        object.committed.insert(props::ENABLED.to_string(), PropertyValue::from(false));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_overlay_until_commit() {
        let store = MemoryStore::new();
        store.seed_ncu("net0", &[NcuClass::Ip]);

        let handle = store.open("net0", NcuClass::Ip, OpenMode::Open).unwrap();
        store
            .set_prop(handle, props::IP_VERSION, vec![4u64].into())
            .unwrap();
        // Visible through this handle, not committed yet.
        assert!(store.get_prop(handle, props::IP_VERSION).is_ok());
        assert!(store.committed_prop("net0", NcuClass::Ip, props::IP_VERSION).is_none());

        store.commit(handle).unwrap();
        assert_eq!(
            store.committed_prop("net0", NcuClass::Ip, props::IP_VERSION),
            Some(PropertyValue::from(vec![4u64]))
        );
    }

    #[test]
    fn test_reopen_discards_pending() {
        let store = MemoryStore::new();
        store.seed_ncu("net0", &[NcuClass::Ip]);

        let handle = store.open("net0", NcuClass::Ip, OpenMode::Open).unwrap();
        store
            .set_prop(handle, props::IP_VERSION, vec![6u64].into())
            .unwrap();
        let handle = store.open("net0", NcuClass::Ip, OpenMode::Open).unwrap();
        assert!(store.get_prop(handle, props::IP_VERSION).unwrap_err().is_not_found());
    }

    #[test]
    fn test_schema_type_enforced() {
        let store = MemoryStore::new();
        store.seed_ncu("net0", &[NcuClass::Ip]);
        let handle = store.open("net0", NcuClass::Ip, OpenMode::Open).unwrap();

        let err = store
            .set_prop(handle, props::IP_VERSION, PropertyValue::from("4"))
            .unwrap_err();
        assert!(matches!(err, NcuError::TypeMismatch { .. }));
    }

    #[test]
    fn test_read_only_enforced_at_store_boundary() {
        let store = MemoryStore::new();
        store.seed_ncu("net0", &[NcuClass::Phys]);
        let handle = store.open("net0", NcuClass::Phys, OpenMode::Open).unwrap();

        let err = store.set_prop(handle, props::TYPE, "link".into()).unwrap_err();
        assert!(matches!(err, NcuError::ReadOnly { .. }));
    }

    #[test]
    fn test_delete_tombstone_survives_commit() {
        let store = MemoryStore::new();
        store.seed_ncu("net0", &[NcuClass::Ip]);
        store.seed_prop("net0", NcuClass::Ip, props::IP_VERSION, vec![4u64].into());

        let handle = store.open("net0", NcuClass::Ip, OpenMode::Open).unwrap();
        store.delete_prop(handle, props::IP_VERSION).unwrap();
        assert!(store.get_prop(handle, props::IP_VERSION).unwrap_err().is_not_found());

        store.commit(handle).unwrap();
        assert!(store.committed_prop("net0", NcuClass::Ip, props::IP_VERSION).is_none());
    }
}
