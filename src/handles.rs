//! Per-class configuration handles and dirty tracking
//!
//! An NCU owns up to one store handle per configuration class. The PHYS
//! handle always exists for an open NCU; IP and IPTUN handles may be absent
//! when the store has nothing for them yet.

use crate::error::{NcuError, NcuResult};
use crate::store::{is_read_only, ConfigStore, HandleId, OpenMode};
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration class of an NCU handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NcuClass {
    /// Physical/link layer configuration
    Phys,
    /// IP tunnel configuration
    IpTun,
    /// IP layer configuration
    Ip,
}

impl NcuClass {
    /// All classes, in open/commit order
    pub const ALL: [NcuClass; 3] = [NcuClass::Phys, NcuClass::IpTun, NcuClass::Ip];

    pub fn as_str(&self) -> &'static str {
        match self {
            NcuClass::Phys => "phys",
            NcuClass::IpTun => "iptun",
            NcuClass::Ip => "ip",
        }
    }

    fn index(&self) -> usize {
        match self {
            NcuClass::Phys => 0,
            NcuClass::IpTun => 1,
            NcuClass::Ip => 2,
        }
    }
}

impl fmt::Display for NcuClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-NCU table of store handles, one slot per class
pub struct HandleRegistry {
    store: Arc<dyn ConfigStore>,
    name: String,
    handles: [Option<HandleId>; 3],
    modified: [bool; 3],
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("name", &self.name)
            .field("handles", &self.handles)
            .field("modified", &self.modified)
            .finish()
    }
}

impl HandleRegistry {
    pub fn new(store: Arc<dyn ConfigStore>, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
            handles: [None; 3],
            modified: [false; 3],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Opens or creates the handles for every class.
    ///
    /// `Create` allocates a brand-new handle per class and marks it dirty
    /// (it only exists in memory until committed). `Open` reads existing
    /// handles, treating `NotFound` as "not yet configured" and leaving the
    /// slot empty. Any other per-class error is returned in the failure
    /// list; the remaining classes still populate.
    pub fn open(&mut self, mode: OpenMode) -> Vec<(NcuClass, NcuError)> {
        let mut failures = Vec::new();

        for class in NcuClass::ALL {
            match self.store.open(&self.name, class, mode) {
                Ok(handle) => {
                    self.handles[class.index()] = Some(handle);
                    self.modified[class.index()] = mode == OpenMode::Create;
                    debug!(ncu = %self.name, %class, ?mode, "opened configuration handle");
                }
                Err(e) if e.is_not_found() && mode == OpenMode::Open => {
                    debug!(ncu = %self.name, %class, "class not yet configured");
                    self.handles[class.index()] = None;
                    self.modified[class.index()] = false;
                }
                Err(e) => {
                    warn!(ncu = %self.name, %class, error = %e, "failed to open handle");
                    failures.push((class, e));
                }
            }
        }

        failures
    }

    /// Handle for a class, if the class is configured
    pub fn handle(&self, class: NcuClass) -> Option<HandleId> {
        self.handles[class.index()]
    }

    /// Dirty bit for a class
    pub fn is_modified(&self, class: NcuClass) -> bool {
        self.modified[class.index()]
    }

    /// True if any class has pending writes
    pub fn any_modified(&self) -> bool {
        self.modified.iter().any(|m| *m)
    }

    /// Marks a class dirty without touching the store (used when in-memory
    /// state owned by the caller, like the address model, changes)
    pub fn mark_modified(&mut self, class: NcuClass) {
        self.modified[class.index()] = true;
    }

    pub(crate) fn clear_modified(&mut self, class: NcuClass) {
        self.modified[class.index()] = false;
    }

    fn require_handle(&self, class: NcuClass) -> NcuResult<HandleId> {
        self.handle(class)
            .ok_or_else(|| NcuError::NotFound(format!("{}/{}", self.name, class)))
    }

    /// Reads a property from a class handle
    pub fn get_prop(&self, class: NcuClass, property: &str) -> NcuResult<PropertyValue> {
        let handle = self.require_handle(class)?;
        self.store.get_prop(handle, property)
    }

    /// Writes a property on a class handle.
    ///
    /// Any successful write marks the class dirty, even when the new value
    /// equals the old one; commit gating depends on this. Read-only
    /// properties are rejected before reaching the store.
    pub fn set_prop(&mut self, class: NcuClass, property: &str, value: PropertyValue) -> NcuResult<()> {
        if is_read_only(property) {
            warn!(ncu = %self.name, %class, property, "dropping write to read-only property");
            return Err(NcuError::ReadOnly { property: property.to_string() });
        }
        let handle = self.require_handle(class)?;
        self.store.set_prop(handle, property, value)?;
        self.modified[class.index()] = true;
        Ok(())
    }

    /// Deletes a property on a class handle and marks the class dirty
    pub fn delete_prop(&mut self, class: NcuClass, property: &str) -> NcuResult<()> {
        let handle = self.require_handle(class)?;
        self.store.delete_prop(handle, property)?;
        self.modified[class.index()] = true;
        Ok(())
    }

    /// Asks the store to validate a class handle
    pub fn validate(&self, class: NcuClass) -> NcuResult<()> {
        let handle = self.require_handle(class)?;
        self.store.validate(handle)
    }

    /// Commits a class handle; clears the dirty bit only on success.
    ///
    /// On failure the dirty bit is left unchanged so the caller can retry
    /// or abandon the whole commit.
    pub fn commit(&mut self, class: NcuClass) -> NcuResult<()> {
        if !self.is_modified(class) {
            debug!(ncu = %self.name, %class, "commit skipped, class not modified");
            return Ok(());
        }
        let handle = self.require_handle(class)?;
        self.store.commit(handle)?;
        self.modified[class.index()] = false;
        debug!(ncu = %self.name, %class, "committed configuration");
        Ok(())
    }

    /// Destroys every configured class in order.
    ///
    /// A failure aborts the remaining destroys and names the failed class;
    /// partial destruction is observable and reported, never retried here.
    pub fn destroy(&mut self) -> NcuResult<()> {
        for class in NcuClass::ALL {
            let Some(handle) = self.handles[class.index()] else {
                continue;
            };
            self.store.destroy(handle).map_err(|e| NcuError::DestroyFailed {
                class,
                reason: e.to_string(),
            })?;
            self.handles[class.index()] = None;
            self.modified[class.index()] = false;
            debug!(ncu = %self.name, %class, "destroyed configuration");
        }
        Ok(())
    }
}
