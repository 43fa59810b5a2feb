//! Configuration-store interface
//!
//! The persisted-configuration daemon is an external collaborator; this
//! module declares the contract the rest of the crate programs against,
//! plus the schema-fixed property names shared with the daemon. Store calls
//! are synchronous calls into a local daemon-communication layer and are
//! treated as fast, bounded operations (no explicit timeout).

pub mod memory;

pub use memory::MemoryStore;

use crate::error::NcuResult;
use crate::handles::NcuClass;
use crate::state::{AuxState, UnitState};
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};

/// Schema-fixed property names
pub mod props {
    /// Active IP families, uint64 array of `4` / `6` (IP class)
    pub const IP_VERSION: &str = "ip-version";
    /// IPv4 address sources, uint64 array of [`AddrSrc`](crate::address::AddrSrc) codes (IP class)
    pub const IPV4_ADDRSRC: &str = "ipv4-addrsrc";
    /// IPv4 static addresses, string array of `"addr/prefixlen"` (IP class)
    pub const IPV4_ADDR: &str = "ipv4-addr";
    /// IPv6 address sources, uint64 array of [`AddrSrc`](crate::address::AddrSrc) codes (IP class)
    pub const IPV6_ADDRSRC: &str = "ipv6-addrsrc";
    /// IPv6 static addresses, string array of `"addr/prefixlen"` (IP class)
    pub const IPV6_ADDR: &str = "ipv6-addr";
    /// Link MAC address, string (PHYS class)
    pub const LINK_MAC_ADDR: &str = "link-mac-addr";
    /// User-editable display label, string (PHYS class)
    pub const VANITY_NAME: &str = "vanity-name";
    /// Activation policy, uint64 [`ActivationMode`](crate::ncu::ActivationMode) code (PHYS class)
    pub const ACTIVATION_MODE: &str = "activation-mode";
    /// Priority group for prioritized activation, uint64 (PHYS class)
    pub const PRIORITY_GROUP: &str = "priority-group";
    /// Whether the NCU is enabled, boolean (PHYS class).
    ///
    /// Derived (not directly settable) under some activation modes; see
    /// [`ConfigStore::enable`](super::ConfigStore::enable) /
    /// [`ConfigStore::disable`](super::ConfigStore::disable).
    pub const ENABLED: &str = "enabled";
    /// Object type tag, string (all classes, read-only)
    pub const TYPE: &str = "type";
    /// Configuration class tag, string (all classes, read-only)
    pub const CLASS: &str = "class";
    /// Owning profile name, string (all classes, read-only)
    pub const PARENT: &str = "parent";
}

/// Properties whose writes the store rejects unconditionally
pub const READ_ONLY_PROPS: [&str; 3] = [props::TYPE, props::CLASS, props::PARENT];

/// Whether a property is declared read-only by the schema
pub fn is_read_only(property: &str) -> bool {
    READ_ONLY_PROPS.contains(&property)
}

/// Schema-declared wire type of a known property, by [`PropertyValue::kind`]
/// name. Unknown properties are untyped.
pub fn expected_kind(property: &str) -> Option<&'static str> {
    match property {
        props::IP_VERSION | props::IPV4_ADDRSRC | props::IPV6_ADDRSRC => Some("uint64[]"),
        props::IPV4_ADDR | props::IPV6_ADDR => Some("string[]"),
        props::LINK_MAC_ADDR | props::VANITY_NAME | props::TYPE | props::CLASS
        | props::PARENT => Some("string"),
        props::ACTIVATION_MODE | props::PRIORITY_GROUP => Some("uint64"),
        props::ENABLED => Some("boolean"),
        _ => None,
    }
}

/// Opaque store handle identifier, one per open (NCU, class) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub u64);

/// How to obtain a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Allocate a brand-new configuration object; fails only on store error
    Create,
    /// Read an existing object; `NotFound` means "not yet configured"
    Open,
}

/// Contract of the persisted-configuration daemon.
///
/// Implementations must be usable behind a shared reference; the crate
/// assumes at most one concurrent caller per NCU and leaves serialization
/// to the embedder.
pub trait ConfigStore: Send + Sync {
    /// Opens or creates the configuration object for one (NCU, class)
    fn open(&self, name: &str, class: NcuClass, mode: OpenMode) -> NcuResult<HandleId>;

    /// Reads a property; `NotFound` means the property is unset
    fn get_prop(&self, handle: HandleId, property: &str) -> NcuResult<PropertyValue>;

    /// Writes a property; rejected with `ReadOnly` or `TypeMismatch`
    fn set_prop(&self, handle: HandleId, property: &str, value: PropertyValue) -> NcuResult<()>;

    /// Removes a property; removing an absent property is not an error
    fn delete_prop(&self, handle: HandleId, property: &str) -> NcuResult<()>;

    /// Daemon-side validation; failure names the offending property
    fn validate(&self, handle: HandleId) -> NcuResult<()>;

    /// Persists pending writes on this handle
    fn commit(&self, handle: HandleId) -> NcuResult<()>;

    /// Removes the configuration object; the handle is dead afterwards
    fn destroy(&self, handle: HandleId) -> NcuResult<()>;

    /// Current daemon-reported (state, aux-state) for the object
    fn get_state(&self, handle: HandleId) -> NcuResult<(UnitState, AuxState)>;

    /// Explicitly enables the NCU (activation modes where `enabled` is derived)
    fn enable(&self, handle: HandleId) -> NcuResult<()>;

    /// Explicitly disables the NCU
    fn disable(&self, handle: HandleId) -> NcuResult<()>;
}
