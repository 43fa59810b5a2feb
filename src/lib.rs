//! ncuctl - NCU Configuration Library
//!
//! Client-side model of a network configuration unit (NCU), the per-link
//! unit of a network profile. Provides:
//! - Typed property values and the configuration-store access trait
//! - Per-class configuration handles with dirty tracking
//! - A dual-stack address model (static lists, DHCP, autoconf)
//! - A connection-state machine fed by daemon state reports
//! - A fail-fast validate/commit pipeline
//! - The [`Ncu`] facade with broadcast change notifications
//! - An async monitor that applies daemon events to a shared NCU
//!
//! Includes an in-memory store implementation for tests and embedders
//! that run without a daemon.

pub mod address;
pub mod commit;
pub mod error;
pub mod events;
pub mod handles;
pub mod ncu;
pub mod state;
pub mod store;
pub mod value;

// Re-export commonly used types
pub use error::{NcuError, NcuResult};
pub use value::PropertyValue;
pub use store::{props, ConfigStore, HandleId, MemoryStore, OpenMode};
pub use handles::{HandleRegistry, NcuClass};
pub use address::{AddrSrc, AddressModel, AddressRecord, IpFamily, DHCP_RUNNING};
pub use state::{
    AuxState, ConnectionState, ConnectionStateMachine, StateChange, UnitState,
};
pub use commit::{CommitPipeline, CommitReport};
pub use ncu::{ActivationMode, Ncu, NcuEvent, NcuType, WifiInfo};
pub use events::{
    DaemonMessage, NcuMonitor, RawStateEvent, StateEvent, EVENT_KIND_IF_STATE,
    EVENT_KIND_LINK_STATE,
};
