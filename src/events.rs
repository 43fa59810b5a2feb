//! Daemon event stream ingestion
//!
//! The daemon pushes raw state records asynchronously. This module decodes
//! them into typed events and provides [`NcuMonitor`], a task that drains a
//! daemon event channel and applies events to a shared [`Ncu`] through one
//! serialization point, so event application never races UI-driven
//! mutation. An undecodable record is logged and dropped; cached state is
//! never touched by it.

use crate::error::{NcuError, NcuResult};
use crate::ncu::Ncu;
use crate::state::{AuxState, UnitState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Raw record kind: media/link layer state
pub const EVENT_KIND_LINK_STATE: u32 = 1;
/// Raw record kind: IP layer state
pub const EVENT_KIND_IF_STATE: u32 = 2;

/// A state record exactly as the daemon encodes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStateEvent {
    /// Name of the object the record concerns
    pub object: String,
    /// [`EVENT_KIND_LINK_STATE`] or [`EVENT_KIND_IF_STATE`]
    pub kind: u32,
    pub state: u32,
    pub aux: u32,
}

/// Everything the daemon pushes about one NCU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonMessage {
    State(RawStateEvent),
    /// Runtime address bound to the interface
    Address {
        object: String,
        address: String,
        subnet: String,
        flags: u32,
    },
}

/// Decoded state event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Link { state: UnitState, aux: AuxState },
    Interface { state: UnitState, aux: AuxState },
}

impl StateEvent {
    /// Decodes a raw record; unknown kind or state codes are errors
    pub fn decode(raw: &RawStateEvent) -> NcuResult<Self> {
        let state = UnitState::from_code(raw.state)
            .ok_or_else(|| NcuError::EventDecode(format!("unknown state code {}", raw.state)))?;
        let aux = AuxState::from_code(raw.aux)
            .ok_or_else(|| NcuError::EventDecode(format!("unknown aux-state code {}", raw.aux)))?;
        match raw.kind {
            EVENT_KIND_LINK_STATE => Ok(StateEvent::Link { state, aux }),
            EVENT_KIND_IF_STATE => Ok(StateEvent::Interface { state, aux }),
            other => Err(NcuError::EventDecode(format!("unknown event kind {}", other))),
        }
    }
}

/// Applies daemon events to a shared [`Ncu`].
///
/// The same mutex guards UI-driven mutation, which gives the
/// single-serialization-point discipline the core assumes.
pub struct NcuMonitor {
    ncu: Arc<Mutex<Ncu>>,
}

impl NcuMonitor {
    pub fn new(ncu: Arc<Mutex<Ncu>>) -> Self {
        Self { ncu }
    }

    /// Spawns the drain task; it ends when the sender side closes
    pub fn spawn(self, events: mpsc::UnboundedReceiver<DaemonMessage>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(events).await })
    }

    async fn run(self, mut events: mpsc::UnboundedReceiver<DaemonMessage>) {
        info!("NCU monitor started");
        while let Some(message) = events.recv().await {
            self.apply(message).await;
        }
        info!("daemon event channel closed, stopping NCU monitor");
    }

    /// Applies one message; also usable directly by embedders that bring
    /// their own delivery loop
    pub async fn apply(&self, message: DaemonMessage) {
        match message {
            DaemonMessage::State(raw) => {
                let event = match StateEvent::decode(&raw) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(object = %raw.object, error = %e, "ignoring undecodable event");
                        return;
                    }
                };
                let mut ncu = self.ncu.lock().await;
                if ncu.device_name() != raw.object {
                    debug!(object = %raw.object, "event for a different object, ignoring");
                    return;
                }
                match event {
                    StateEvent::Link { state, aux } => ncu.apply_link_state(state, aux),
                    StateEvent::Interface { state, aux } => ncu.apply_interface_state(state, aux),
                }
            }
            DaemonMessage::Address { object, address, subnet, flags } => {
                let mut ncu = self.ncu.lock().await;
                if ncu.device_name() != object {
                    return;
                }
                ncu.apply_acquired_address(&address, &subnet, flags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::NcuClass;
    use crate::ncu::NcuType;
    use crate::state::ConnectionState;
    use crate::store::MemoryStore;

    fn shared_ncu(name: &str) -> Arc<Mutex<Ncu>> {
        let store = Arc::new(MemoryStore::new());
        store.seed_ncu(name, &[NcuClass::Phys, NcuClass::Ip]);
        Arc::new(Mutex::new(Ncu::open(store, name, NcuType::Wired).unwrap()))
    }

    #[test]
    fn test_decode_rejects_unknown_codes() {
        let raw = RawStateEvent { object: "net0".into(), kind: 9, state: 5, aux: 5 };
        assert!(matches!(StateEvent::decode(&raw), Err(NcuError::EventDecode(_))));

        let raw = RawStateEvent { object: "net0".into(), kind: EVENT_KIND_IF_STATE, state: 42, aux: 5 };
        assert!(matches!(StateEvent::decode(&raw), Err(NcuError::EventDecode(_))));
    }

    #[tokio::test]
    async fn test_monitor_applies_state_events() {
        let ncu = shared_ncu("net0");
        let monitor = NcuMonitor::new(ncu.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = monitor.spawn(rx);

        tx.send(DaemonMessage::State(RawStateEvent {
            object: "net0".into(),
            kind: EVENT_KIND_IF_STATE,
            state: UnitState::Online as u32,
            aux: AuxState::Up as u32,
        }))
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(ncu.lock().await.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_monitor_ignores_other_objects_and_bad_events() {
        let ncu = shared_ncu("net0");
        let monitor = NcuMonitor::new(ncu.clone());

        monitor
            .apply(DaemonMessage::State(RawStateEvent {
                object: "net1".into(),
                kind: EVENT_KIND_IF_STATE,
                state: UnitState::Online as u32,
                aux: AuxState::Up as u32,
            }))
            .await;
        monitor
            .apply(DaemonMessage::State(RawStateEvent {
                object: "net0".into(),
                kind: 77,
                state: 0,
                aux: 0,
            }))
            .await;

        // State unchanged by either message.
        assert_ne!(ncu.lock().await.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_monitor_applies_acquired_address() {
        let ncu = shared_ncu("net0");
        {
            let mut guard = ncu.lock().await;
            guard.set_dhcp(crate::address::IpFamily::V4, true);
        }
        let monitor = NcuMonitor::new(ncu.clone());
        monitor
            .apply(DaemonMessage::Address {
                object: "net0".into(),
                address: "10.0.0.5".into(),
                subnet: "255.255.255.0".into(),
                flags: crate::address::DHCP_RUNNING,
            })
            .await;

        assert!(ncu.lock().await.addresses().acquired_all());
    }
}
