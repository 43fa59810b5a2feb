//! Connection-state machine
//!
//! The daemon reports two independent (state, aux-state) pairs per NCU: one
//! for the media/link layer and one for the IP layer. Either pair updating
//! triggers a full recompute of the single user-facing [`ConnectionState`];
//! the recompute is cheap and a notification decision is made only when the
//! derived value actually changes.

use crate::ncu::NcuType;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Primary daemon-reported state of a link or interface object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Uninitialized = 0,
    Initialized = 1,
    Offline = 2,
    OfflineToOnline = 3,
    OnlineToOffline = 4,
    Online = 5,
    Maintenance = 6,
    Degraded = 7,
    Disabled = 8,
}

impl UnitState {
    /// Decodes a raw daemon state code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(UnitState::Uninitialized),
            1 => Some(UnitState::Initialized),
            2 => Some(UnitState::Offline),
            3 => Some(UnitState::OfflineToOnline),
            4 => Some(UnitState::OnlineToOffline),
            5 => Some(UnitState::Online),
            6 => Some(UnitState::Maintenance),
            7 => Some(UnitState::Degraded),
            8 => Some(UnitState::Disabled),
            _ => None,
        }
    }
}

/// Secondary status code qualifying a primary state.
///
/// One namespace is shared between the link and interface layers; the
/// `Link*` values only ever accompany link states on wireless NCUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuxState {
    Uninitialized = 0,
    ConditionsNotMet = 1,
    ManualDisabled = 2,
    MethodFailed = 3,
    Down = 4,
    Up = 5,
    WaitingForAddr = 6,
    DhcpTimedOut = 7,
    DuplicateAddr = 8,
    LinkScanning = 9,
    LinkNeedSelection = 10,
    LinkNeedKey = 11,
    LinkConnecting = 12,
}

impl AuxState {
    /// Decodes a raw daemon aux-state code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(AuxState::Uninitialized),
            1 => Some(AuxState::ConditionsNotMet),
            2 => Some(AuxState::ManualDisabled),
            3 => Some(AuxState::MethodFailed),
            4 => Some(AuxState::Down),
            5 => Some(AuxState::Up),
            6 => Some(AuxState::WaitingForAddr),
            7 => Some(AuxState::DhcpTimedOut),
            8 => Some(AuxState::DuplicateAddr),
            9 => Some(AuxState::LinkScanning),
            10 => Some(AuxState::LinkNeedSelection),
            11 => Some(AuxState::LinkNeedKey),
            12 => Some(AuxState::LinkConnecting),
            _ => None,
        }
    }
}

/// High-level user-facing connection status, derived from both state pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Unknown,
    Disabled,
    NotConnected,
    Scanning,
    NeedsSelection,
    NeedsKey,
    WaitingForAddress,
    DhcpTimedOut,
    DuplicateAddress,
    Connecting,
    Connected,
    /// Connecting to a named wireless network
    ConnectingNamed,
    /// Connected to a named wireless network
    ConnectedNamed,
    NetworkUnavailable,
    CableUnplugged,
}

impl ConnectionState {
    /// Whether this is one of the Connected-family states
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::ConnectedNamed)
    }

    /// Short human-readable status label.
    ///
    /// The `*Named` variants are placeholders the caller fills with the
    /// network name (see `Ncu::status_string`).
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Unknown => "Status unknown",
            ConnectionState::Disabled => "Disabled",
            ConnectionState::NotConnected => "Not connected",
            ConnectionState::Scanning => "Scanning for networks",
            ConnectionState::NeedsSelection => "Waiting for network selection",
            ConnectionState::NeedsKey => "Waiting for network key",
            ConnectionState::WaitingForAddress => "Waiting for an IP address",
            ConnectionState::DhcpTimedOut => "DHCP request timed out",
            ConnectionState::DuplicateAddress => "Duplicate address detected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::ConnectingNamed => "Connecting to {}",
            ConnectionState::ConnectedNamed => "Connected to {}",
            ConnectionState::NetworkUnavailable => "Network unavailable",
            ConnectionState::CableUnplugged => "Cable unplugged",
        }
    }
}

/// Outcome of applying one daemon state update
#[derive(Debug, Clone, Copy)]
pub struct StateChange {
    /// Derived state before the update
    pub old: ConnectionState,
    /// Derived state after the update
    pub new: ConnectionState,
    /// True iff the derived value differs; observers fire exactly when true
    pub changed: bool,
    /// True iff acquired addresses must be discarded (interface left Online)
    pub clear_acquired: bool,
}

/// Folds the cached link and interface state pairs plus the NCU type into
/// one [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    ncu_type: NcuType,
    link_state: UnitState,
    link_aux: AuxState,
    iface_state: UnitState,
    iface_aux: AuxState,
    derived: ConnectionState,
    /// Latched on entry to `Offline`/`Disabled`: whether the derived state
    /// was Connected-family at that moment. Read instead of the live
    /// derived value so a repeated identical report re-derives the same
    /// result.
    was_connected: bool,
}

impl ConnectionStateMachine {
    /// Creates a state machine with nothing yet reported by the daemon
    pub fn new(ncu_type: NcuType) -> Self {
        Self {
            ncu_type,
            link_state: UnitState::Uninitialized,
            link_aux: AuxState::Uninitialized,
            iface_state: UnitState::Uninitialized,
            iface_aux: AuxState::Uninitialized,
            derived: ConnectionState::NotConnected,
            was_connected: false,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.derived
    }

    pub fn link_state(&self) -> (UnitState, AuxState) {
        (self.link_state, self.link_aux)
    }

    pub fn interface_state(&self) -> (UnitState, AuxState) {
        (self.iface_state, self.iface_aux)
    }

    /// Applies a link-layer state update. Idempotent: repeating the same
    /// pair recomputes but reports `changed = false`.
    pub fn apply_link_state(&mut self, state: UnitState, aux: AuxState) -> StateChange {
        self.link_state = state;
        self.link_aux = aux;
        self.recompute(false)
    }

    /// Applies an IP-layer state update. Leaving `Online` additionally
    /// requests an acquired-address clear.
    pub fn apply_interface_state(&mut self, state: UnitState, aux: AuxState) -> StateChange {
        let previous = self.iface_state;
        self.iface_state = state;
        self.iface_aux = aux;

        let clear = state == UnitState::OnlineToOffline
            || (state == UnitState::Offline && previous != UnitState::Offline)
            || (state == UnitState::Disabled && previous == UnitState::Online);

        let down = matches!(state, UnitState::Offline | UnitState::Disabled);
        let was_down = matches!(previous, UnitState::Offline | UnitState::Disabled);
        if down && !was_down {
            self.was_connected = self.derived.is_connected();
        }

        self.recompute(clear)
    }

    fn recompute(&mut self, clear_acquired: bool) -> StateChange {
        let old = self.derived;
        let new = self.derive();
        self.derived = new;
        if old != new {
            debug!(?old, ?new, "derived connection state changed");
        }
        StateChange { old, new, changed: old != new, clear_acquired }
    }

    /// Wireless link aux-states that override the IP layer while the NCU
    /// is offline or coming up.
    fn wireless_link_state(&self) -> Option<ConnectionState> {
        if self.ncu_type != NcuType::Wireless {
            return None;
        }
        match self.link_aux {
            AuxState::LinkScanning => Some(ConnectionState::Scanning),
            AuxState::LinkNeedSelection => Some(ConnectionState::NeedsSelection),
            AuxState::LinkNeedKey => Some(ConnectionState::NeedsKey),
            AuxState::LinkConnecting => Some(ConnectionState::ConnectingNamed),
            _ => None,
        }
    }

    /// The transition table. Interface state is primary; link state is only
    /// consulted in the offline and coming-up interface states.
    fn derive(&self) -> ConnectionState {
        match self.iface_state {
            UnitState::Uninitialized => ConnectionState::Unknown,

            UnitState::Maintenance if self.iface_aux == AuxState::DuplicateAddr => {
                ConnectionState::DuplicateAddress
            }
            UnitState::Maintenance | UnitState::Degraded | UnitState::Initialized => {
                ConnectionState::NetworkUnavailable
            }

            // Transitional: acquired addresses are cleared, the derived
            // state keeps its previous value until Offline is reported.
            UnitState::OnlineToOffline => self.derived,

            UnitState::Disabled if self.iface_aux == AuxState::ManualDisabled => {
                ConnectionState::Disabled
            }
            UnitState::Disabled | UnitState::Offline => {
                if let Some(wireless) = self.wireless_link_state() {
                    return wireless;
                }
                if self.ncu_type == NcuType::Wired
                    && matches!(self.iface_aux, AuxState::Down | AuxState::ConditionsNotMet)
                    && self.was_connected
                {
                    return ConnectionState::CableUnplugged;
                }
                ConnectionState::NetworkUnavailable
            }

            UnitState::OfflineToOnline => {
                if let Some(wireless) = self.wireless_link_state() {
                    return wireless;
                }
                match self.iface_aux {
                    AuxState::WaitingForAddr => ConnectionState::WaitingForAddress,
                    AuxState::DhcpTimedOut => ConnectionState::DhcpTimedOut,
                    _ => ConnectionState::Connecting,
                }
            }

            UnitState::Online => {
                if self.iface_aux == AuxState::Up {
                    if self.ncu_type == NcuType::Wireless {
                        ConnectionState::ConnectedNamed
                    } else {
                        ConnectionState::Connected
                    }
                } else {
                    ConnectionState::Connecting
                }
            }
        }
    }

    /// Whether the NCU counts as active for UI purposes.
    ///
    /// Distinct from the derived [`ConnectionState`]: a wireless interface
    /// awaiting a key shows as active when it is manually activated or its
    /// priority group is the currently-active one, even though the IP layer
    /// is not up yet.
    pub fn is_active(
        &self,
        mode: crate::ncu::ActivationMode,
        priority_group: u64,
        active_priority_group: Option<u64>,
    ) -> bool {
        if self.iface_state == UnitState::Online {
            return true;
        }
        if self.iface_state == UnitState::OfflineToOnline
            && self.iface_aux == AuxState::WaitingForAddr
        {
            return true;
        }
        let selectable = mode == crate::ncu::ActivationMode::Manual
            || active_priority_group == Some(priority_group);
        selectable && self.link_aux == AuxState::LinkNeedKey
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [UnitState; 9] = [
        UnitState::Uninitialized,
        UnitState::Initialized,
        UnitState::Offline,
        UnitState::OfflineToOnline,
        UnitState::OnlineToOffline,
        UnitState::Online,
        UnitState::Maintenance,
        UnitState::Degraded,
        UnitState::Disabled,
    ];

    const ALL_AUX: [AuxState; 13] = [
        AuxState::Uninitialized,
        AuxState::ConditionsNotMet,
        AuxState::ManualDisabled,
        AuxState::MethodFailed,
        AuxState::Down,
        AuxState::Up,
        AuxState::WaitingForAddr,
        AuxState::DhcpTimedOut,
        AuxState::DuplicateAddr,
        AuxState::LinkScanning,
        AuxState::LinkNeedSelection,
        AuxState::LinkNeedKey,
        AuxState::LinkConnecting,
    ];

    #[test]
    fn test_totality() {
        // Every reachable 5-tuple must yield exactly one derived state.
        for ncu_type in [NcuType::Wired, NcuType::Wireless, NcuType::Tunnel] {
            for iface_state in ALL_STATES {
                for iface_aux in ALL_AUX {
                    for link_state in ALL_STATES {
                        for link_aux in ALL_AUX {
                            let mut sm = ConnectionStateMachine::new(ncu_type);
                            sm.apply_link_state(link_state, link_aux);
                            sm.apply_interface_state(iface_state, iface_aux);
                            let _ = sm.connection_state();
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_no_spurious_notification() {
        let mut sm = ConnectionStateMachine::new(NcuType::Wired);
        let first = sm.apply_interface_state(UnitState::Online, AuxState::Up);
        assert!(first.changed);
        assert_eq!(first.new, ConnectionState::Connected);

        let second = sm.apply_interface_state(UnitState::Online, AuxState::Up);
        assert!(!second.changed);
        assert_eq!(second.new, ConnectionState::Connected);
    }

    #[test]
    fn test_wired_cable_unplugged_only_after_connected() {
        let mut sm = ConnectionStateMachine::new(NcuType::Wired);
        let change = sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(change.new, ConnectionState::NetworkUnavailable);

        sm.apply_interface_state(UnitState::Online, AuxState::Up);
        let change = sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(change.new, ConnectionState::CableUnplugged);
    }

    #[test]
    fn test_repeated_unplug_report_is_idempotent() {
        let mut sm = ConnectionStateMachine::new(NcuType::Wired);
        sm.apply_interface_state(UnitState::Online, AuxState::Up);
        sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(sm.connection_state(), ConnectionState::CableUnplugged);

        // The daemon re-reporting the same pair must not flip the derived
        // state or announce a change.
        let repeat = sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(repeat.new, ConnectionState::CableUnplugged);
        assert!(!repeat.changed);

        // Coming back up forgets the unplug; a fresh Offline/Down without a
        // prior connection is just unavailable.
        sm.apply_interface_state(UnitState::Online, AuxState::Up);
        sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(sm.connection_state(), ConnectionState::CableUnplugged);
        sm.apply_interface_state(UnitState::OfflineToOnline, AuxState::WaitingForAddr);
        sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(sm.connection_state(), ConnectionState::NetworkUnavailable);
    }

    #[test]
    fn test_wireless_link_aux_priority_while_coming_up() {
        let mut sm = ConnectionStateMachine::new(NcuType::Wireless);
        sm.apply_link_state(UnitState::Offline, AuxState::LinkNeedKey);
        let change = sm.apply_interface_state(UnitState::OfflineToOnline, AuxState::WaitingForAddr);
        // The link layer's "needs key" wins over the IP layer's aux state.
        assert_eq!(change.new, ConnectionState::NeedsKey);

        sm.apply_link_state(UnitState::Online, AuxState::Up);
        let change = sm.apply_interface_state(UnitState::OfflineToOnline, AuxState::WaitingForAddr);
        assert_eq!(change.new, ConnectionState::WaitingForAddress);
    }

    #[test]
    fn test_wireless_offline_states() {
        let mut sm = ConnectionStateMachine::new(NcuType::Wireless);
        sm.apply_link_state(UnitState::Offline, AuxState::LinkScanning);
        let change = sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(change.new, ConnectionState::Scanning);

        sm.apply_link_state(UnitState::Offline, AuxState::Down);
        let change = sm.apply_interface_state(UnitState::Offline, AuxState::Down);
        assert_eq!(change.new, ConnectionState::NetworkUnavailable);
    }

    #[test]
    fn test_online_to_offline_keeps_state_and_clears_acquired() {
        let mut sm = ConnectionStateMachine::new(NcuType::Wired);
        sm.apply_interface_state(UnitState::Online, AuxState::Up);
        let change = sm.apply_interface_state(UnitState::OnlineToOffline, AuxState::Down);
        assert!(change.clear_acquired);
        assert!(!change.changed);
        assert_eq!(change.new, ConnectionState::Connected);
    }

    #[test]
    fn test_duplicate_address_in_maintenance() {
        let mut sm = ConnectionStateMachine::new(NcuType::Wired);
        let change = sm.apply_interface_state(UnitState::Maintenance, AuxState::DuplicateAddr);
        assert_eq!(change.new, ConnectionState::DuplicateAddress);
        let change = sm.apply_interface_state(UnitState::Maintenance, AuxState::MethodFailed);
        assert_eq!(change.new, ConnectionState::NetworkUnavailable);
    }

    #[test]
    fn test_active_while_awaiting_key() {
        use crate::ncu::ActivationMode;

        let mut sm = ConnectionStateMachine::new(NcuType::Wireless);
        sm.apply_link_state(UnitState::Offline, AuxState::LinkNeedKey);
        sm.apply_interface_state(UnitState::Offline, AuxState::Down);

        assert!(sm.is_active(ActivationMode::Manual, 0, None));
        assert!(sm.is_active(ActivationMode::Prioritized, 2, Some(2)));
        assert!(!sm.is_active(ActivationMode::Prioritized, 2, Some(1)));
    }

    #[test]
    fn test_state_codes_round_trip() {
        assert_eq!(UnitState::from_code(5), Some(UnitState::Online));
        assert_eq!(UnitState::from_code(99), None);
        assert_eq!(AuxState::from_code(11), Some(AuxState::LinkNeedKey));
        assert_eq!(AuxState::from_code(99), None);
    }
}
