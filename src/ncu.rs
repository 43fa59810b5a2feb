//! NCU facade
//!
//! [`Ncu`] is the object a caller manipulates: it composes the handle
//! registry, the address model and the connection-state machine, caches
//! identity and activation policy, and broadcasts change events to
//! observers. All mutation is expected to happen on one control-flow
//! thread/task; serialization against the daemon event stream is the
//! embedder's job (see [`crate::events::NcuMonitor`]).

use crate::address::{AddressModel, IpFamily};
use crate::commit::CommitPipeline;
use crate::error::{NcuError, NcuResult};
use crate::handles::{HandleRegistry, NcuClass};
use crate::state::{AuxState, ConnectionState, ConnectionStateMachine, StateChange, UnitState};
use crate::store::{props, ConfigStore, OpenMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// NCU type, inferred once from the device media type and immutable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NcuType {
    Wired,
    Wireless,
    Tunnel,
}

impl NcuType {
    /// Maps a daemon-reported media type name to an NCU type
    pub fn from_media(media: &str) -> Self {
        match media {
            "wifi" | "wireless" => NcuType::Wireless,
            "iptun" | "tunnel" => NcuType::Tunnel,
            _ => NcuType::Wired,
        }
    }
}

/// Policy governing how the NCU is activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationMode {
    Manual = 0,
    System = 1,
    Prioritized = 2,
    ConditionalAny = 3,
    ConditionalAll = 4,
}

impl ActivationMode {
    pub fn code(&self) -> u64 {
        *self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(ActivationMode::Manual),
            1 => Some(ActivationMode::System),
            2 => Some(ActivationMode::Prioritized),
            3 => Some(ActivationMode::ConditionalAny),
            4 => Some(ActivationMode::ConditionalAll),
            _ => None,
        }
    }
}

/// Wireless network attachment; wireless NCUs only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiInfo {
    pub essid: String,
    pub bssid: Option<String>,
    connected: bool,
}

impl WifiInfo {
    pub fn new(essid: &str, bssid: Option<&str>) -> Self {
        Self {
            essid: essid.to_string(),
            bssid: bssid.map(str::to_string),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Change notifications delivered to observers
#[derive(Debug, Clone)]
pub enum NcuEvent {
    ConnectionStateChanged {
        old: ConnectionState,
        new: ConnectionState,
    },
    AddressModelChanged {
        family: IpFamily,
    },
    CommitResult {
        class: NcuClass,
        ok: bool,
        error: Option<String>,
    },
}

/// One managed network interface
pub struct Ncu {
    device_name: String,
    vanity_name: String,
    ncu_type: NcuType,
    registry: HandleRegistry,
    addresses: AddressModel,
    state: ConnectionStateMachine,
    wifi: Option<WifiInfo>,
    /// Locally desired enabled value; the store's committed value is
    /// reconciled against this after an IP commit
    enabled: bool,
    activation_mode: ActivationMode,
    priority_group: u64,
    event_tx: broadcast::Sender<NcuEvent>,
}

impl std::fmt::Debug for Ncu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ncu")
            .field("device_name", &self.device_name)
            .field("vanity_name", &self.vanity_name)
            .field("ncu_type", &self.ncu_type)
            .field("connection_state", &self.state.connection_state())
            .finish()
    }
}

/// Device names come from the daemon but become store keys; reject
/// malformed ones before they do.
fn validate_device_name(name: &str) -> NcuResult<()> {
    let ok = !name.is_empty()
        && name.len() <= 31
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ':'));
    if ok {
        Ok(())
    } else {
        Err(NcuError::InvalidParameter(format!("invalid device name: '{}'", name)))
    }
}

impl Ncu {
    fn empty(store: Arc<dyn ConfigStore>, device_name: &str, ncu_type: NcuType) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            device_name: device_name.to_string(),
            vanity_name: device_name.to_string(),
            ncu_type,
            registry: HandleRegistry::new(store, device_name),
            addresses: AddressModel::new(),
            state: ConnectionStateMachine::new(ncu_type),
            wifi: None,
            enabled: true,
            activation_mode: ActivationMode::Manual,
            priority_group: 0,
            event_tx,
        }
    }

    /// Creates a brand-new NCU in the store. All classes come back dirty
    /// and exist only in memory until committed.
    pub fn create(store: Arc<dyn ConfigStore>, device_name: &str, ncu_type: NcuType) -> NcuResult<Self> {
        validate_device_name(device_name)?;
        let mut ncu = Self::empty(store, device_name, ncu_type);
        let failures = ncu.registry.open(OpenMode::Create);
        if let Some((class, error)) = failures.into_iter().next() {
            return Err(NcuError::Store(format!("create of {} failed: {}", class, error)));
        }

        ncu.registry.set_prop(NcuClass::Phys, props::VANITY_NAME, device_name.into())?;
        ncu.registry.set_prop(
            NcuClass::Phys,
            props::ACTIVATION_MODE,
            ActivationMode::Manual.code().into(),
        )?;
        ncu.registry.set_prop(NcuClass::Phys, props::ENABLED, true.into())?;

        info!(ncu = device_name, ?ncu_type, "created NCU");
        Ok(ncu)
    }

    /// Opens an existing NCU from the store. A missing IP or IPTUN class
    /// means "not yet configured"; a missing PHYS class is an error.
    pub fn open(store: Arc<dyn ConfigStore>, device_name: &str, ncu_type: NcuType) -> NcuResult<Self> {
        validate_device_name(device_name)?;
        let mut ncu = Self::empty(store, device_name, ncu_type);
        ncu.read_back()?;
        info!(ncu = device_name, ?ncu_type, "opened NCU");
        Ok(ncu)
    }

    /// Re-reads handles, cached properties, address model and daemon state.
    /// PHYS must exist.
    fn read_back(&mut self) -> NcuResult<()> {
        for (class, error) in self.registry.open(OpenMode::Open) {
            warn!(ncu = %self.device_name, %class, %error, "class unavailable");
        }
        if self.registry.handle(NcuClass::Phys).is_none() {
            return Err(NcuError::NotFound(format!("{}/phys", self.device_name)));
        }

        self.vanity_name = self
            .read_str(NcuClass::Phys, props::VANITY_NAME)
            .unwrap_or_else(|| self.device_name.clone());
        self.enabled = self.read_bool(NcuClass::Phys, props::ENABLED).unwrap_or(true);
        self.activation_mode = self
            .read_u64(NcuClass::Phys, props::ACTIVATION_MODE)
            .and_then(ActivationMode::from_code)
            .unwrap_or(ActivationMode::Manual);
        self.priority_group = self.read_u64(NcuClass::Phys, props::PRIORITY_GROUP).unwrap_or(0);

        self.addresses.load(&self.registry)?;

        // Seed the state machine from the daemon's current view; no
        // observers exist yet during open, and reload notifies below.
        if let Some(phys) = self.registry.handle(NcuClass::Phys) {
            if let Ok((state, aux)) = self.registry.store().get_state(phys) {
                self.apply_link_state(state, aux);
            }
        }
        if let Some(ip) = self.registry.handle(NcuClass::Ip) {
            if let Ok((state, aux)) = self.registry.store().get_state(ip) {
                self.apply_interface_state(state, aux);
            }
        }
        Ok(())
    }

    /// Discards in-memory state and re-reads everything from the store;
    /// used on external-change notification and for UI-level "cancel".
    /// All dirty bits come back clear.
    pub fn reload(&mut self) -> NcuResult<()> {
        debug!(ncu = %self.device_name, "reloading from store");
        self.read_back()?;
        self.emit(NcuEvent::AddressModelChanged { family: IpFamily::V4 });
        self.emit(NcuEvent::AddressModelChanged { family: IpFamily::V6 });
        Ok(())
    }

    fn read_str(&self, class: NcuClass, property: &str) -> Option<String> {
        self.registry
            .get_prop(class, property)
            .ok()
            .and_then(|v| v.as_str(property).ok().map(str::to_string))
    }

    fn read_u64(&self, class: NcuClass, property: &str) -> Option<u64> {
        self.registry
            .get_prop(class, property)
            .ok()
            .and_then(|v| v.as_u64(property).ok())
    }

    fn read_bool(&self, class: NcuClass, property: &str) -> Option<bool> {
        self.registry
            .get_prop(class, property)
            .ok()
            .and_then(|v| v.as_bool(property).ok())
    }

    fn emit(&self, event: NcuEvent) {
        // No receivers is fine; observers are optional.
        let _ = self.event_tx.send(event);
    }

    /// Subscribes to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<NcuEvent> {
        self.event_tx.subscribe()
    }

    // --- identity & policy -------------------------------------------------

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn vanity_name(&self) -> &str {
        &self.vanity_name
    }

    pub fn set_vanity_name(&mut self, name: &str) -> NcuResult<()> {
        self.registry.set_prop(NcuClass::Phys, props::VANITY_NAME, name.into())?;
        self.vanity_name = name.to_string();
        Ok(())
    }

    pub fn ncu_type(&self) -> NcuType {
        self.ncu_type
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) -> NcuResult<()> {
        self.registry.set_prop(NcuClass::Phys, props::ENABLED, enabled.into())?;
        self.enabled = enabled;
        Ok(())
    }

    pub fn activation_mode(&self) -> ActivationMode {
        self.activation_mode
    }

    pub fn set_activation_mode(&mut self, mode: ActivationMode) -> NcuResult<()> {
        self.registry
            .set_prop(NcuClass::Phys, props::ACTIVATION_MODE, mode.code().into())?;
        self.activation_mode = mode;
        Ok(())
    }

    pub fn priority_group(&self) -> u64 {
        self.priority_group
    }

    pub fn set_priority_group(&mut self, group: u64) -> NcuResult<()> {
        self.registry
            .set_prop(NcuClass::Phys, props::PRIORITY_GROUP, group.into())?;
        self.priority_group = group;
        Ok(())
    }

    // --- wireless ----------------------------------------------------------

    pub fn wifi(&self) -> Option<&WifiInfo> {
        self.wifi.as_ref()
    }

    /// Attaches the wireless network descriptor; wireless NCUs only
    pub fn attach_wifi(&mut self, mut info: WifiInfo) -> NcuResult<()> {
        if self.ncu_type != NcuType::Wireless {
            return Err(NcuError::InvalidParameter(format!(
                "{} is not a wireless NCU",
                self.device_name
            )));
        }
        info.connected = self.state.connection_state().is_connected();
        self.wifi = Some(info);
        Ok(())
    }

    pub fn detach_wifi(&mut self) {
        self.wifi = None;
    }

    // --- address model -----------------------------------------------------

    pub fn addresses(&self) -> &AddressModel {
        &self.addresses
    }

    fn touch_addresses(&mut self, family: IpFamily) {
        self.registry.mark_modified(NcuClass::Ip);
        self.emit(NcuEvent::AddressModelChanged { family });
    }

    pub fn set_family_active(&mut self, family: IpFamily, active: bool) {
        self.addresses.set_active(family, active);
        self.touch_addresses(family);
    }

    pub fn set_dhcp(&mut self, family: IpFamily, dhcp: bool) {
        self.addresses.set_dhcp(family, dhcp);
        self.touch_addresses(family);
    }

    pub fn set_autoconf(&mut self, family: IpFamily, autoconf: bool) -> NcuResult<()> {
        self.addresses.set_autoconf(family, autoconf)?;
        self.touch_addresses(family);
        Ok(())
    }

    pub fn add_static_address(&mut self, family: IpFamily, address: &str, prefix: &str) -> NcuResult<()> {
        self.addresses.add_static(family, address, prefix)?;
        self.touch_addresses(family);
        Ok(())
    }

    pub fn remove_static_address(&mut self, family: IpFamily, address: &str) -> bool {
        let removed = self.addresses.remove_static(family, address);
        if removed {
            self.touch_addresses(family);
        }
        removed
    }

    // --- daemon event ingestion --------------------------------------------

    /// Applies a daemon link-layer state report. Idempotent; observers are
    /// notified only when the derived connection state changes.
    pub fn apply_link_state(&mut self, state: UnitState, aux: AuxState) {
        let change = self.state.apply_link_state(state, aux);
        self.finish_state_change(change);
    }

    /// Applies a daemon IP-layer state report; see
    /// [`apply_link_state`](Self::apply_link_state)
    pub fn apply_interface_state(&mut self, state: UnitState, aux: AuxState) {
        let change = self.state.apply_interface_state(state, aux);
        self.finish_state_change(change);
    }

    /// Records a runtime address report from the daemon
    pub fn apply_acquired_address(&mut self, address: &str, subnet: &str, flags: u32) {
        let family = self.addresses.add_acquired(address, subnet, flags);
        self.emit(NcuEvent::AddressModelChanged { family });
    }

    fn finish_state_change(&mut self, change: StateChange) {
        if change.clear_acquired {
            self.addresses.clean_acquired();
        }
        if !change.changed {
            return;
        }
        // The wifi connected flag follows Connected-family membership as
        // part of the same transition.
        if let Some(wifi) = self.wifi.as_mut() {
            wifi.connected = change.new.is_connected();
        }
        self.emit(NcuEvent::ConnectionStateChanged { old: change.old, new: change.new });
    }

    // --- derived status ----------------------------------------------------

    pub fn connection_state(&self) -> ConnectionState {
        self.state.connection_state()
    }

    /// Whether the NCU counts as active for UI purposes, given the
    /// currently-active priority group of the owning profile
    pub fn is_active(&self, active_priority_group: Option<u64>) -> bool {
        self.state
            .is_active(self.activation_mode, self.priority_group, active_priority_group)
    }

    /// Human-readable status; named wireless states include the network name
    pub fn status_string(&self) -> String {
        let state = self.state.connection_state();
        match state {
            ConnectionState::ConnectingNamed | ConnectionState::ConnectedNamed => {
                let name = self
                    .wifi
                    .as_ref()
                    .map(|w| w.essid.as_str())
                    .unwrap_or(self.vanity_name.as_str());
                state.label().replace("{}", name)
            }
            _ => state.label().to_string(),
        }
    }

    /// Per-class dirty bit
    pub fn is_modified(&self, class: NcuClass) -> bool {
        self.registry.is_modified(class)
    }

    // --- lifecycle ---------------------------------------------------------

    /// Validates and commits all dirty classes; emits one `CommitResult`
    /// per attempted class and returns the first failure, if any
    pub fn commit(&mut self) -> NcuResult<()> {
        let mut pipeline = CommitPipeline::new(&mut self.registry, &self.addresses);
        pipeline.validate()?;
        let report = pipeline.commit(self.enabled)?;
        self.enabled = report.enabled;

        let mut first_error = None;
        for (class, result) in report.results {
            match result {
                Ok(()) => self.emit(NcuEvent::CommitResult { class, ok: true, error: None }),
                Err(e) => {
                    self.emit(NcuEvent::CommitResult {
                        class,
                        ok: false,
                        error: Some(e.to_string()),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Destroys every configured class in the store; fail-fast, partial
    /// destruction is reported
    pub fn destroy(&mut self) -> NcuResult<()> {
        self.registry.destroy()
    }
}
