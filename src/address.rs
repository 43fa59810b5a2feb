//! Dual-stack address model
//!
//! Maps between the user-editable address lists and the store's
//! addrsrc + address-string arrays, per IP family, and reconciles them
//! against the dynamically acquired addresses the daemon reports at
//! runtime. Static records are user-authored; the per-family DHCP
//! placeholder record carries the single DHCP-learned address/subnet pair
//! and is never part of the static list.

use crate::error::{NcuError, NcuResult};
use crate::handles::{HandleRegistry, NcuClass};
use crate::store::props;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Acquired-address flag bit: a DHCP client is running on the interface.
///
/// Can be set even when DHCP is only used for auxiliary information, so the
/// static list stays authoritative over it.
pub const DHCP_RUNNING: u32 = 0x1;

/// IP family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Code used in the `ip-version` property array
    pub fn version_code(&self) -> u64 {
        match self {
            IpFamily::V4 => 4,
            IpFamily::V6 => 6,
        }
    }

    pub fn from_version_code(code: u64) -> Option<Self> {
        match code {
            4 => Some(IpFamily::V4),
            6 => Some(IpFamily::V6),
            _ => None,
        }
    }

    /// Family of an address string
    pub fn of_address(address: &str) -> IpFamily {
        if address.contains(':') {
            IpFamily::V6
        } else {
            IpFamily::V4
        }
    }

    fn addrsrc_prop(&self) -> &'static str {
        match self {
            IpFamily::V4 => props::IPV4_ADDRSRC,
            IpFamily::V6 => props::IPV6_ADDRSRC,
        }
    }

    fn addr_prop(&self) -> &'static str {
        match self {
            IpFamily::V4 => props::IPV4_ADDR,
            IpFamily::V6 => props::IPV6_ADDR,
        }
    }
}

/// Declared source of a family's addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrSrc {
    Dhcp = 1,
    Autoconf = 2,
    Static = 3,
}

impl AddrSrc {
    pub fn code(&self) -> u64 {
        *self as u64
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(AddrSrc::Dhcp),
            2 => Some(AddrSrc::Autoconf),
            3 => Some(AddrSrc::Static),
            _ => None,
        }
    }
}

/// One address/prefix pair, static or acquired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    /// Prefix length for static records; prefix or subnet mask as reported
    /// by the daemon for acquired ones
    pub prefix: String,
    pub is_v6: bool,
    pub is_dhcp: bool,
    pub is_autoconf: bool,
}

impl AddressRecord {
    fn new_static(family: IpFamily, address: &str, prefix: &str) -> Self {
        Self {
            address: address.to_string(),
            prefix: prefix.to_string(),
            is_v6: family == IpFamily::V6,
            is_dhcp: false,
            is_autoconf: false,
        }
    }

    fn placeholder(family: IpFamily) -> Self {
        Self {
            address: String::new(),
            prefix: String::new(),
            is_v6: family == IpFamily::V6,
            is_dhcp: true,
            is_autoconf: false,
        }
    }

    /// Serializes to the store's `"address/prefix"` form
    fn to_entry(&self) -> String {
        format!("{}/{}", self.address, self.prefix)
    }

    /// Parses a store `"address/prefix"` entry
    fn from_entry(family: IpFamily, entry: &str) -> NcuResult<Self> {
        let (address, prefix) = entry
            .split_once('/')
            .ok_or_else(|| NcuError::ParseError(format!("address entry '{}' has no prefix", entry)))?;
        validate_address(family, address)?;
        validate_prefix(family, prefix)?;
        Ok(Self::new_static(family, address, prefix))
    }
}

/// Validates that an address string parses in the given family
fn validate_address(family: IpFamily, address: &str) -> NcuResult<()> {
    let ok = match family {
        IpFamily::V4 => address.parse::<Ipv4Addr>().is_ok(),
        IpFamily::V6 => address.parse::<Ipv6Addr>().is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(NcuError::InvalidParameter(format!("invalid {:?} address: {}", family, address)))
    }
}

/// Validates a prefix length (32 max for IPv4, 128 for IPv6)
fn validate_prefix(family: IpFamily, prefix: &str) -> NcuResult<()> {
    let max = match family {
        IpFamily::V4 => 32,
        IpFamily::V6 => 128,
    };
    let len: u8 = prefix
        .parse()
        .map_err(|_| NcuError::InvalidParameter(format!("invalid prefix length: {}", prefix)))?;
    if len > max {
        return Err(NcuError::InvalidParameter(format!(
            "prefix length {} exceeds maximum {}",
            len, max
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct FamilyModel {
    family: IpFamily,
    active: bool,
    has_dhcp: bool,
    has_autoconf: bool,
    need_dhcp: bool,
    /// User-authored records, most-recently-read first
    static_list: Vec<AddressRecord>,
    /// The DHCP-learned address/subnet pair, empty until acquired
    dhcp_record: AddressRecord,
    /// Runtime addresses keyed by address string, replaced wholesale on
    /// every observation
    acquired: HashMap<String, AddressRecord>,
}

impl FamilyModel {
    fn new(family: IpFamily) -> Self {
        Self {
            family,
            active: false,
            has_dhcp: false,
            has_autoconf: false,
            need_dhcp: false,
            static_list: Vec::new(),
            dhcp_record: AddressRecord::placeholder(family),
            acquired: HashMap::new(),
        }
    }

    fn sources(&self) -> Vec<u64> {
        let mut sources = Vec::new();
        if self.has_dhcp {
            sources.push(AddrSrc::Dhcp.code());
        }
        if self.has_autoconf && self.family == IpFamily::V6 {
            sources.push(AddrSrc::Autoconf.code());
        }
        if !self.static_list.is_empty() {
            sources.push(AddrSrc::Static.code());
        }
        sources
    }

    fn reset_acquired(&mut self) {
        self.acquired.clear();
        self.dhcp_record = AddressRecord::placeholder(self.family);
        self.need_dhcp = self.has_dhcp;
    }
}

/// Per-NCU address model for both families
#[derive(Debug, Clone)]
pub struct AddressModel {
    v4: FamilyModel,
    v6: FamilyModel,
}

impl Default for AddressModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressModel {
    pub fn new() -> Self {
        Self {
            v4: FamilyModel::new(IpFamily::V4),
            v6: FamilyModel::new(IpFamily::V6),
        }
    }

    fn family(&self, family: IpFamily) -> &FamilyModel {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }

    fn family_mut(&mut self, family: IpFamily) -> &mut FamilyModel {
        match family {
            IpFamily::V4 => &mut self.v4,
            IpFamily::V6 => &mut self.v6,
        }
    }

    /// Whether a family participates in addressing at all
    pub fn is_active(&self, family: IpFamily) -> bool {
        self.family(family).active
    }

    pub fn set_active(&mut self, family: IpFamily, active: bool) {
        self.family_mut(family).active = active;
    }

    pub fn has_dhcp(&self, family: IpFamily) -> bool {
        self.family(family).has_dhcp
    }

    pub fn set_dhcp(&mut self, family: IpFamily, dhcp: bool) {
        let fam = self.family_mut(family);
        fam.has_dhcp = dhcp;
        fam.need_dhcp = dhcp;
    }

    pub fn has_autoconf(&self, family: IpFamily) -> bool {
        self.family(family).has_autoconf
    }

    /// Enables stateless autoconfiguration; IPv6 only
    pub fn set_autoconf(&mut self, family: IpFamily, autoconf: bool) -> NcuResult<()> {
        if family == IpFamily::V4 && autoconf {
            return Err(NcuError::InvalidParameter(
                "autoconf is only valid for IPv6".to_string(),
            ));
        }
        self.family_mut(family).has_autoconf = autoconf;
        Ok(())
    }

    /// Whether a family is still waiting for a DHCP address it expects
    pub fn needs_dhcp(&self, family: IpFamily) -> bool {
        self.family(family).need_dhcp
    }

    /// User-authored static records, most-recently-read first
    pub fn static_addresses(&self, family: IpFamily) -> &[AddressRecord] {
        &self.family(family).static_list
    }

    /// Adds a user-authored static address; activates the family
    pub fn add_static(&mut self, family: IpFamily, address: &str, prefix: &str) -> NcuResult<()> {
        validate_address(family, address)?;
        validate_prefix(family, prefix)?;
        let fam = self.family_mut(family);
        fam.static_list
            .insert(0, AddressRecord::new_static(family, address, prefix));
        fam.active = true;
        Ok(())
    }

    /// Removes a static address by address string
    pub fn remove_static(&mut self, family: IpFamily, address: &str) -> bool {
        let fam = self.family_mut(family);
        let before = fam.static_list.len();
        fam.static_list.retain(|r| r.address != address);
        fam.static_list.len() != before
    }

    /// Acquired runtime records for a family
    pub fn acquired(&self, family: IpFamily) -> impl Iterator<Item = &AddressRecord> {
        self.family(family).acquired.values()
    }

    /// The single address a UI would show for a family: the first static
    /// record, else the DHCP-learned one if any
    pub fn address_string(&self, family: IpFamily) -> Option<String> {
        let fam = self.family(family);
        if let Some(record) = fam.static_list.first() {
            return Some(record.address.clone());
        }
        if fam.dhcp_record.address.is_empty() {
            None
        } else {
            Some(fam.dhcp_record.address.clone())
        }
    }

    /// Rebuilds the model from the store's view of the IP class.
    ///
    /// Families with no addrsrc entries stay inactive. Static entries are
    /// inserted at the head, so list order is most-recently-read first, not
    /// store declaration order. Acquired state is discarded.
    pub fn load(&mut self, registry: &HandleRegistry) -> NcuResult<()> {
        self.v4 = FamilyModel::new(IpFamily::V4);
        self.v6 = FamilyModel::new(IpFamily::V6);

        if registry.handle(NcuClass::Ip).is_none() {
            debug!(ncu = registry.name(), "no IP configuration, address model empty");
            return Ok(());
        }

        let versions = match registry.get_prop(NcuClass::Ip, props::IP_VERSION) {
            Ok(value) => value.as_u64_array(props::IP_VERSION)?.to_vec(),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        for code in versions {
            match IpFamily::from_version_code(code) {
                Some(family) => self.load_family(registry, family)?,
                None => warn!(code, "ignoring unknown ip-version code"),
            }
        }
        Ok(())
    }

    fn load_family(&mut self, registry: &HandleRegistry, family: IpFamily) -> NcuResult<()> {
        let sources = match registry.get_prop(NcuClass::Ip, family.addrsrc_prop()) {
            Ok(value) => value.as_u64_array(family.addrsrc_prop())?.to_vec(),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if sources.is_empty() {
            return Ok(());
        }

        let mut has_static = false;
        {
            let fam = self.family_mut(family);
            fam.active = true;
            for code in sources {
                match AddrSrc::from_code(code) {
                    Some(AddrSrc::Dhcp) => fam.has_dhcp = true,
                    Some(AddrSrc::Autoconf) => fam.has_autoconf = true,
                    Some(AddrSrc::Static) => has_static = true,
                    None => warn!(code, "ignoring unknown addrsrc code"),
                }
            }
            fam.need_dhcp = fam.has_dhcp;
        }

        if has_static {
            let entries = match registry.get_prop(NcuClass::Ip, family.addr_prop()) {
                Ok(value) => value.as_str_array(family.addr_prop())?.to_vec(),
                Err(e) if e.is_not_found() => {
                    warn!(ncu = registry.name(), ?family, "static addrsrc with no address list");
                    Vec::new()
                }
                Err(e) => return Err(e),
            };
            let fam = self.family_mut(family);
            for entry in &entries {
                match AddressRecord::from_entry(family, entry) {
                    Ok(record) => fam.static_list.insert(0, record),
                    Err(e) => warn!(entry, error = %e, "skipping unparsable address entry"),
                }
            }
        }
        Ok(())
    }

    /// Serializes the model back into the IP class handle; the inverse of
    /// [`load`](Self::load), run immediately before commit.
    ///
    /// Inactive families (and active families whose sources are all gone)
    /// get their properties deleted rather than written as empty arrays,
    /// since the store rejects an empty required array. Returns true if at
    /// least one family remains active.
    pub fn sync(&self, registry: &mut HandleRegistry) -> NcuResult<bool> {
        let mut versions = Vec::new();

        for family in [IpFamily::V4, IpFamily::V6] {
            let fam = self.family(family);
            let sources = fam.sources();
            if fam.active && !sources.is_empty() {
                versions.push(family.version_code());
                registry.set_prop(NcuClass::Ip, family.addrsrc_prop(), sources.into())?;
                if fam.static_list.is_empty() {
                    registry.delete_prop(NcuClass::Ip, family.addr_prop())?;
                } else {
                    let entries: Vec<String> =
                        fam.static_list.iter().map(AddressRecord::to_entry).collect();
                    registry.set_prop(NcuClass::Ip, family.addr_prop(), entries.into())?;
                }
            } else {
                registry.delete_prop(NcuClass::Ip, family.addrsrc_prop())?;
                registry.delete_prop(NcuClass::Ip, family.addr_prop())?;
            }
        }

        if versions.is_empty() {
            registry.delete_prop(NcuClass::Ip, props::IP_VERSION)?;
            debug!(ncu = registry.name(), "both families inactive, ip-version deleted");
            Ok(false)
        } else {
            registry.set_prop(NcuClass::Ip, props::IP_VERSION, versions.into())?;
            Ok(true)
        }
    }

    /// Records a runtime address reported by the daemon.
    ///
    /// An address matching a static record is classified static regardless
    /// of the DHCP-running flag bit; the static list is authoritative.
    /// Anything else is DHCP-sourced and satisfies the family's pending
    /// DHCP expectation. Re-observing an address replaces the prior record
    /// (lease renewal with a changed subnet). Returns the affected family.
    pub fn add_acquired(&mut self, address: &str, subnet: &str, flags: u32) -> IpFamily {
        let family = IpFamily::of_address(address);
        let fam = self.family_mut(family);

        let matches_static = fam.static_list.iter().any(|r| r.address == address);
        let record = AddressRecord {
            address: address.to_string(),
            prefix: subnet.to_string(),
            is_v6: family == IpFamily::V6,
            is_dhcp: !matches_static,
            is_autoconf: false,
        };

        if matches_static {
            debug!(address, "acquired address matches static list, flags 0x{:x} ignored", flags);
        } else {
            fam.need_dhcp = false;
            fam.dhcp_record = record.clone();
            debug!(address, subnet, "acquired DHCP address");
        }

        fam.acquired.insert(address.to_string(), record);
        family
    }

    /// Discards all acquired state; called when the NCU leaves `Online`
    pub fn clean_acquired(&mut self) {
        self.v4.reset_acquired();
        self.v6.reset_acquired();
        debug!("acquired addresses cleared");
    }

    /// True iff neither family still needs a DHCP address it is configured
    /// to expect
    pub fn acquired_all(&self) -> bool {
        !self.v4.need_dhcp && !self.v6.need_dhcp
    }
}
