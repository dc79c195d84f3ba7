//! Interface and address allow/block policy for the harvester.
//!
//! Two independent layers: an interface filter (whitelist wins over
//! blacklist) and an address filter (loopback excluded unconditionally,
//! then whitelist/blacklist, then IPv6 gating). The process-wide filters
//! are computed lazily from the environment behind one-shot gates; the
//! value types are constructed from explicit lists so policy stays
//! testable without touching globals.

#[cfg(test)]
mod filters_test;

use crate::config;
use lazy_static::lazy_static;
use log::{info, warn};
use parking_lot::Mutex;
use shared::error::{Error, Result};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

/// One local network interface as seen by the harvester.
#[derive(Debug, Clone)]
pub struct NetInterface {
    pub name: String,
    pub addrs: Vec<IpAddr>,
    pub is_loopback: bool,
    /// Alias/sub-interfaces (`eth0:1`) count as virtual.
    pub is_virtual: bool,
}

/// Enumerates local interfaces, grouping addresses by interface name in
/// enumeration order. Interfaces that are down carry no addresses and so
/// never show up.
pub fn enumerate_interfaces() -> Vec<NetInterface> {
    let mut interfaces: Vec<NetInterface> = Vec::new();
    match if_addrs::get_if_addrs() {
        Ok(addrs) => {
            for ifaddr in addrs {
                let ip = ifaddr.ip();
                match interfaces.iter_mut().find(|i| i.name == ifaddr.name) {
                    Some(existing) => {
                        existing.is_loopback &= ip.is_loopback();
                        existing.addrs.push(ip);
                    }
                    None => interfaces.push(NetInterface {
                        is_loopback: ip.is_loopback(),
                        is_virtual: ifaddr.name.contains(':'),
                        name: ifaddr.name,
                        addrs: vec![ip],
                    }),
                }
            }
        }
        Err(err) => info!("failed to get network interfaces: {err}"),
    }
    interfaces
}

fn is_link_local_v6(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Allow/block policy over interface names. The blocked list is honored
/// only when no allowed list is configured.
#[derive(Debug, Default)]
pub struct InterfaceFilter {
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl InterfaceFilter {
    /// Validates the configured lists against the live interface names.
    /// Every listed name must resolve to a real interface, and blocking
    /// every interface is a configuration error.
    pub fn initialize(
        allowed: Option<Vec<String>>,
        blocked: Option<Vec<String>>,
        known: &[String],
    ) -> Result<Self> {
        if let Some(allowed) = allowed {
            for name in &allowed {
                if !known.contains(name) {
                    return Err(Error::ErrConfig(format!(
                        "there is no network interface with the name {name}"
                    )));
                }
            }
            return Ok(Self {
                allowed,
                blocked: Vec::new(),
            });
        }
        if let Some(blocked) = blocked {
            for name in &blocked {
                if !known.contains(name) {
                    return Err(Error::ErrConfig(format!(
                        "there is no network interface with the name {name}"
                    )));
                }
            }
            if !known.is_empty() && known.iter().all(|name| blocked.contains(name)) {
                return Err(Error::ErrConfig(
                    "all network interfaces are blocked".to_owned(),
                ));
            }
            return Ok(Self {
                allowed: Vec::new(),
                blocked,
            });
        }
        Ok(Self::default())
    }

    pub fn is_interface_allowed(&self, name: &str) -> bool {
        if !self.allowed.is_empty() {
            return self.allowed.iter().any(|allowed| allowed == name);
        }
        if !self.blocked.is_empty() {
            return !self.blocked.iter().any(|blocked| blocked == name);
        }
        true
    }
}

/// Allow/block policy over concrete addresses plus the IPv6 kill switches.
#[derive(Debug, Default)]
pub struct AddressFilter {
    allowed: Vec<IpAddr>,
    blocked: Vec<IpAddr>,
    disable_ipv6: bool,
    disable_link_local: bool,
}

impl AddressFilter {
    pub fn new(
        allowed: Vec<IpAddr>,
        blocked: Vec<IpAddr>,
        disable_ipv6: bool,
        disable_link_local: bool,
    ) -> Self {
        Self {
            allowed,
            blocked,
            disable_ipv6,
            disable_link_local,
        }
    }

    /// Loopback is never allowed; otherwise the allowed list (when
    /// non-empty) must contain the address and the blocked list must not.
    pub fn is_address_allowed(&self, addr: &IpAddr) -> bool {
        if addr.is_loopback() {
            return false;
        }
        let allowed = self.allowed.is_empty() || self.allowed.contains(addr);
        allowed && !self.blocked.contains(addr)
    }

    /// The full harvesting gate: allow/block policy plus the IPv6 and
    /// IPv6-link-local switches.
    pub fn admits(&self, addr: &IpAddr) -> bool {
        if !self.is_address_allowed(addr) {
            return false;
        }
        if let IpAddr::V6(v6) = addr {
            if self.disable_ipv6 {
                return false;
            }
            if self.disable_link_local && is_link_local_v6(v6) {
                return false;
            }
        }
        true
    }
}

lazy_static! {
    static ref INTERFACE_FILTER: Mutex<Option<Arc<InterfaceFilter>>> = Mutex::new(None);
    static ref ADDRESS_FILTER: Mutex<Option<Arc<AddressFilter>>> = Mutex::new(None);
}

/// The process-wide interface filter, built from the environment and the
/// live interface list on first access. A configuration error is returned
/// to every caller until the configuration is fixed (and the filters
/// reset).
pub fn interface_filter() -> Result<Arc<InterfaceFilter>> {
    let mut slot = INTERFACE_FILTER.lock();
    if let Some(filter) = slot.as_ref() {
        return Ok(filter.clone());
    }
    let known: Vec<String> = enumerate_interfaces()
        .into_iter()
        .map(|iface| iface.name)
        .collect();
    let filter = Arc::new(InterfaceFilter::initialize(
        config::get_string_array(config::ALLOWED_INTERFACES),
        config::get_string_array(config::BLOCKED_INTERFACES),
        &known,
    )?);
    *slot = Some(filter.clone());
    Ok(filter)
}

/// The process-wide address filter. Unparsable configured addresses are
/// logged and skipped.
pub fn address_filter() -> Arc<AddressFilter> {
    let mut slot = ADDRESS_FILTER.lock();
    if let Some(filter) = slot.as_ref() {
        return filter.clone();
    }
    let filter = Arc::new(AddressFilter::new(
        parse_ip_list(config::ALLOWED_ADDRESSES),
        parse_ip_list(config::BLOCKED_ADDRESSES),
        config::get_bool(config::DISABLE_IPV6, false),
        config::get_bool(config::DISABLE_LINK_LOCAL_ADDRESSES, false),
    ));
    *slot = Some(filter.clone());
    filter
}

/// Clears the process-wide filters so the next access re-reads the
/// configuration. Test hook and reconfiguration aid.
pub fn reset_filters() {
    *INTERFACE_FILTER.lock() = None;
    *ADDRESS_FILTER.lock() = None;
}

fn parse_ip_list(name: &str) -> Vec<IpAddr> {
    config::get_string_array(name)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| {
            s.parse()
                .map_err(|err| warn!("failed to add address {s}: {err}"))
                .ok()
        })
        .collect()
}
