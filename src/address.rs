//! Control-plane address discovery
//!
//! Containerized envoy cannot reach the control plane on `localhost`, so it is
//! pointed at the first usable IPv4 address of the host instead.

use crate::error::{HarnessError, Result};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use std::net::{IpAddr, Ipv4Addr};

/// One address entry of a network interface
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceAddr {
    pub name: String,
    pub up: bool,
    pub loopback: bool,
    pub point_to_point: bool,
    pub addr: Option<IpAddr>,
}

/// Return `override_addr` verbatim, or the first qualifying host IPv4 address
pub fn resolve_control_plane_addr(override_addr: Option<&str>) -> Result<String> {
    if let Some(addr) = override_addr.filter(|a| !a.is_empty()) {
        return Ok(addr.to_string());
    }

    let interfaces = list_interface_addrs()?;
    resolve_from(None, &interfaces)
}

/// Same as [`resolve_control_plane_addr`], choosing from a given interface list
pub fn resolve_from(override_addr: Option<&str>, interfaces: &[InterfaceAddr]) -> Result<String> {
    if let Some(addr) = override_addr.filter(|a| !a.is_empty()) {
        return Ok(addr.to_string());
    }

    match select_ipv4(interfaces) {
        Some(ip) => {
            tracing::debug!(%ip, "discovered control-plane address");
            Ok(ip.to_string())
        }
        None => Err(HarnessError::NoAddressFound),
    }
}

/// First IPv4 address on an interface that is up, not loopback and not point-to-point
pub fn select_ipv4(interfaces: &[InterfaceAddr]) -> Option<Ipv4Addr> {
    interfaces
        .iter()
        .filter(|i| i.up && !i.loopback && !i.point_to_point)
        .find_map(|i| match i.addr {
            Some(IpAddr::V4(v4)) => Some(v4),
            Some(IpAddr::V6(v6)) => v6.to_ipv4_mapped(),
            None => None,
        })
}

/// Snapshot of every interface address on the host, in kernel order
pub fn list_interface_addrs() -> Result<Vec<InterfaceAddr>> {
    let addrs = getifaddrs().map_err(HarnessError::InterfaceQuery)?;

    Ok(addrs
        .map(|ifa| {
            let addr = ifa
                .address
                .as_ref()
                .and_then(|a| a.as_sockaddr_in())
                .map(|sin| IpAddr::V4(Ipv4Addr::from(sin.ip())));
            InterfaceAddr {
                name: ifa.interface_name,
                up: ifa.flags.contains(InterfaceFlags::IFF_UP),
                loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                point_to_point: ifa.flags.contains(InterfaceFlags::IFF_POINTOPOINT),
                addr,
            }
        })
        .collect())
}
