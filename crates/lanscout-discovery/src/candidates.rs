//! Candidate address lists for a discovery scan.

use lanscout_core::config::DiscoveryConfig;
use std::net::{Ipv4Addr, UdpSocket};
use tracing::debug;

/// Addresses to probe, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePlan {
    /// Loopback forms and likely gateways, probed one by one
    pub priority: Vec<String>,
    /// Remaining /24 hosts, probed in parallel batches
    pub sweep: Vec<String>,
}

impl CandidatePlan {
    pub fn len(&self) -> usize {
        self.priority.len() + self.sweep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.sweep.is_empty()
    }
}

/// Builds the candidate plan for a scan.
///
/// Loopback forms always come first. With a known device address the inferred
/// gateway (`a.b.c.1`) follows and the device's /24 is swept; otherwise the
/// configured fallback routers follow and the first router's /24 is swept.
pub fn build_plan(config: &DiscoveryConfig, device: Option<Ipv4Addr>) -> CandidatePlan {
    fn push(host: String, list: &mut Vec<String>) {
        if !list.contains(&host) {
            list.push(host);
        }
    }

    let mut priority: Vec<String> = Vec::new();
    for host in &config.loopback_hosts {
        push(host.clone(), &mut priority);
    }

    let subnet = match device {
        Some(device) => {
            push(gateway_for(device).to_string(), &mut priority);
            Some(subnet_prefix(device))
        }
        None => {
            for gateway in &config.fallback_gateways {
                push(gateway.to_string(), &mut priority);
            }
            config.fallback_gateways.first().map(|g| subnet_prefix(*g))
        }
    };

    let mut sweep = Vec::new();
    if config.subnet_sweep {
        if let Some([a, b, c]) = subnet {
            for d in 1..=254u8 {
                let addr = Ipv4Addr::new(a, b, c, d);
                if Some(addr) == device {
                    continue;
                }
                let host = addr.to_string();
                if !priority.contains(&host) {
                    sweep.push(host);
                }
            }
        }
    }

    CandidatePlan { priority, sweep }
}

/// The conventional gateway of the device's /24.
pub fn gateway_for(device: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = device.octets();
    Ipv4Addr::new(a, b, c, 1)
}

fn subnet_prefix(addr: Ipv4Addr) -> [u8; 3] {
    let [a, b, c, _] = addr.octets();
    [a, b, c]
}

/// Asks the OS which private IPv4 address it would use for outbound traffic.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn detect_local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(192, 0, 2, 1), 80)).ok()?;

    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) if ip.is_private() => {
            debug!(address = %ip, "Detected device address");
            Some(ip)
        }
        other => {
            debug!(address = %other, "Outbound address is not a private IPv4 address");
            None
        }
    }
}
