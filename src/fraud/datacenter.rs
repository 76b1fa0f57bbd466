//! Datacenter, cloud and VPN address ranges

use once_cell::sync::Lazy;
use std::net::{IpAddr, Ipv4Addr};

const DATACENTER_RANGES: &[&str] = &[
    // Cloudflare
    "104.16.0.0/12",
    "172.64.0.0/13",
    "141.101.64.0/18",
    "190.93.240.0/20",
    // Google Cloud
    "34.0.0.0/8",
    "35.0.0.0/8",
    "8.34.208.0/20",
    "8.35.192.0/20",
    // AWS
    "52.0.0.0/8",
    "54.0.0.0/8",
    "3.0.0.0/8",
    "18.0.0.0/8",
    // Azure
    "13.0.0.0/8",
    "20.0.0.0/8",
    "40.0.0.0/8",
    "51.0.0.0/8",
    // DigitalOcean
    "167.99.0.0/16",
    "178.128.0.0/16",
    "206.189.0.0/16",
    "159.65.0.0/16",
    // Linode
    "45.33.0.0/16",
    "50.116.0.0/16",
    "69.164.192.0/18",
    // Vultr
    "45.32.0.0/16",
    "45.63.0.0/16",
    "45.76.0.0/16",
    "45.77.0.0/16",
    // Hetzner
    "95.216.0.0/16",
    "135.181.0.0/16",
    "65.21.0.0/16",
    // VPN providers
    "185.156.64.0/24",
    "104.223.0.0/16",
    "209.141.32.0/19",
    "198.54.128.0/17",
    // Social platform crawlers
    "157.240.0.0/16",
    "199.16.156.0/22",
];

#[derive(Debug, Clone, Copy)]
struct Ipv4Net {
    network: u32,
    mask: u32,
}

impl Ipv4Net {
    fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = cidr.split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        let prefix: u32 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }

        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        Some(Self {
            network: u32::from(addr) & mask,
            mask,
        })
    }

    fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask == self.network
    }
}

static RANGES: Lazy<Vec<Ipv4Net>> = Lazy::new(|| {
    DATACENTER_RANGES
        .iter()
        .filter_map(|cidr| Ipv4Net::parse(cidr))
        .collect()
});

/// Whether `ip` belongs to a known datacenter or VPN range
pub fn is_datacenter_ip(ip: &str) -> bool {
    let addr = match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => addr,
        Ok(IpAddr::V6(addr)) => match addr.to_ipv4_mapped() {
            Some(addr) => addr,
            None => return false,
        },
        Err(_) => return false,
    };

    RANGES.iter().any(|net| net.contains(addr))
}
