use std::net::{IpAddr, Ipv4Addr};

/// The outbound-routable local address. Used as this host's identity in
/// announcements and screen-negotiation payloads.
pub fn local_ip() -> IpAddr {
    local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
