//! Tailnet address classification
//!
//! Tailscale assigns IPv4 addresses out of the CGNAT block `100.64.0.0/10`
//! (<https://tailscale.com/kb/1015/100.x-addresses>). Both the up/down state
//! and the event filter decide relevance through [`is_tailnet_address`].

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Network address of the tailnet block, `100.64.0.0`.
pub const TAILNET_BASE: Ipv4Addr = Ipv4Addr::new(100, 64, 0, 0);

/// Prefix length of the tailnet block.
pub const TAILNET_PREFIX_LEN: u8 = 10;

const TAILNET_MASK: u32 = !(u32::MAX >> TAILNET_PREFIX_LEN);

/// Whether the address of `network` lies inside `100.64.0.0/10`.
///
/// Only the address part is inspected; the prefix length is irrelevant.
pub fn is_tailnet_address(network: &Ipv4Net) -> bool {
    in_tailnet(network.addr())
}

fn in_tailnet(addr: Ipv4Addr) -> bool {
    u32::from(addr) & TAILNET_MASK == u32::from(TAILNET_BASE)
}
