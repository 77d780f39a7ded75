// # Netlink Kernel Backend
//
// This crate implements the `tnetmgr_core::Kernel` trait over rtnetlink.
//
// ## Operations
//
// - Link lookup: RTM_GETLINK by name or index (ENODEV → `Error::NotFound`)
// - Address table: RTM_GETADDR / RTM_NEWADDR / RTM_DELADDR, IPv4 only
// - Notifications: a second netlink socket bound to RTMGRP_IPV4_IFADDR
//
// ## Point-to-point links
//
// On tun devices such as tailscale0 the kernel reports the local address in
// IFA_LOCAL and the peer in IFA_ADDRESS. IFA_LOCAL is preferred whenever it
// is present.
//
// ## Platform Support
//
// Netlink is Linux-only. On other targets `NetlinkKernel::connect` fails.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::NetlinkKernel;

#[cfg(not(target_os = "linux"))]
mod unsupported;

#[cfg(not(target_os = "linux"))]
pub use unsupported::NetlinkKernel;
