//! Core traits for tnetmgr
//!
//! - [`Kernel`]: Links, IPv4 address table, and address-change notifications

pub mod kernel;

pub use kernel::{AddressChangeEvent, AddressStream, Kernel, Link};
