// # Kernel Trait
//
// Defines the kernel networking boundary: link lookup, IPv4 address table
// access, and the address-change notification stream.
//
// ## Implementations
//
// - Netlink-based (Linux): `tnetmgr-netlink` crate
// - In-memory test double: `tests/common` in this crate
//
// ## Usage
//
// ```rust,ignore
// use tnetmgr_core::Kernel;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let kernel = /* Kernel implementation */;
//
//     let link = kernel.link_by_name("tailscale0").await?;
//     for addr in kernel.list_addresses(&link).await? {
//         println!("{addr}");
//     }
//
//     let mut events = kernel.watch().await?;
//     while let Some(event) = events.next().await {
//         println!("address change: {:?}", event);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use ipnet::Ipv4Net;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::Result;

/// A kernel network interface, as resolved at one point in time
///
/// Links are never cached; resolve again before each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Kernel-assigned interface index
    pub index: u32,
    /// Interface name (e.g. "tailscale0")
    pub name: String,
}

impl Link {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// An IPv4 address was added to or removed from some link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChangeEvent {
    /// Index of the link the address belongs to
    pub link_index: u32,
    /// The address and its prefix length
    pub network: Ipv4Net,
    /// `true` for RTM_NEWADDR, `false` for RTM_DELADDR
    pub added: bool,
}

impl AddressChangeEvent {
    pub fn added(link_index: u32, network: Ipv4Net) -> Self {
        Self {
            link_index,
            network,
            added: true,
        }
    }

    pub fn removed(link_index: u32, network: Ipv4Net) -> Self {
        Self {
            link_index,
            network,
            added: false,
        }
    }
}

/// Stream of address-change notifications
///
/// Dropping the stream tears down the underlying subscription.
pub type AddressStream = Pin<Box<dyn Stream<Item = AddressChangeEvent> + Send + 'static>>;

/// Trait for the kernel networking boundary
///
/// All calls go to the kernel; implementations must not cache links or
/// address lists.
///
/// ## Errors
///
/// - Lookups of a missing link return [`crate::Error::NotFound`]
/// - Any other failure returns [`crate::Error::Kernel`]
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Look up a link by interface name
    async fn link_by_name(&self, name: &str) -> Result<Link>;

    /// Look up a link by the index carried in notifications
    async fn link_by_index(&self, index: u32) -> Result<Link>;

    /// Whether a link with this name currently exists
    async fn link_exists(&self, name: &str) -> bool {
        self.link_by_name(name).await.is_ok()
    }

    /// List the IPv4 addresses currently bound to `link`
    async fn list_addresses(&self, link: &Link) -> Result<Vec<Ipv4Net>>;

    /// Bind `address` to `link`
    async fn add_address(&self, link: &Link, address: Ipv4Net) -> Result<()>;

    /// Remove `address` from `link`
    async fn delete_address(&self, link: &Link, address: Ipv4Net) -> Result<()>;

    /// Subscribe to IPv4 address changes on all links
    ///
    /// The stream runs until dropped. Events queue without bound until
    /// consumed.
    async fn watch(&self) -> Result<AddressStream>;
}
