use ipnet::Ipv4Net;
use tnetmgr_core::traits::{AddressStream, Kernel, Link};
use tnetmgr_core::{Error, Result};

/// Placeholder for targets without netlink
pub struct NetlinkKernel {
    _private: (),
}

impl NetlinkKernel {
    pub fn connect() -> Result<Self> {
        Err(unsupported())
    }
}

fn unsupported() -> Error {
    Error::config("Netlink kernel backend is only supported on Linux")
}

#[async_trait::async_trait]
impl Kernel for NetlinkKernel {
    async fn link_by_name(&self, _name: &str) -> Result<Link> {
        Err(unsupported())
    }

    async fn link_by_index(&self, _index: u32) -> Result<Link> {
        Err(unsupported())
    }

    async fn list_addresses(&self, _link: &Link) -> Result<Vec<Ipv4Net>> {
        Err(unsupported())
    }

    async fn add_address(&self, _link: &Link, _address: Ipv4Net) -> Result<()> {
        Err(unsupported())
    }

    async fn delete_address(&self, _link: &Link, _address: Ipv4Net) -> Result<()> {
        Err(unsupported())
    }

    async fn watch(&self) -> Result<AddressStream> {
        Err(unsupported())
    }
}
