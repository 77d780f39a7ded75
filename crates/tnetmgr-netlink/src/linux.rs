use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use ipnet::Ipv4Net;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::{AsyncSocket, SocketAddr};
use rtnetlink::Handle;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use tnetmgr_core::traits::{AddressChangeEvent, AddressStream, Kernel, Link};
use tnetmgr_core::{Error, Result};

/// rtnetlink-backed [`Kernel`]
///
/// Owns one request socket; every [`Kernel::watch`] call opens its own
/// multicast socket.
pub struct NetlinkKernel {
    handle: Handle,
    connection: JoinHandle<()>,
}

impl NetlinkKernel {
    /// Open the request socket
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect() -> Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| Error::kernel(format!("failed to open netlink socket: {}", e)))?;
        let connection = tokio::spawn(connection);

        Ok(Self { handle, connection })
    }

    async fn find_link(&self, request: rtnetlink::LinkGetRequest, what: String) -> Result<Link> {
        let links: Vec<LinkMessage> = request
            .execute()
            .try_collect()
            .await
            .map_err(|e| lookup_error(e, &what))?;

        links
            .iter()
            .find_map(link_from_message)
            .ok_or_else(|| Error::not_found(what))
    }

    async fn address_messages(&self, link: &Link) -> Result<Vec<AddressMessage>> {
        let messages: Vec<AddressMessage> = self
            .handle
            .address()
            .get()
            .set_link_index_filter(link.index)
            .execute()
            .try_collect()
            .await
            .map_err(|e| Error::kernel(format!("listing addresses of {}: {}", link.name, e)))?;

        Ok(messages
            .into_iter()
            .filter(|m| m.header.index == link.index && m.header.family == AddressFamily::Inet)
            .collect())
    }
}

impl Drop for NetlinkKernel {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

#[async_trait]
impl Kernel for NetlinkKernel {
    async fn link_by_name(&self, name: &str) -> Result<Link> {
        let request = self.handle.link().get().match_name(name.to_string());
        self.find_link(request, name.to_string()).await
    }

    async fn link_by_index(&self, index: u32) -> Result<Link> {
        let request = self.handle.link().get().match_index(index);
        self.find_link(request, format!("link index {}", index)).await
    }

    async fn list_addresses(&self, link: &Link) -> Result<Vec<Ipv4Net>> {
        let messages = self.address_messages(link).await?;
        Ok(messages.iter().filter_map(ipv4_network).collect())
    }

    async fn add_address(&self, link: &Link, address: Ipv4Net) -> Result<()> {
        self.handle
            .address()
            .add(link.index, IpAddr::V4(address.addr()), address.prefix_len())
            .execute()
            .await
            .map_err(|e| Error::kernel(format!("adding {} to {}: {}", address, link.name, e)))
    }

    async fn delete_address(&self, link: &Link, address: Ipv4Net) -> Result<()> {
        // Delete with the kernel's own message so peer/flags match exactly
        let message = self
            .address_messages(link)
            .await?
            .into_iter()
            .find(|m| ipv4_network(m) == Some(address))
            .ok_or_else(|| {
                Error::kernel(format!("removing {} from {}: address not present", address, link.name))
            })?;

        self.handle
            .address()
            .del(message)
            .execute()
            .await
            .map_err(|e| Error::kernel(format!("removing {} from {}: {}", address, link.name, e)))
    }

    async fn watch(&self) -> Result<AddressStream> {
        let (mut connection, handle, mut messages) = rtnetlink::new_connection()
            .map_err(|e| Error::kernel(format!("failed to open netlink socket: {}", e)))?;

        let groups = libc::RTMGRP_IPV4_IFADDR as u32;
        connection
            .socket_mut()
            .socket_mut()
            .bind(&SocketAddr::new(0, groups))
            .map_err(|e| Error::kernel(format!("failed to subscribe to address changes: {}", e)))?;

        let connection = tokio::spawn(connection);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // Keeps the connection's request side open for the stream's lifetime
            let _handle = handle;

            loop {
                tokio::select! {
                    _ = tx.closed() => break,

                    next = messages.next() => {
                        let Some((message, _)) = next else { break };
                        let Some(event) = address_event(message) else { continue };
                        trace!(?event, "netlink address notification");
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                }
            }

            connection.abort();
            debug!("address change subscription closed");
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

fn lookup_error(err: rtnetlink::Error, what: &str) -> Error {
    match err {
        rtnetlink::Error::NetlinkError(ref msg)
            if msg.code.map(|c| c.get()) == Some(-libc::ENODEV) =>
        {
            Error::not_found(what.to_string())
        }
        other => Error::kernel(format!("looking up {}: {}", what, other)),
    }
}

fn link_from_message(msg: &LinkMessage) -> Option<Link> {
    let name = msg.attributes.iter().find_map(|a| match a {
        LinkAttribute::IfName(name) => Some(name.clone()),
        _ => None,
    })?;

    Some(Link::new(msg.header.index, name))
}

/// IPv4 network carried by an address message, IFA_LOCAL first
fn ipv4_network(msg: &AddressMessage) -> Option<Ipv4Net> {
    if msg.header.family != AddressFamily::Inet {
        return None;
    }

    let local = msg.attributes.iter().find_map(|a| match a {
        AddressAttribute::Local(IpAddr::V4(ip)) => Some(*ip),
        _ => None,
    });
    let address = msg.attributes.iter().find_map(|a| match a {
        AddressAttribute::Address(IpAddr::V4(ip)) => Some(*ip),
        _ => None,
    });

    Ipv4Net::new(local.or(address)?, msg.header.prefix_len).ok()
}

fn address_event(message: NetlinkMessage<RouteNetlinkMessage>) -> Option<AddressChangeEvent> {
    let (msg, added) = match message.payload {
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewAddress(msg)) => (msg, true),
        NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelAddress(msg)) => (msg, false),
        _ => return None,
    };

    let network = ipv4_network(&msg)?;
    Some(AddressChangeEvent {
        link_index: msg.header.index,
        network,
        added,
    })
}
