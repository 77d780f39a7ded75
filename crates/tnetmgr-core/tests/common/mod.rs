//! Test doubles and common utilities for contract tests
//!
//! [`MockKernel`] keeps links and address tables in memory and records every
//! mutation, so tests can assert on exactly what the reconciler did.

#![allow(dead_code)]

use ipnet::Ipv4Net;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tnetmgr_core::error::{Error, Result};
use tnetmgr_core::traits::{AddressChangeEvent, AddressStream, Kernel, Link};
use tnetmgr_core::{EngineEvent, ManagedInterface};
use tokio::sync::mpsc;

/// Index of the managed interface in tests
pub const TAILSCALE0: u32 = 7;

/// Index of an unrelated interface in tests
pub const ETH0: u32 = 2;

#[derive(Default)]
struct KernelState {
    links: Vec<Link>,
    addresses: HashMap<u32, Vec<Ipv4Net>>,
    added: Vec<Ipv4Net>,
    deleted: Vec<Ipv4Net>,
    add_calls: usize,
    fail_add_call: Option<usize>,
    fail_delete: bool,
    fail_list: bool,
    fail_index_lookup: bool,
    fail_watch: bool,
}

/// In-memory kernel with scripted failures
pub struct MockKernel {
    state: Mutex<KernelState>,
    event_tx: Mutex<Option<mpsc::UnboundedSender<AddressChangeEvent>>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<AddressChangeEvent>>>,
}

impl MockKernel {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(KernelState::default()),
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// A kernel with `tailscale0` (index 7) and `eth0` (index 2)
    pub fn with_tailscale0() -> Self {
        let kernel = Self::new();
        kernel.add_link(TAILSCALE0, "tailscale0");
        kernel.add_link(ETH0, "eth0");
        kernel
    }

    pub fn add_link(&self, index: u32, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.links.push(Link::new(index, name));
        state.addresses.entry(index).or_default();
    }

    pub fn remove_link(&self, index: u32) {
        let mut state = self.state.lock().unwrap();
        state.links.retain(|l| l.index != index);
        state.addresses.remove(&index);
    }

    /// Replace the address table of a link without recording a mutation
    pub fn set_addresses(&self, index: u32, addresses: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .addresses
            .insert(index, nets(addresses));
    }

    pub fn addresses(&self, index: u32) -> Vec<Ipv4Net> {
        self.state
            .lock()
            .unwrap()
            .addresses
            .get(&index)
            .cloned()
            .unwrap_or_default()
    }

    /// Addresses added through the Kernel trait, in call order
    pub fn added(&self) -> Vec<Ipv4Net> {
        self.state.lock().unwrap().added.clone()
    }

    /// Addresses deleted through the Kernel trait, in call order
    pub fn deleted(&self) -> Vec<Ipv4Net> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn mutation_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.added.len() + state.deleted.len()
    }

    /// Make the n-th (1-based) add_address call fail
    pub fn fail_add_call(&self, n: usize) {
        self.state.lock().unwrap().fail_add_call = Some(n);
    }

    pub fn fail_deletes(&self) {
        self.state.lock().unwrap().fail_delete = true;
    }

    pub fn fail_lists(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    /// Make link lookups by index fail with a kernel error
    pub fn fail_index_lookups(&self) {
        self.state.lock().unwrap().fail_index_lookup = true;
    }

    pub fn fail_watch(&self) {
        self.state.lock().unwrap().fail_watch = true;
    }

    /// Deliver a notification to the subscriber
    pub fn notify(&self, event: AddressChangeEvent) {
        self.event_tx
            .lock()
            .unwrap()
            .as_ref()
            .expect("events not closed")
            .send(event)
            .expect("subscriber alive");
    }

    /// End the notification stream from the kernel side
    pub fn close_events(&self) {
        self.event_tx.lock().unwrap().take();
    }

    fn link(&self, pred: impl Fn(&Link) -> bool, what: String) -> Result<Link> {
        self.state
            .lock()
            .unwrap()
            .links
            .iter()
            .find(|l| pred(l))
            .cloned()
            .ok_or_else(|| Error::not_found(what))
    }
}

#[async_trait::async_trait]
impl Kernel for MockKernel {
    async fn link_by_name(&self, name: &str) -> Result<Link> {
        self.link(|l| l.name == name, name.to_string())
    }

    async fn link_by_index(&self, index: u32) -> Result<Link> {
        if self.state.lock().unwrap().fail_index_lookup {
            return Err(Error::kernel("get link: no buffer space available"));
        }
        self.link(|l| l.index == index, format!("index {}", index))
    }

    async fn list_addresses(&self, link: &Link) -> Result<Vec<Ipv4Net>> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(Error::kernel("list: operation not permitted"));
        }
        state
            .addresses
            .get(&link.index)
            .cloned()
            .ok_or_else(|| Error::not_found(link.name.clone()))
    }

    async fn add_address(&self, link: &Link, address: Ipv4Net) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.add_calls += 1;
        if state.fail_add_call == Some(state.add_calls) {
            return Err(Error::kernel("add: operation not permitted"));
        }
        let table = state.addresses.entry(link.index).or_default();
        if table.contains(&address) {
            return Err(Error::kernel("add: file exists"));
        }
        table.push(address);
        state.added.push(address);
        Ok(())
    }

    async fn delete_address(&self, link: &Link, address: Ipv4Net) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(Error::kernel("delete: operation not permitted"));
        }
        let table = state.addresses.entry(link.index).or_default();
        let Some(pos) = table.iter().position(|a| *a == address) else {
            return Err(Error::kernel("delete: cannot assign requested address"));
        };
        table.remove(pos);
        state.deleted.push(address);
        Ok(())
    }

    async fn watch(&self) -> Result<AddressStream> {
        if self.state.lock().unwrap().fail_watch {
            return Err(Error::kernel("subscribe: protocol not supported"));
        }

        let rx = self
            .event_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");

        Ok(Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)))
    }
}

pub fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

pub fn nets(list: &[&str]) -> Vec<Ipv4Net> {
    list.iter().map(|s| net(s)).collect()
}

/// `tailscale0` declaring the given addresses, hooks run through /bin/sh
pub fn managed(addresses: &[&str]) -> ManagedInterface {
    ManagedInterface::new("tailscale0", nets(addresses))
        .with_shell("/bin/sh -c")
        .with_hook_timeout(Duration::from_secs(5))
}

/// Wait for the next engine event matching `pred`, discarding others
pub async fn wait_for(
    rx: &mut mpsc::Receiver<EngineEvent>,
    pred: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("engine event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected engine event within 5 seconds")
}
