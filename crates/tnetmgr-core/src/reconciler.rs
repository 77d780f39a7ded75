//! Address reconciliation
//!
//! The [`Reconciler`] brings the kernel's address table for the managed
//! interface in line with the declared set:
//!
//! - [`Reconciler::set_up`]: add every declared address that is missing, then run ExecUp
//! - [`Reconciler::set_down`]: remove every declared address that is present, then run ExecDown
//! - [`Reconciler::is_up`]: whether the link carries any tailnet address
//! - [`Reconciler::sync`]: one-shot startup pass choosing between the two
//!
//! Addresses that were not declared are never touched. Kernel failures abort
//! the call immediately with no rollback; hook failures are only logged.

use ipnet::Ipv4Net;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::is_tailnet_address;
use crate::config::ManagedInterface;
use crate::error::{Error, Result};
use crate::hooks::{HookPhase, HookRunner};
use crate::traits::{Kernel, Link};

/// Outcome of a startup sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Interface does not exist yet; nothing was done
    Missing,
    /// Interface was up; SetUp ran
    Up,
    /// Interface was down; SetDown ran
    Down,
}

/// Reconciles one interface's addresses against its declaration
pub struct Reconciler {
    kernel: Arc<dyn Kernel>,
    interface: Arc<ManagedInterface>,
    hooks: HookRunner,
}

impl Reconciler {
    pub fn new(kernel: Arc<dyn Kernel>, interface: Arc<ManagedInterface>) -> Self {
        let hooks = HookRunner::new(&interface.exec_shell, interface.hook_timeout);
        Self {
            kernel,
            interface,
            hooks,
        }
    }

    /// The declared interface
    pub fn interface(&self) -> &ManagedInterface {
        &self.interface
    }

    /// The kernel backend
    pub fn kernel(&self) -> &dyn Kernel {
        self.kernel.as_ref()
    }

    /// Resolve the managed interface by name
    pub async fn resolve(&self) -> Result<Link> {
        self.kernel.link_by_name(&self.interface.name).await
    }

    /// Whether the managed interface currently exists
    pub async fn exists(&self) -> bool {
        self.kernel.link_exists(&self.interface.name).await
    }

    /// Whether `link` carries at least one address in the tailnet range
    ///
    /// This is independent of the link's administrative state.
    pub async fn is_up(&self, link: &Link) -> Result<bool> {
        let addresses = self.kernel.list_addresses(link).await?;
        Ok(addresses.iter().any(is_tailnet_address))
    }

    /// Add all missing declared addresses, then run the up hooks
    pub async fn set_up(&self, link: &Link) -> Result<()> {
        self.check_link(link)?;

        let current = self.kernel.list_addresses(link).await?;

        for address in missing(&self.interface.addresses, &current) {
            debug!(interface = %link.name, %address, "adding address");
            self.kernel.add_address(link, address).await?;
            info!(interface = %link.name, %address, "added address");
        }

        self.run_hooks(HookPhase::Up, &self.interface.exec_up).await;
        Ok(())
    }

    /// Remove all present declared addresses, then run the down hooks
    pub async fn set_down(&self, link: &Link) -> Result<()> {
        self.check_link(link)?;

        let current = self.kernel.list_addresses(link).await?;

        for address in present(&self.interface.addresses, &current) {
            debug!(interface = %link.name, %address, "removing address");
            self.kernel.delete_address(link, address).await?;
            info!(interface = %link.name, %address, "removed address");
        }

        self.run_hooks(HookPhase::Down, &self.interface.exec_down).await;
        Ok(())
    }

    /// Bring the interface into the state its current addresses imply
    ///
    /// Runs once before the event loop to make up for changes missed while
    /// the process was not running. A missing interface is not an error:
    /// the tunnel daemon may simply not have created it yet.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let link = match self.resolve().await {
            Ok(link) => link,
            // Only a missing link is "nothing to do"; socket failures stay fatal
            Err(e) if e.is_not_found() => {
                warn!(interface = %self.interface.name, "could not sync; interface does not exist yet");
                return Ok(SyncOutcome::Missing);
            }
            Err(e) => return Err(e),
        };

        if self.is_up(&link).await? {
            debug!(interface = %link.name, "interface is up, syncing");
            self.set_up(&link).await?;
            Ok(SyncOutcome::Up)
        } else {
            debug!(interface = %link.name, "interface is down, syncing");
            self.set_down(&link).await?;
            Ok(SyncOutcome::Down)
        }
    }

    fn check_link(&self, link: &Link) -> Result<()> {
        if link.name != self.interface.name {
            return Err(Error::link_mismatch(&self.interface.name, &link.name));
        }
        Ok(())
    }

    async fn run_hooks(&self, phase: HookPhase, commands: &[String]) {
        if commands.is_empty() {
            return;
        }

        let failed = self.hooks.run_all(phase, commands).await;
        if failed > 0 {
            warn!(%phase, failed, total = commands.len(), "some hook commands failed");
        }
    }
}

/// Declared addresses absent from `current`, in declared order
fn missing(declared: &[Ipv4Net], current: &[Ipv4Net]) -> Vec<Ipv4Net> {
    declared
        .iter()
        .filter(|a| !current.contains(a))
        .copied()
        .collect()
}

/// Declared addresses present in `current`, in declared order
fn present(declared: &[Ipv4Net], current: &[Ipv4Net]) -> Vec<Ipv4Net> {
    declared
        .iter()
        .filter(|a| current.contains(a))
        .copied()
        .collect()
}
