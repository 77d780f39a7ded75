//! tnetmgr engine
//!
//! The TnetEngine is responsible for:
//! - Running the startup sync
//! - Watching kernel address notifications
//! - Filtering out events that are not ours to act on
//! - Driving the reconciler (SetUp / SetDown) for the rest
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   Kernel    │─── AddressChangeEvent ───┐
//! └─────────────┘                          │
//!                                          ▼
//!                                 ┌──────────────┐
//!                                 │  TnetEngine  │
//!                                 └──────────────┘
//!                                          │
//!                    ┌─────────────────────┴─────────────────────┐
//!                    │                                           │
//!                    ▼                                           ▼
//!            ┌──────────────┐                            ┌─────────────┐
//!            │  Reconciler  │                            │   Events    │
//!            │ (up / down)  │                            │  (notify)   │
//!            └──────────────┘                            └─────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Address change received
//! 2. Resolve the link index; skip if it is gone or not the managed interface,
//!    fail on any other lookup error
//! 3. Skip addresses we declared ourselves, then non-tailnet addresses
//! 4. Added → SetUp, removed → SetDown
//! 5. Kernel errors end the loop; the daemon exits

use ipnet::Ipv4Net;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::classifier::is_tailnet_address;
use crate::config::ManagedInterface;
use crate::error::{Error, Result};
use crate::reconciler::{Reconciler, SyncOutcome};
use crate::traits::{AddressChangeEvent, Kernel};

/// Capacity of the monitoring event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Why an address notification was not acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The link index no longer exists
    UnknownLink,
    /// The address belongs to a different interface
    ForeignLink,
    /// The address is one we declared (likely our own change)
    Managed,
    /// The address is outside the tailnet range
    NotTailnet,
}

/// Events emitted by the TnetEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Startup sync finished
    Synced { outcome: SyncOutcome },

    /// Subscribed and processing notifications
    Started { interface: String },

    /// Notification ignored
    EventSkipped { network: Ipv4Net, reason: SkipReason },

    /// A tailnet address appeared and SetUp completed
    LinkUp { network: Ipv4Net },

    /// A tailnet address disappeared and SetDown completed
    LinkDown { network: Ipv4Net },

    /// Event loop ended
    Stopped { reason: String },
}

/// Core tnetmgr engine
///
/// Processes one notification at a time, hooks included, before reading the
/// next. Unread notifications queue in the kernel subscription.
///
/// ## Lifecycle
///
/// 1. Create with [`TnetEngine::new()`]
/// 2. Call [`TnetEngine::sync()`] once
/// 3. Call [`TnetEngine::run()`]; it returns on shutdown or fatal error
pub struct TnetEngine {
    reconciler: Reconciler,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl TnetEngine {
    /// Create a new engine
    ///
    /// Returns the engine and a receiver of [`EngineEvent`]s.
    pub fn new(
        kernel: Arc<dyn Kernel>,
        interface: ManagedInterface,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let engine = Self {
            reconciler: Reconciler::new(kernel, Arc::new(interface)),
            event_tx: tx,
        };

        (engine, rx)
    }

    /// The reconciler driven by this engine
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Startup reconciliation
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let outcome = self.reconciler.sync().await?;
        debug!(interface = %self.reconciler.interface().name, ?outcome, "synced");
        self.emit_event(EngineEvent::Synced { outcome });
        Ok(outcome)
    }

    /// Run the event loop until `shutdown` fires (or its sender is dropped)
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Subscription failure or a kernel error during reconciliation
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut events = self.reconciler.kernel().watch().await?;
        debug!("subscribed to netlink address packets");

        let name = self.reconciler.interface().name.clone();
        info!(interface = %name, "READY listening to address changes on interface");
        self.emit_event(EngineEvent::Started { interface: name });

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(EngineEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }

                next = events.next() => {
                    let Some(event) = next else {
                        self.emit_event(EngineEvent::Stopped {
                            reason: "Subscription closed".to_string(),
                        });
                        return Err(Error::kernel("address change subscription closed"));
                    };

                    if let Err(e) = self.handle_event(event).await {
                        self.emit_event(EngineEvent::Stopped {
                            reason: e.to_string(),
                        });
                        return Err(e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single address notification
    async fn handle_event(&self, event: AddressChangeEvent) -> Result<()> {
        let network = event.network;
        debug!(link_index = event.link_index, %network, added = event.added, "update received");

        let link = match self.reconciler.kernel().link_by_index(event.link_index).await {
            Ok(link) => link,
            Err(e) if e.is_not_found() => {
                warn!(link_index = event.link_index, error = %e, "could not resolve updated link, skipping");
                self.skip(network, SkipReason::UnknownLink);
                return Ok(());
            }
            Err(e) => {
                error!(link_index = event.link_index, "failed to resolve updated link: {}", e);
                return Err(e);
            }
        };

        let interface = self.reconciler.interface();

        if link.name != interface.name {
            debug!(interface = %link.name, %network, "update on another interface, skipping");
            self.skip(network, SkipReason::ForeignLink);
            return Ok(());
        }

        if interface.declares_ip(&network) {
            debug!(address = %network, "address managed by tnetmgr, skipping");
            self.skip(network, SkipReason::Managed);
            return Ok(());
        }

        if !is_tailnet_address(&network) {
            debug!(address = %network, "update was not a Tailscale address");
            self.skip(network, SkipReason::NotTailnet);
            return Ok(());
        }

        if event.added {
            debug!(address = %network, "update was adding a Tailscale address; setting link up");
            self.reconciler.set_up(&link).await.inspect_err(|e| {
                error!("failed to register link up: {}", e);
            })?;
            info!(interface = %link.name, "link set up");
            self.emit_event(EngineEvent::LinkUp { network });
        } else {
            debug!(address = %network, "update was deleting a Tailscale address; setting link down");
            self.reconciler.set_down(&link).await.inspect_err(|e| {
                error!("failed to register link down: {}", e);
            })?;
            info!(interface = %link.name, "link set down");
            self.emit_event(EngineEvent::LinkDown { network });
        }

        Ok(())
    }

    fn skip(&self, network: Ipv4Net, reason: SkipReason) {
        self.emit_event(EngineEvent::EventSkipped { network, reason });
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Nobody listening is fine; a full channel means a slow consumer
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!("Event channel full, dropping engine event");
        }
    }
}
