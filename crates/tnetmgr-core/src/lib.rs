// # tnetmgr-core
//
// Core library for keeping a tailnet interface's IPv4 addresses in sync with
// a declared set.
//
// ## Architecture Overview
//
// - **Kernel**: Trait for the kernel networking boundary (links, addresses, events)
// - **Reconciler**: Diffs declared vs. live addresses and applies the minimal changes
// - **HookRunner**: Runs the configured up/down shell commands, best-effort
// - **TnetEngine**: Startup sync plus the event loop that drives the reconciler
//
// ## Design Principles
//
// 1. **Kernel is authoritative**: Addresses and links are re-read on every operation
// 2. **Event-Driven**: Address notifications arrive as an async stream
// 3. **Fail-fast on kernel errors, fail-soft on hooks**
// 4. **Library-First**: The daemon is a thin layer over this crate

pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod reconciler;
pub mod traits;

// Re-export core types for convenience
pub use classifier::is_tailnet_address;
pub use config::{ManagedInterface, TnetConfig};
pub use engine::{EngineEvent, SkipReason, TnetEngine};
pub use error::{Error, Result};
pub use hooks::{HookPhase, HookRunner};
pub use reconciler::{Reconciler, SyncOutcome};
pub use traits::{AddressChangeEvent, AddressStream, Kernel, Link};
