// # tnetmgrd - tailnet interface manager daemon
//
// The tnetmgrd daemon is a thin integration layer. It is responsible for:
// 1. Reading settings from the environment and the JSON config file
// 2. Initializing logging and the runtime
// 3. Connecting the netlink backend
// 4. Running the startup sync, then the event loop until SIGINT/SIGTERM
//
// All reconciliation logic lives in tnetmgr-core.
//
// ## Configuration
//
// ### Environment
// - `TNETMGR_CONFIG_DIR`: Directory holding `config.json` (default: /etc/tnetmgr)
// - `TNETMGR_LOGLEVEL`: trace, debug, info, warn or error (default: info)
//
// ### config.json
// - `iface`: Interface to manage (default: tailscale0)
// - `addrs`: IPv4 addresses in CIDR notation to keep on the interface while it is up
// - `exec_shell`: Shell template for hooks (default: "/usr/bin/bash -c")
// - `exec_up` / `exec_down`: Hook commands run on each transition
// - `hook_timeout_secs`: Per-hook timeout (default: 30)
//
// ## Example
//
// ```json
// {
//   "iface": "tailscale0",
//   "addrs": ["100.70.0.5/32"],
//   "exec_up": ["systemctl start my-tailnet-service"],
//   "exec_down": ["systemctl stop my-tailnet-service"]
// }
// ```

use anyhow::{Context, Result};
use std::env;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tnetmgr_core::{Kernel, ManagedInterface, TnetConfig, TnetEngine};
use tnetmgr_netlink::NetlinkKernel;
use tokio::sync::oneshot;
use tracing::{Level, debug, error, info, trace};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

const DEFAULT_CONFIG_DIR: &str = "/etc/tnetmgr";
const CONFIG_FILE_NAME: &str = "config.json";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error (including the startup sync)
/// - 2: Runtime error (event loop failure)
#[derive(Debug, Clone, Copy)]
enum TnetExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (kernel failure, lost subscription)
    RuntimeError = 2,
}

impl From<TnetExitCode> for ExitCode {
    fn from(code: TnetExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Process-level settings taken from the environment
#[derive(Debug)]
struct Settings {
    config_dir: PathBuf,
    log_level: Level,
}

impl Settings {
    /// Load settings from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_dir = lookup("TNETMGR_CONFIG_DIR")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_DIR.to_string());

        let level = lookup("TNETMGR_LOGLEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            config_dir: PathBuf::from(config_dir),
            log_level: parse_log_level(&level)?,
        })
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "invalid log level given: {}, expected one of trace, debug, info, warn, error",
            level
        ),
    }
}

/// Read, validate and resolve the config file
fn load_interface(settings: &Settings) -> Result<ManagedInterface> {
    let path = settings.config_path();
    let config = TnetConfig::load(&path)?;
    let managed = config
        .resolve()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(managed)
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return TnetExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(settings.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return TnetExitCode::ConfigError.into();
    }

    debug!("initialising");

    let interface = match load_interface(&settings) {
        Ok(interface) => interface,
        Err(e) => {
            error!("{:#}", e);
            return TnetExitCode::ConfigError.into();
        }
    };

    // One event at a time, end to end: a single-threaded runtime is enough
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return TnetExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(interface).await {
            Ok(()) => TnetExitCode::CleanShutdown,
            Err(failure) => {
                error!("{:#}", failure.error());
                failure.exit_code()
            }
        }
    });

    result.into()
}

/// Why the daemon stopped before a clean shutdown
#[derive(Debug)]
enum Failure {
    /// Connecting, signal setup or the startup sync failed
    Startup(anyhow::Error),
    /// The event loop ended with an error
    Runtime(anyhow::Error),
}

impl Failure {
    fn exit_code(&self) -> TnetExitCode {
        match self {
            Failure::Startup(_) => TnetExitCode::ConfigError,
            Failure::Runtime(_) => TnetExitCode::RuntimeError,
        }
    }

    fn error(&self) -> &anyhow::Error {
        match self {
            Failure::Startup(e) | Failure::Runtime(e) => e,
        }
    }
}

fn log_interface(interface: &ManagedInterface) {
    info!(name = %interface.name, "using interface name");

    if interface.addresses.is_empty() {
        info!("no addresses to manage");
    } else {
        for address in &interface.addresses {
            info!(%address, "managing");
        }
    }

    info!(count = interface.exec_up.len(), "registered ExecUp commands");
    info!(count = interface.exec_down.len(), "registered ExecDown commands");
}

/// Run the daemon
async fn run_daemon(interface: ManagedInterface) -> std::result::Result<(), Failure> {
    log_interface(&interface);

    let kernel = NetlinkKernel::connect()
        .context("failed to connect to netlink")
        .map_err(Failure::Startup)?;
    let signals = ShutdownSignals::install().map_err(Failure::Startup)?;
    let engine = start(Arc::new(kernel), interface).await?;

    serve(&engine, signals.recv()).await?;

    info!("Shutting down daemon");
    Ok(())
}

/// Build the engine and run the startup sync
async fn start(
    kernel: Arc<dyn Kernel>,
    interface: ManagedInterface,
) -> std::result::Result<TnetEngine, Failure> {
    let name = interface.name.clone();
    let (engine, mut events) = TnetEngine::new(kernel, interface);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            trace!(?event, "engine event");
        }
    });

    debug!(interface = %name, "syncing interface");
    engine
        .sync()
        .await
        .with_context(|| format!("failed to sync iface {}", name))
        .map_err(Failure::Startup)?;

    Ok(engine)
}

/// Run the event loop until a shutdown signal arrives or the loop fails
async fn serve(
    engine: &TnetEngine,
    shutdown: impl Future<Output = Result<&'static str>>,
) -> std::result::Result<(), Failure> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let run = engine.run(shutdown_rx);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,

        signal = shutdown => {
            let signal = signal.map_err(Failure::Runtime)?;
            info!("Received shutdown signal: {}", signal);
            let _ = shutdown_tx.send(());
            run.await
        }
    };

    result
        .context("address change event loop failed")
        .map_err(Failure::Runtime)
}

/// SIGTERM and SIGINT handlers, installed up front so a setup failure
/// surfaces before the event loop starts
#[cfg(unix)]
struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
        Ok(Self { sigterm, sigint })
    }

    /// Wait for a signal; returns its name
    async fn recv(mut self) -> Result<&'static str> {
        let signal = tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        };
        Ok(signal)
    }
}

/// CTRL-C only, for non-Unix platforms
#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> Result<&'static str> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
        Ok("SIGINT")
    }
}
