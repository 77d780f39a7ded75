//! Configuration types for tnetmgr
//!
//! [`TnetConfig`] is the on-disk shape (`config.json`). [`TnetConfig::resolve`]
//! validates it and produces the immutable [`ManagedInterface`] that the
//! reconciler and engine are built from.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Main tnetmgr configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TnetConfig {
    /// Interface to manage
    #[serde(default = "default_iface")]
    pub iface: String,

    /// Addresses (CIDR notation) to keep on the interface while it is up
    #[serde(default)]
    pub addrs: Vec<String>,

    /// Shell invocation template; each hook is appended as the final argument
    #[serde(default = "default_exec_shell")]
    pub exec_shell: String,

    /// Commands run after the interface comes up
    #[serde(default)]
    pub exec_up: Vec<String>,

    /// Commands run after the interface goes down
    #[serde(default)]
    pub exec_down: Vec<String>,

    /// Upper bound on a single hook's runtime (in seconds)
    #[serde(default = "default_hook_timeout_secs")]
    pub hook_timeout_secs: u64,
}

impl TnetConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            iface: default_iface(),
            addrs: Vec::new(),
            exec_shell: default_exec_shell(),
            exec_up: Vec::new(),
            exec_down: Vec::new(),
            hook_timeout_secs: default_hook_timeout_secs(),
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, crate::Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::config(format!("could not read config file {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.iface.trim().is_empty() {
            return Err(crate::Error::config("parsing config iface: iface cannot be empty"));
        }

        let has_hooks = !self.exec_up.is_empty() || !self.exec_down.is_empty();
        if has_hooks && self.exec_shell.split_whitespace().next().is_none() {
            return Err(crate::Error::config(
                "exec_shell cannot be empty when hooks are configured",
            ));
        }

        if self.hook_timeout_secs == 0 {
            return Err(crate::Error::config("hook_timeout_secs must be > 0"));
        }

        Ok(())
    }

    /// Validate and parse into the runtime representation
    pub fn resolve(&self) -> Result<ManagedInterface, crate::Error> {
        self.validate()?;

        let addresses = self
            .addrs
            .iter()
            .map(|s| parse_address(s))
            .collect::<Result<Vec<_>, _>>()?;

        for (i, address) in addresses.iter().enumerate() {
            if addresses[..i].contains(address) {
                return Err(crate::Error::config(format!(
                    "parsing config addrs: {} is listed more than once",
                    address
                )));
            }
        }

        Ok(ManagedInterface {
            name: self.iface.trim().to_string(),
            addresses,
            exec_shell: self.exec_shell.clone(),
            exec_up: self.exec_up.clone(),
            exec_down: self.exec_down.clone(),
            hook_timeout: Duration::from_secs(self.hook_timeout_secs),
        })
    }
}

impl Default for TnetConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The interface under management, as declared at startup
///
/// Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInterface {
    /// Interface name
    pub name: String,
    /// Declared addresses, in configuration order
    pub addresses: Vec<Ipv4Net>,
    /// Shell invocation template (e.g. "/usr/bin/bash -c")
    pub exec_shell: String,
    /// Up hooks
    pub exec_up: Vec<String>,
    /// Down hooks
    pub exec_down: Vec<String>,
    /// Per-hook timeout
    pub hook_timeout: Duration,
}

impl ManagedInterface {
    /// A managed interface with no hooks
    pub fn new(name: impl Into<String>, addresses: Vec<Ipv4Net>) -> Self {
        Self {
            name: name.into(),
            addresses,
            exec_shell: default_exec_shell(),
            exec_up: Vec::new(),
            exec_down: Vec::new(),
            hook_timeout: Duration::from_secs(default_hook_timeout_secs()),
        }
    }

    /// Set the shell template
    pub fn with_shell(mut self, exec_shell: impl Into<String>) -> Self {
        self.exec_shell = exec_shell.into();
        self
    }

    /// Set the up hooks
    pub fn with_up_hooks(mut self, hooks: Vec<String>) -> Self {
        self.exec_up = hooks;
        self
    }

    /// Set the down hooks
    pub fn with_down_hooks(mut self, hooks: Vec<String>) -> Self {
        self.exec_down = hooks;
        self
    }

    /// Set the per-hook timeout
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Whether `network` carries the same IP as one of the declared addresses
    pub fn declares_ip(&self, network: &Ipv4Net) -> bool {
        self.addresses.iter().any(|a| a.addr() == network.addr())
    }
}

fn parse_address(s: &str) -> Result<Ipv4Net, crate::Error> {
    let s = s.trim();
    match s.parse::<ipnet::IpNet>() {
        Ok(ipnet::IpNet::V4(net)) => Ok(net),
        Ok(ipnet::IpNet::V6(_)) => Err(crate::Error::config(format!(
            "parsing config addrs: {} is not an IPv4 address",
            s
        ))),
        Err(e) => {
            // A bare IPv6 address still gets the more useful message
            if let Ok(IpAddr::V6(_)) = s.parse::<IpAddr>() {
                return Err(crate::Error::config(format!(
                    "parsing config addrs: {} is not an IPv4 address",
                    s
                )));
            }
            Err(crate::Error::config(format!(
                "parsing config addrs: invalid CIDR address {:?}: {}",
                s, e
            )))
        }
    }
}

fn default_iface() -> String {
    "tailscale0".to_string()
}

fn default_exec_shell() -> String {
    "/usr/bin/bash -c".to_string()
}

fn default_hook_timeout_secs() -> u64 {
    30
}
