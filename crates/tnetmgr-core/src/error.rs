//! Error types for tnetmgr
//!
//! Kernel-state errors are fail-fast; hook errors never leave the hook runner
//! except as log lines.

use thiserror::Error;

/// Result type alias for tnetmgr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tnetmgr
#[derive(Error, Debug)]
pub enum Error {
    /// The resolved link is not the interface we manage
    #[error("got interface {actual}, expected {expected}")]
    LinkMismatch {
        /// Declared interface name
        expected: String,
        /// Name of the link that was passed in
        actual: String,
    },

    /// A list/add/delete/subscribe call against the kernel failed
    #[error("Kernel operation failed: {0}")]
    Kernel(String),

    /// Link does not exist
    #[error("Link not found: {0}")]
    NotFound(String),

    /// Hook command exited non-zero, failed to launch, or timed out
    #[error("Hook execution failed: {0}")]
    Hook(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (config file, process spawning)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a link mismatch error
    pub fn link_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::LinkMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a kernel operation error
    pub fn kernel(msg: impl Into<String>) -> Self {
        Self::Kernel(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a hook execution error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the link does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
