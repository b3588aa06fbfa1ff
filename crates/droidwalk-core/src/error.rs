//! Error types with attempt/run classification

use std::path::PathBuf;
use thiserror::Error;

use crate::types::FailureCause;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Required tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("Device {serial}: {message}")]
    Device { serial: String, message: String },

    #[error("Failed to install {package} on {serial}")]
    InstallFailed { serial: String, package: String },

    #[error("Package {expected} is not in the foreground on {serial} (found {found:?})")]
    NotForeground {
        serial: String,
        expected: String,
        found: Option<String>,
    },

    #[error("UI hierarchy parse error: {message}")]
    Hierarchy { message: String },

    #[error("Package inspection failed for {path}: {message}")]
    Inspect { path: PathBuf, message: String },

    // ─────────────────────────────────────────────────────────────
    // Run Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Attempt timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("No devices connected")]
    NoDevices,

    #[error("Invalid leader device selected: {choice}")]
    InvalidLeader { choice: String },

    #[error("No applications found in: {path}")]
    NoApplications { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn device(serial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Device {
            serial: serial.into(),
            message: message.into(),
        }
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    pub fn install_failed(serial: impl Into<String>, package: impl Into<String>) -> Self {
        Self::InstallFailed {
            serial: serial.into(),
            package: package.into(),
        }
    }

    pub fn not_foreground(
        serial: impl Into<String>,
        expected: impl Into<String>,
        found: Option<String>,
    ) -> Self {
        Self::NotForeground {
            serial: serial.into(),
            expected: expected.into(),
            found,
        }
    }

    pub fn hierarchy(message: impl Into<String>) -> Self {
        Self::Hierarchy {
            message: message.into(),
        }
    }

    pub fn inspect(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Inspect {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// A device command failed but re-querying device state may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Device { .. } | Error::Hierarchy { .. } | Error::Io(_)
        )
    }

    /// Aborts only the current attempt; the run continues with the next one
    pub fn is_attempt_fatal(&self) -> bool {
        matches!(
            self,
            Error::NotForeground { .. }
                | Error::Timeout { .. }
                | Error::InstallFailed { .. }
                | Error::Inspect { .. }
        )
    }

    /// Aborts the whole process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoDevices
                | Error::InvalidLeader { .. }
                | Error::NoApplications { .. }
                | Error::ToolNotFound { .. }
                | Error::ConfigInvalid { .. }
        )
    }

    /// The failure-taxonomy entry this error maps onto, if any
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            Error::NotForeground { .. } => Some(FailureCause::NotForeground),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
