//! Error taxonomy for install orchestration.
//!
//! Every fallible operation in the library returns [`Result`]. Cleanup paths
//! never surface their own failures; they go through [`BestEffort`] instead so
//! the error that triggered the cleanup is the one the caller sees.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A result type using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while preparing, installing or inspecting a guest.
#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported architecture, disk bus, mouse type or malformed config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The host is missing something every install needs (bridge network, tools).
    #[error("environment error: {0}")]
    Environment(String),

    /// A spawned helper exited non-zero.
    #[error("'{command}' failed ({}): {output}", exit_label(.code))]
    ExternalTool {
        command: String,
        /// `None` when the process was killed by a signal.
        code: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },

    /// Install media could not be fetched or is unusable.
    #[error("media error for {}: {reason}", .path.display())]
    Media { path: PathBuf, reason: String },

    /// The installer never powered the guest off.
    #[error("timed out waiting for {name} to finish installing after {polls} polls")]
    InstallTimeout { name: String, polls: u32 },

    /// The installed guest never connected back.
    #[error("timed out after {}s waiting for guest to connect on port {port}", .timeout.as_secs())]
    BootTimeout { port: u16, timeout: Duration },

    /// The disk image is attached to a running domain.
    #[error("disk {} is in use by running domain {domain}", .disk.display())]
    Conflict { disk: PathBuf, domain: String },

    /// The introspection backend could not make sense of the disk.
    #[error("inspection error: {0}")]
    Inspection(String),

    /// A domain or network descriptor could not be encoded or decoded.
    #[error("descriptor error: {0}")]
    Descriptor(String),

    /// A caller tripped the session's cancel token.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

impl Error {
    pub(crate) fn media(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Media {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Log-and-discard for cleanup steps whose failure must not mask the primary
/// outcome.
pub trait BestEffort<T> {
    /// Returns the value on success; logs `what` at warn level on failure.
    fn best_effort(self, what: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> BestEffort<T> for std::result::Result<T, E> {
    fn best_effort(self, what: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{what} failed; continuing");
                None
            }
        }
    }
}
