//! Error types for platform access and update runs

use std::io;
use std::path::PathBuf;

use fwutil_image::{ConfigError, FormatError};
use thiserror::Error;

use crate::state::{FailureReason, UpdateState};

/// Failures reported by a [`PlatformControl`](crate::platform::PlatformControl).
#[derive(Error, Debug)]
pub enum PlatformError {
    /// A platform tool exited unsuccessfully
    #[error("'{command}' failed: {detail}")]
    Command {
        /// Command line that was run
        command: String,
        /// Exit status or stderr summary
        detail: String,
    },

    /// No MTD partition carries the requested name
    #[error("MTD partition '{0}' not found")]
    MtdNotFound(String),

    /// Sysfs or device node access failed
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The platform cannot perform the operation for this FRU
    #[error("'{operation}' is not available for FRU '{fru}'")]
    Unsupported {
        /// FRU name
        fru: String,
        /// Requested operation
        operation: &'static str,
    },
}

/// Failures reported by a [`Transport`](crate::platform::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response from the endpoint
    #[error("No response from bus {bus} endpoint {endpoint}")]
    NoResponse {
        /// Bus number
        bus: u8,
        /// Endpoint id
        endpoint: u8,
    },

    /// The endpoint answered with a failure completion code
    #[error("Endpoint rejected request with completion code 0x{0:02x}")]
    Rejected(u8),

    /// The endpoint's reply could not be decoded
    #[error("Malformed reply: {0}")]
    Malformed(String),
}

/// Errors that fail an update run or another component operation.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Partition configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Image format, digest or identity check failed
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Image matches no configured partition layout
    #[error("Image {} matches none of the {layouts} configured partition layouts", .path.display())]
    InvalidImage {
        /// Image path
        path: PathBuf,
        /// Number of layouts tried
        layouts: usize,
    },

    /// A bounded wait ran out
    #[error("{state}: {operation} did not complete within its retry budget")]
    HardwareTimeout {
        /// State in which the wait ran
        state: UpdateState,
        /// What was being waited for
        operation: &'static str,
    },

    /// A platform primitive failed
    #[error("{state}: {source}")]
    Platform {
        /// State in which the call failed
        state: UpdateState,
        /// Platform failure
        #[source]
        source: PlatformError,
    },

    /// Reading the image or another local file failed
    #[error("{state}: failed to access {}: {source}", .path.display())]
    Io {
        /// State in which the access failed
        state: UpdateState,
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Transport failed after all retries
    #[error("{state}: {source}")]
    Transport {
        /// State in which the transfer failed
        state: UpdateState,
        /// Last transport failure
        #[source]
        source: TransportError,
    },

    /// The component does not implement the operation
    #[error("{component}: {operation} is not supported")]
    NotSupported {
        /// Component display name
        component: String,
        /// Requested operation
        operation: &'static str,
    },

    /// A stop request was honored before entering `state`
    #[error("Stop requested before {state}")]
    Stopped {
        /// State that was not entered
        state: UpdateState,
    },
}

impl UpdateError {
    /// Machine-readable cause.
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Config(_) => FailureReason::Config,
            Self::Format(FormatError::Identity(_)) => FailureReason::Identity,
            Self::Format(FormatError::Io { .. }) => FailureReason::Io,
            Self::Format(_) => FailureReason::Format,
            Self::InvalidImage { .. } => FailureReason::InvalidImage,
            Self::HardwareTimeout { .. } => FailureReason::HardwareTimeout,
            Self::Platform { .. } | Self::Io { .. } => FailureReason::Io,
            Self::Transport { .. } => FailureReason::Transport,
            Self::NotSupported { .. } => FailureReason::NotSupported,
            Self::Stopped { .. } => FailureReason::Stopped,
        }
    }

    /// State a hardware-phase error occurred in, if it carries one.
    #[must_use]
    pub fn state(&self) -> Option<UpdateState> {
        match self {
            Self::HardwareTimeout { state, .. }
            | Self::Platform { state, .. }
            | Self::Io { state, .. }
            | Self::Transport { state, .. }
            | Self::Stopped { state } => Some(*state),
            _ => None,
        }
    }

    pub(crate) fn platform(state: UpdateState) -> impl Fn(PlatformError) -> Self {
        move |source| Self::Platform { state, source }
    }

    pub(crate) fn io(state: UpdateState, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            state,
            path,
            source,
        }
    }
}
