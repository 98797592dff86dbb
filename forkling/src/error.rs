//! Error types for process handles.

use std::ffi::NulError;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised by [`Process`](crate::process::Process) and its helpers.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// An OS call failed with an errno outside the handled set.
    #[error("{call} failed: {source}")]
    Os {
        /// Name of the failing call (`fork`, `waitpid`, ...).
        call: &'static str,
        #[source]
        source: Errno,
    },

    /// The handle does not own a process.
    #[error("process is not joinable")]
    NotJoinable,

    /// The handle refers to the calling process itself.
    #[error("joining the current process would deadlock")]
    Deadlock,

    /// An argument could not be converted to a C string.
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] NulError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub(crate) const fn os(call: &'static str, source: Errno) -> Self {
        Self::Os { call, source }
    }

    /// The OS error code carried by this error, if any.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Os { source, .. } => Some(*source),
            Self::Io(e) => e.raw_os_error().map(Errno::from_raw),
            Self::NotJoinable | Self::Deadlock | Self::InvalidArgument(_) => None,
        }
    }

    /// Short, stable code for this error type.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Os { .. } => "PROC001",
            Self::NotJoinable => "PROC002",
            Self::Deadlock => "PROC003",
            Self::InvalidArgument(_) => "PROC004",
            Self::Io(_) => "PROC005",
        }
    }
}

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, ProcessError>;
