//! Process identity, lifecycle state, and wait-status resolution.

use std::fmt;

use libc::c_int;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

/// OS-assigned identity of a process.
///
/// `ProcessId::NONE` (zero) stands for "no process". Prints as the
/// underlying integer and can be used as a map or set key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// The "no process" sentinel.
    pub const NONE: Self = Self(0);

    /// Wrap a raw pid.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw pid.
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == Self::NONE.0
    }

    /// The `nix` pid, or `None` for the sentinel.
    pub const fn as_pid(self) -> Option<Pid> {
        if self.is_none() {
            None
        } else {
            Some(Pid::from_raw(self.0))
        }
    }
}

impl From<Pid> for ProcessId {
    fn from(pid: Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a spawned process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Never spawned, detached, or no longer awaitable.
    #[default]
    NotStarted,
    /// Alive and scheduled.
    Running,
    /// Stopped by a signal; may be continued.
    Stopped,
    /// Terminated normally with an exit code.
    Exited,
    /// Terminated by a signal.
    Signaled,
}

impl ProcessState {
    /// Whether the process may still change state on its own.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Exited => "exited",
            Self::Signaled => "signaled",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Anything that names a signal by number.
///
/// Implemented for raw numbers, so signals without a [`Signal`] variant
/// (the real-time range) can be sent too.
pub trait IntoSignalNumber {
    fn into_signal_number(self) -> c_int;
}

impl IntoSignalNumber for c_int {
    fn into_signal_number(self) -> c_int {
        self
    }
}

impl IntoSignalNumber for Signal {
    fn into_signal_number(self) -> c_int {
        self as c_int
    }
}

/// Name of signal `signo`, or `None` for numbers [`Signal`] cannot represent.
pub fn signal_name(signo: c_int) -> Option<&'static str> {
    Signal::try_from(signo).ok().map(Signal::as_str)
}

/// Outcome of decoding one wait-status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Exited(i32),
    Signaled(c_int),
    Stopped(c_int),
    Continued,
    Unchanged,
}

impl Resolution {
    /// Decode a raw status as filled in by `waitpid(2)`.
    pub fn decode(status: c_int) -> Self {
        if libc::WIFEXITED(status) {
            Self::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            Self::Signaled(libc::WTERMSIG(status))
        } else if libc::WIFSTOPPED(status) {
            Self::Stopped(libc::WSTOPSIG(status))
        } else if libc::WIFCONTINUED(status) {
            Self::Continued
        } else {
            Self::Unchanged
        }
    }

    pub const fn state(self) -> Option<ProcessState> {
        match self {
            Self::Exited(_) => Some(ProcessState::Exited),
            Self::Signaled(_) => Some(ProcessState::Signaled),
            Self::Stopped(_) => Some(ProcessState::Stopped),
            Self::Continued => Some(ProcessState::Running),
            Self::Unchanged => None,
        }
    }

    /// Whether the process is gone and its identity must be released.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Signaled(_))
    }
}
