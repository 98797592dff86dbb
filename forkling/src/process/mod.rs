//! Thread-style handles for child processes.
//!
//! [`Process`] forks the calling process to run a closure (or exec an
//! external program) with its standard streams piped back to the parent,
//! and tracks the child through [`ProcessState`].

mod argv;
pub mod current;
mod exit;
mod handle;
mod pipe;
mod reaper;
mod status;
mod stream;

pub use argv::ArgVector;
pub use exit::{IntoExitCode, EXIT_EXEC_FAILED, EXIT_FAILURE};
pub use handle::Process;
pub use nix::sys::signal::Signal;
pub use status::{signal_name, IntoSignalNumber, ProcessId, ProcessState};
pub use stream::{InputStream, OutputStream};
