//! Forkling - spawn closures in child processes and manage them like threads.
//!
//! A [`Process`](process::Process) forks the caller, runs a closure in the
//! child with stdin, stdout and stderr piped back to the parent, and must be
//! joined or detached before it is dropped.

pub mod cli;
pub mod error;
pub mod process;

pub use error::{ProcessError, Result};
pub use process::{Process, ProcessId, ProcessState};
