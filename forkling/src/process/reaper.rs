//! Exit notification for timed joins.
//!
//! A watcher thread blocks in `waitid(WEXITED | WNOWAIT)` on one child and
//! sends a single message once the child has terminated. The status is left
//! in place, so the owning [`Process`](super::Process) still reaps it.

use std::thread;
use std::time::Instant;

use flume::RecvTimeoutError;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;

/// Receiving side of a child's exit notification.
#[derive(Debug)]
pub(crate) struct ExitWatch {
    rx: flume::Receiver<()>,
}

/// What a deadline wait observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The child terminated.
    Exited,
    /// The watcher is gone without reporting an exit.
    Lost,
    TimedOut,
}

impl ExitWatch {
    /// Start watching `pid`.
    pub fn start(pid: Pid) -> std::io::Result<Self> {
        let (tx, rx) = flume::bounded(1);
        thread::Builder::new()
            .name(format!("forkling-watch-{pid}"))
            .spawn(move || {
                let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
                loop {
                    match waitid(Id::Pid(pid), flags) {
                        Err(Errno::EINTR) => {}
                        Ok(status) => {
                            debug!("child {pid} terminated: {status:?}");
                            let _ = tx.send(());
                            break;
                        }
                        // Flags are fixed, so this is nix failing to name
                        // the terminating signal (real-time range).
                        Err(Errno::EINVAL) => {
                            debug!("child {pid} terminated by an unnamed signal");
                            let _ = tx.send(());
                            break;
                        }
                        Err(Errno::ECHILD) => {
                            debug!("child {pid} already reaped");
                            break;
                        }
                        Err(e) => {
                            warn!("watching child {pid} failed: {e}");
                            break;
                        }
                    }
                }
            })?;
        Ok(Self { rx })
    }

    /// Block until the child terminates or `deadline` passes.
    pub fn wait_until(&self, deadline: Instant) -> Wake {
        match self.rx.recv_deadline(deadline) {
            Ok(()) => Wake::Exited,
            Err(RecvTimeoutError::Disconnected) => Wake::Lost,
            Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
        }
    }
}
