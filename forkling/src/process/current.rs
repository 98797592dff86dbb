//! Accessors for the calling process.

use std::time::{Duration, Instant};

use nix::unistd::{getpid, getppid};

use super::status::ProcessId;

/// Identity of the calling process.
pub fn id() -> ProcessId {
    getpid().into()
}

/// Identity of the calling process' parent.
pub fn parent_id() -> ProcessId {
    getppid().into()
}

pub fn sleep_for(duration: Duration) {
    std::thread::sleep(duration);
}

/// Sleep until `deadline`; returns at once if it has passed.
pub fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }
}
