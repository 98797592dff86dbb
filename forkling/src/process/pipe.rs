//! Unidirectional pipes used to wire a child's standard streams.

use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

use log::trace;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd::{dup2, pipe2};

use super::stream::{InputStream, OutputStream};
use crate::error::{ProcessError, Result};

/// A connected read/write descriptor pair.
///
/// Both ends are close-on-exec; only the copies placed on standard
/// descriptors survive an exec in the child.
#[derive(Debug)]
pub(crate) struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    pub fn open() -> Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| ProcessError::os("pipe", e))?;
        trace!(
            "opened pipe read={} write={}",
            read.as_raw_fd(),
            write.as_raw_fd()
        );
        Ok(Self { read, write })
    }

    /// Close both ends.
    pub fn close(self) {
        drop(self);
    }

    /// Place the write end on `target` and close the read end.
    pub fn redirect_write(self, target: RawFd) -> Result<()> {
        let Self { read, write } = self;
        drop(read);
        redirect(write, target)
    }

    /// Place the read end on `target` and close the write end.
    pub fn redirect_read(self, target: RawFd) -> Result<()> {
        let Self { read, write } = self;
        drop(write);
        redirect(read, target)
    }

    /// Keep the write end as a stream, close the read end.
    pub fn into_output_stream(self) -> OutputStream {
        OutputStream::new(self.write)
    }

    /// Keep the read end as a stream, close the write end.
    pub fn into_input_stream(self) -> InputStream {
        InputStream::new(self.read)
    }

    #[cfg(test)]
    pub fn into_ends(self) -> (OwnedFd, OwnedFd) {
        (self.read, self.write)
    }
}

fn redirect(fd: OwnedFd, target: RawFd) -> Result<()> {
    if fd.as_raw_fd() == target {
        // Already in place: keep it open across exec.
        fcntl(target, FcntlArg::F_SETFD(FdFlag::empty())).map_err(|e| ProcessError::os("fcntl", e))?;
        let _ = fd.into_raw_fd();
        return Ok(());
    }
    dup2(fd.as_raw_fd(), target).map_err(|e| ProcessError::os("dup2", e))?;
    Ok(())
}
