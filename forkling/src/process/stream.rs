//! Byte streams over the parent's ends of the child's pipes.
//!
//! [`InputStream`] reads what the child writes to stdout/stderr and supports
//! pushing back a single byte. [`OutputStream`] feeds the child's stdin.
//! Both own their descriptor and close it on drop.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// Readable end of a child's output pipe.
#[derive(Debug)]
pub struct InputStream {
    reader: BufReader<File>,
    /// Lookaside byte served before the buffer when `pending` is set.
    lookaside: u8,
    pending: bool,
    /// A byte was consumed since creation or since the last pushback.
    consumed: bool,
}

impl InputStream {
    pub(crate) fn new(fd: OwnedFd) -> Self {
        Self {
            reader: BufReader::new(File::from(fd)),
            lookaside: 0,
            pending: false,
            consumed: false,
        }
    }

    /// Push `byte` back to the front of the stream.
    ///
    /// Only one byte can be pushed back, and only after something has been
    /// read. Fails with [`io::ErrorKind::UnexpectedEof`] otherwise.
    pub fn pushback(&mut self, byte: u8) -> io::Result<()> {
        if !self.consumed {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no consumed byte to push back",
            ));
        }
        self.lookaside = byte;
        self.pending = true;
        self.consumed = false;
        Ok(())
    }

    /// Push the most recently consumed byte back.
    pub fn unread(&mut self) -> io::Result<()> {
        self.pushback(self.lookaside)
    }

    /// Next byte without consuming it, or `None` at end of stream.
    pub fn peek_next_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.fill_buf()?.first().copied())
    }

    pub fn at_end(&mut self) -> io::Result<bool> {
        Ok(self.peek_next_byte()?.is_none())
    }

    fn note_consumed(&mut self, byte: u8) {
        self.lookaside = byte;
        self.consumed = true;
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending {
            self.pending = false;
            buf[0] = self.lookaside;
            // Top up from what is already buffered, never block here.
            let buffered = self.reader.buffer();
            let extra = buffered.len().min(buf.len() - 1);
            buf[1..=extra].copy_from_slice(&buffered[..extra]);
            self.reader.consume(extra);
            self.note_consumed(buf[extra]);
            return Ok(extra + 1);
        }

        let n = loop {
            match self.reader.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                result => break result?,
            }
        };
        if n > 0 {
            self.note_consumed(buf[n - 1]);
        }
        Ok(n)
    }
}

impl BufRead for InputStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pending {
            return Ok(std::slice::from_ref(&self.lookaside));
        }
        loop {
            match self.reader.fill_buf() {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
                Ok(_) => break,
            }
        }
        Ok(self.reader.buffer())
    }

    fn consume(&mut self, amt: usize) {
        if amt == 0 {
            return;
        }
        if self.pending {
            // The lookaside is the whole slice handed out by fill_buf.
            self.pending = false;
            self.consumed = true;
            return;
        }
        let last = self.reader.buffer()[amt - 1];
        self.reader.consume(amt);
        self.note_consumed(last);
    }
}

impl AsFd for InputStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.get_ref().as_fd()
    }
}

impl AsRawFd for InputStream {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.get_ref().as_raw_fd()
    }
}

/// Writable end of a child's stdin pipe.
///
/// Dropping the stream flushes it and closes the pipe, so the child sees
/// end-of-stream.
#[derive(Debug)]
pub struct OutputStream {
    writer: BufWriter<File>,
}

impl OutputStream {
    pub(crate) fn new(fd: OwnedFd) -> Self {
        Self {
            writer: BufWriter::new(File::from(fd)),
        }
    }

    /// Flush and close the pipe, reporting any flush error.
    pub fn close(mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.writer.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                result => return result,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        loop {
            match self.writer.flush() {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                result => return result,
            }
        }
    }
}

impl AsFd for OutputStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.writer.get_ref().as_fd()
    }
}

impl AsRawFd for OutputStream {
    fn as_raw_fd(&self) -> RawFd {
        self.writer.get_ref().as_raw_fd()
    }
}
