//! Thread-style handle to a forked child process.
//!
//! A [`Process`] runs a closure in a forked copy of the calling process, with
//! the child's stdin, stdout and stderr connected to pipes owned by the
//! handle. Like [`std::thread::JoinHandle`] it must be joined or detached
//! before it goes away; unlike it, dropping a joinable handle aborts.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use libc::{c_int, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use log::{debug, error, trace, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitPidFlag;
use nix::unistd::{fork, ForkResult, Pid};

use super::argv::ArgVector;
use super::current;
use super::exit::{IntoExitCode, EXIT_EXEC_FAILED, EXIT_FAILURE};
use super::pipe::Pipe;
use super::reaper::{ExitWatch, Wake};
use super::status::{signal_name, IntoSignalNumber, ProcessId, ProcessState, Resolution};
use super::stream::{InputStream, OutputStream};
use crate::error::{ProcessError, Result};

/// Poll interval used when no exit watcher is available.
const FALLBACK_POLL: Duration = Duration::from_millis(10);

/// Handle to a child process spawned from a closure.
///
/// # Example
///
/// ```rust,no_run
/// use std::io::Read;
/// use forkling::process::{Process, ProcessState};
///
/// let mut child = Process::spawn(|| {
///     println!("hello from {}", forkling::process::current::id());
///     3
/// })?;
///
/// let mut out = String::new();
/// child.stdout.as_mut().unwrap().read_to_string(&mut out)?;
/// child.join()?;
///
/// assert_eq!(child.state()?, ProcessState::Exited);
/// assert_eq!(child.code(), Some(3));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct Process {
    id: ProcessId,
    state: ProcessState,
    code: Option<i32>,
    signal: Option<c_int>,
    watch: Option<ExitWatch>,
    /// Set once the watcher could not start or went away.
    polling: bool,

    /// Writes to the child's stdin.
    pub stdin: Option<OutputStream>,
    /// Reads the child's stdout.
    pub stdout: Option<InputStream>,
    /// Reads the child's stderr.
    pub stderr: Option<InputStream>,
}

impl Process {
    /// Fork a child that runs `f` and exits with its result.
    ///
    /// In the child, stdout, stdin and stderr are replaced by pipes before
    /// `f` runs. A panic in `f` becomes exit code [`EXIT_FAILURE`]; the
    /// parent never sees it. The child leaves through `_exit`, so no
    /// destructors or exit hooks inherited from the parent run there.
    ///
    /// Forking a multi-threaded process only copies the calling thread.
    /// `f` must not depend on locks or state owned by other threads. That
    /// includes the exit watchers started by [`try_join_for`]: a watcher
    /// logs when its child ends, so once any handle has done a timed join
    /// the child should avoid the `log` macros and the process-wide stderr
    /// lock. [`spawn_exec`] only touches stderr when the exec fails.
    ///
    /// [`try_join_for`]: Process::try_join_for
    ///
    /// [`spawn_exec`]: Process::spawn_exec
    pub fn spawn<F, R>(f: F) -> Result<Self>
    where
        F: FnOnce() -> R,
        R: IntoExitCode,
    {
        // Each pipe closes itself if a later step fails.
        let stdout = Pipe::open()?;
        let stdin = Pipe::open()?;
        let stderr = Pipe::open()?;

        match fork_process() {
            Err(e) => {
                error!("fork failed: {e}");
                stdout.close();
                stdin.close();
                stderr.close();
                Err(ProcessError::os("fork", e))
            }
            Ok(ForkResult::Child) => run_child(f, stdout, stdin, stderr),
            Ok(ForkResult::Parent { child }) => {
                debug!("spawned child process {child}");
                Ok(Self {
                    id: child.into(),
                    state: ProcessState::Running,
                    code: None,
                    signal: None,
                    watch: None,
                    polling: false,
                    stdin: Some(stdin.into_output_stream()),
                    stdout: Some(stdout.into_input_stream()),
                    stderr: Some(stderr.into_input_stream()),
                })
            }
        }
    }

    /// Fork a child that executes `program` with `args`, searching `PATH`.
    ///
    /// If the exec fails the child prints the error to its stderr and exits
    /// with [`EXIT_EXEC_FAILED`].
    pub fn spawn_exec<P, I, S>(program: P, args: I) -> Result<Self>
    where
        P: Into<Vec<u8>>,
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        let argv = ArgVector::with_program(program, args)?;
        Self::spawn(move || match argv.exec() {
            Ok(never) => match never {},
            Err(e) => {
                let _ = writeln!(io::stderr(), "forkling: {e}");
                EXIT_EXEC_FAILED
            }
        })
    }

    /// Whether the handle owns a live or unreaped process.
    pub const fn joinable(&self) -> bool {
        !self.id.is_none()
    }

    pub const fn id(&self) -> ProcessId {
        self.id
    }

    /// Exit code, set once the process has [`Exited`](ProcessState::Exited).
    pub const fn code(&self) -> Option<i32> {
        self.code
    }

    /// Number of the terminating or stopping signal.
    pub const fn signal(&self) -> Option<c_int> {
        self.signal
    }

    /// The signal as a [`Signal`], if it has a variant there. Real-time
    /// signals only show up in [`signal`](Process::signal).
    pub fn known_signal(&self) -> Option<Signal> {
        self.signal.and_then(|signo| Signal::try_from(signo).ok())
    }

    /// Current state, collecting any pending status change without blocking.
    ///
    /// If the OS no longer lets us wait for the child (for instance because
    /// `SIGCHLD` is ignored), the state becomes
    /// [`NotStarted`](ProcessState::NotStarted). The handle also gives up
    /// the child's id at that point, so it stops being joinable and can be
    /// dropped without [`detach`](Process::detach).
    pub fn state(&mut self) -> Result<ProcessState> {
        self.reap(Some(WaitPidFlag::WNOHANG))?;
        Ok(self.state)
    }

    /// Block until the process exits or is killed.
    pub fn join(&mut self) -> Result<()> {
        self.check_join()?;
        self.reap(None)
    }

    /// Wait at most `timeout` for the process to terminate.
    ///
    /// Returns `true` once the process has terminated (the handle is then no
    /// longer joinable) and `false` if time ran out.
    pub fn try_join_for(&mut self, timeout: Duration) -> Result<bool> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.try_join_until(deadline),
            None => self.join().map(|()| true),
        }
    }

    /// Wait until `deadline` for the process to terminate.
    ///
    /// The first call starts a watcher thread for the child; without one the
    /// wait falls back to polling.
    pub fn try_join_until(&mut self, deadline: Instant) -> Result<bool> {
        self.check_join()?;

        while self.state()?.is_active() {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            match self.watcher().map(|watch| watch.wait_until(deadline)) {
                Some(Wake::Exited) => trace!("child {} signalled exit", self.id),
                Some(Wake::Lost) => {
                    debug!("exit watcher for {} stopped, polling instead", self.id);
                    self.watch = None;
                    self.polling = true;
                }
                Some(Wake::TimedOut) => {}
                None => current::sleep_for(FALLBACK_POLL.min(deadline - now)),
            }
        }
        Ok(true)
    }

    /// Release the process without waiting for it.
    pub fn detach(&mut self) {
        if self.joinable() {
            debug!("detaching child process {}", self.id);
        }
        self.id = ProcessId::NONE;
        self.state = ProcessState::NotStarted;
        self.watch = None;
    }

    /// Send `signal` to the process, either a [`Signal`] or a raw number.
    /// A process that is already gone is not an error.
    pub fn raise<S: IntoSignalNumber>(&mut self, signal: S) -> Result<()> {
        let pid = self.pid()?;
        let signo = signal.into_signal_number();
        let name = signal_name(signo).unwrap_or("signal");
        match send_signal(pid, signo) {
            Ok(()) => {
                debug!("sent {name} ({signo}) to child {pid}");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!("child {pid} already gone, {name} ({signo}) not delivered");
                Ok(())
            }
            Err(e) => Err(ProcessError::os("kill", e)),
        }
    }

    /// Ask the process to terminate (`SIGTERM`).
    pub fn terminate(&mut self) -> Result<()> {
        self.raise(Signal::SIGTERM)
    }

    /// Kill the process (`SIGKILL`).
    pub fn kill(&mut self) -> Result<()> {
        self.raise(Signal::SIGKILL)
    }

    /// The exit watcher, started on first use.
    fn watcher(&mut self) -> Option<&ExitWatch> {
        if self.watch.is_none() && !self.polling {
            let pid = self.pid().ok()?;
            match ExitWatch::start(pid) {
                Ok(watch) => self.watch = Some(watch),
                Err(e) => {
                    warn!("no exit watcher for child {pid}, polling instead: {e}");
                    self.polling = true;
                }
            }
        }
        self.watch.as_ref()
    }

    fn pid(&self) -> Result<Pid> {
        self.id.as_pid().ok_or(ProcessError::NotJoinable)
    }

    fn check_join(&self) -> Result<()> {
        if !self.joinable() {
            return Err(ProcessError::NotJoinable);
        }
        if self.id == current::id() {
            return Err(ProcessError::Deadlock);
        }
        Ok(())
    }

    /// Wait for status changes while the process is active. With `WNOHANG`
    /// in `flags` this stops as soon as nothing is pending.
    fn reap(&mut self, flags: Option<WaitPidFlag>) -> Result<()> {
        let flags = flags.unwrap_or_else(WaitPidFlag::empty)
            | WaitPidFlag::WUNTRACED
            | WaitPidFlag::WCONTINUED;

        while self.state.is_active() {
            let pid = self.pid()?;
            match wait_status(pid, flags) {
                Ok(None) => break,
                Ok(Some(status)) => self.update(Resolution::decode(status)),
                Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => {
                    // Never ours, or reclaimed by the OS because SIGCHLD is
                    // ignored. How it ended is unknown.
                    warn!("child {pid} can no longer be waited for");
                    self.id = ProcessId::NONE;
                    self.state = ProcessState::NotStarted;
                    self.watch = None;
                }
                Err(e) => return Err(ProcessError::os("waitpid", e)),
            }
        }
        Ok(())
    }

    fn update(&mut self, resolution: Resolution) {
        let Some(state) = resolution.state() else {
            return;
        };

        debug!("child {} is now {state}", self.id);
        self.state = state;
        match resolution {
            Resolution::Exited(code) => self.code = Some(code),
            Resolution::Signaled(signal) | Resolution::Stopped(signal) => {
                self.signal = Some(signal);
            }
            Resolution::Continued => self.signal = None,
            Resolution::Unchanged => {}
        }
        if resolution.is_terminal() {
            // The pid may be recycled from here on.
            self.id = ProcessId::NONE;
            self.watch = None;
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.joinable() {
            error!("process handle for {} dropped while joinable", self.id);
            std::process::abort();
        }
    }
}

/// Child side of [`Process::spawn`]. Never returns.
fn run_child<F, R>(f: F, stdout: Pipe, stdin: Pipe, stderr: Pipe) -> !
where
    F: FnOnce() -> R,
    R: IntoExitCode,
{
    let redirected = stdout
        .redirect_write(STDOUT_FILENO)
        .and_then(|()| stdin.redirect_read(STDIN_FILENO))
        .and_then(|()| stderr.redirect_write(STDERR_FILENO));

    let code = match redirected {
        Ok(()) => panic::catch_unwind(AssertUnwindSafe(f))
            .map_or(EXIT_FAILURE, IntoExitCode::into_exit_code),
        Err(_) => EXIT_FAILURE,
    };

    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    exit_now(code)
}

#[allow(unsafe_code)]
fn fork_process() -> nix::Result<ForkResult> {
    // SAFETY: the child branch only redirects descriptors, runs the closure
    // and leaves through `exit_now`; it never returns into the caller.
    unsafe { fork() }
}

/// `waitpid(2)` returning the raw status, or `None` if `WNOHANG` found
/// nothing. Decoding stays with [`Resolution::decode`] so that statuses for
/// signals outside [`Signal`] are not lost after the child was reaped.
#[allow(unsafe_code)]
fn wait_status(pid: Pid, flags: WaitPidFlag) -> nix::Result<Option<c_int>> {
    let mut status: c_int = 0;
    // SAFETY: `status` is a valid out-pointer for the whole call.
    let reaped =
        Errno::result(unsafe { libc::waitpid(pid.as_raw(), &mut status, flags.bits()) })?;
    Ok((reaped != 0).then_some(status))
}

#[allow(unsafe_code)]
fn send_signal(pid: Pid, signo: c_int) -> nix::Result<()> {
    // SAFETY: `kill` takes plain integers and touches no memory of ours.
    Errno::result(unsafe { libc::kill(pid.as_raw(), signo) }).map(drop)
}

#[allow(unsafe_code)]
fn exit_now(code: i32) -> ! {
    // SAFETY: `_exit` ends the process without touching shared state.
    unsafe { libc::_exit(code) }
}
