//! Integration tests for process handles
//!
//! These tests fork real children and verify that the handle:
//! - Reports exit codes and signals through its state machine
//! - Pipes stdin, stdout and stderr between parent and child
//! - Honors timed joins, detach, and signal delivery
//! - Aborts when a joinable handle is dropped

#![cfg(unix)]

use std::collections::BTreeSet;
use std::io::{self, BufRead, Read, Write};
use std::time::{Duration, Instant};

use forkling::process::{current, Process, ProcessState, Signal, EXIT_FAILURE};
use forkling::ProcessError;
use nix::errno::Errno;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use pretty_assertions::assert_eq;
use serial_test::serial;

/// Poll `state()` until `done` holds or a generous bound expires.
fn wait_for_state(process: &mut Process, done: impl Fn(ProcessState) -> bool) -> ProcessState {
    let start = Instant::now();
    loop {
        let state = process.state().expect("state query failed");
        if done(state) || start.elapsed() > Duration::from_secs(10) {
            return state;
        }
        current::sleep_for(Duration::from_millis(5));
    }
}

#[test_log::test]
fn test_join_yields_callable_result() {
    for expected in [0, 1, 42, 255] {
        let mut process = Process::spawn(move || expected).expect("Failed to spawn");
        process.join().expect("Failed to join");
        assert_eq!(process.state().unwrap(), ProcessState::Exited);
        assert_eq!(process.code(), Some(expected));
    }
}

#[test_log::test]
fn test_panicking_child_exits_with_failure() {
    let mut process = Process::spawn(|| -> i32 { panic!("not in the parent") }).unwrap();
    process.join().unwrap();
    assert_eq!(process.state().unwrap(), ProcessState::Exited);
    assert_eq!(process.code(), Some(EXIT_FAILURE));
}

#[test_log::test]
fn test_stdin_round_trip() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();

    let mut process = Process::spawn(|| -> io::Result<i32> {
        let mut input = Vec::new();
        io::stdin().lock().read_to_end(&mut input)?;
        io::stdout().write_all(&input)?;
        Ok(i32::try_from(input.len() % 256).unwrap_or(0))
    })
    .unwrap();

    // Feed stdin from another thread so the child's output can drain meanwhile.
    let mut stdin = process.stdin.take().unwrap();
    let sent = payload.clone();
    let writer = std::thread::spawn(move || {
        stdin.write_all(&sent)?;
        stdin.close()
    });

    let mut echoed = Vec::new();
    process
        .stdout
        .as_mut()
        .unwrap()
        .read_to_end(&mut echoed)
        .unwrap();
    writer.join().unwrap().unwrap();
    process.join().unwrap();

    assert_eq!(echoed.len(), payload.len());
    assert!(echoed == payload, "bytes changed in transit");
    assert_eq!(process.code(), Some(i32::try_from(payload.len() % 256).unwrap()));
}

#[test_log::test]
fn test_pushback_on_child_output() {
    let mut process = Process::spawn(|| writeln!(io::stdout(), "ready")).unwrap();

    let stdout = process.stdout.as_mut().unwrap();
    let mut first = [0u8; 1];
    stdout.read_exact(&mut first).unwrap();
    assert_eq!(&first, b"r");
    stdout.unread().unwrap();

    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "ready\n");
    assert!(stdout.at_end().unwrap());

    process.join().unwrap();
}

#[test_log::test]
fn test_child_sees_parent_identity() {
    let parent = current::id();
    let mut process = Process::spawn(move || current::parent_id() == parent).unwrap();
    let child = process.id();
    process.join().unwrap();

    assert_ne!(child, parent);
    assert_eq!(process.code(), Some(0));
}

#[test_log::test]
#[serial]
fn test_try_join_zero_eventually_succeeds() {
    let mut process = Process::spawn(|| 5).unwrap();

    let start = Instant::now();
    while !process.try_join_for(Duration::ZERO).unwrap() {
        assert!(start.elapsed() < Duration::from_secs(10), "child never finished");
        current::sleep_for(Duration::from_millis(1));
    }
    assert!(!process.joinable());
    assert_eq!(process.code(), Some(5));
}

#[test_log::test]
#[serial]
fn test_try_join_times_out_then_join_succeeds() {
    let mut process = Process::spawn(|| {
        current::sleep_for(Duration::from_millis(300));
        9
    })
    .unwrap();

    let start = Instant::now();
    assert!(!process.try_join_for(Duration::from_millis(50)).unwrap());
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(process.joinable());

    process.join().unwrap();
    assert_eq!(process.code(), Some(9));
}

#[test_log::test]
#[serial]
fn test_try_join_wakes_on_exit() {
    let mut process = Process::spawn(|| {
        current::sleep_for(Duration::from_millis(50));
        0
    })
    .unwrap();

    let start = Instant::now();
    assert!(process.try_join_for(Duration::from_secs(30)).unwrap());
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(process.state().unwrap(), ProcessState::Exited);
}

#[test_log::test]
fn test_try_join_until_past_deadline() {
    let mut process = Process::spawn(|| {
        current::sleep_for(Duration::from_secs(30));
        0
    })
    .unwrap();

    assert!(!process.try_join_until(Instant::now()).unwrap());
    process.kill().unwrap();
    process.join().unwrap();
    assert_eq!(process.known_signal(), Some(Signal::SIGKILL));
}

#[test_log::test]
fn test_detach_then_join_is_rejected() {
    let mut process = Process::spawn(|| 0).unwrap();
    process.detach();

    assert!(!process.joinable());
    assert!(matches!(process.join(), Err(ProcessError::NotJoinable)));
    assert!(matches!(
        process.try_join_for(Duration::from_millis(1)),
        Err(ProcessError::NotJoinable)
    ));
}

#[test_log::test]
fn test_raise_on_stale_handle_is_rejected() {
    let mut process = Process::spawn(|| 0).unwrap();
    process.join().unwrap();
    assert!(matches!(
        process.raise(Signal::SIGTERM),
        Err(ProcessError::NotJoinable)
    ));
}

#[test_log::test]
fn test_raise_racing_natural_exit() {
    let mut process = Process::spawn(|| 0).unwrap();
    // Give the child time to exit without reaping it.
    current::sleep_for(Duration::from_millis(100));

    process.raise(Signal::SIGTERM).unwrap();
    process.join().unwrap();
    assert!(matches!(
        process.state().unwrap(),
        ProcessState::Exited | ProcessState::Signaled
    ));
}

#[test_log::test]
fn test_terminate_running_child() {
    let mut process = Process::spawn(|| {
        current::sleep_for(Duration::from_secs(30));
        0
    })
    .unwrap();

    process.terminate().unwrap();
    process.join().unwrap();
    assert_eq!(process.state().unwrap(), ProcessState::Signaled);
    assert_eq!(process.known_signal(), Some(Signal::SIGTERM));
}

#[test_log::test]
#[serial]
fn test_stop_and_continue_are_tracked() {
    let mut process = Process::spawn(|| {
        current::sleep_for(Duration::from_secs(30));
        0
    })
    .unwrap();

    process.raise(Signal::SIGSTOP).unwrap();
    let state = wait_for_state(&mut process, |s| s == ProcessState::Stopped);
    assert_eq!(state, ProcessState::Stopped);
    assert_eq!(process.known_signal(), Some(Signal::SIGSTOP));
    assert!(process.joinable());

    process.raise(Signal::SIGCONT).unwrap();
    let state = wait_for_state(&mut process, |s| s == ProcessState::Running);
    assert_eq!(state, ProcessState::Running);
    assert_eq!(process.signal(), None);

    process.kill().unwrap();
    process.join().unwrap();
    assert_eq!(process.state().unwrap(), ProcessState::Signaled);
}

#[test_log::test]
fn test_moving_handle_transfers_ownership() {
    let process = Process::spawn(|| 3).unwrap();
    let id = process.id();

    let mut moved = process;
    assert_eq!(moved.id(), id);

    let mut empty = Process::default();
    std::mem::swap(&mut empty, &mut moved);
    assert!(!moved.joinable());
    empty.join().unwrap();
    assert_eq!(empty.code(), Some(3));
}

#[test_log::test]
fn test_dropping_joinable_handle_aborts() {
    // The outer child is the harness: it drops a joinable handle and must
    // die from SIGABRT rather than exit.
    let mut harness = Process::spawn(|| -> forkling::Result<i32> {
        let inner = Process::spawn(|| 0)?;
        drop(inner);
        Ok(0)
    })
    .unwrap();

    harness.join().unwrap();
    assert_eq!(harness.state().unwrap(), ProcessState::Signaled);
    assert_eq!(harness.known_signal(), Some(Signal::SIGABRT));
}

#[test_log::test]
fn test_unawaitable_child_degrades_to_not_started() {
    // Ignoring SIGCHLD is process-wide, so do it inside a throwaway child.
    let mut harness = Process::spawn(|| -> forkling::Result<bool> {
        ignore_sigchld();
        let mut inner = Process::spawn(|| 0)?;
        inner.join()?;
        Ok(inner.state()? == ProcessState::NotStarted && !inner.joinable())
    })
    .unwrap();

    harness.join().unwrap();
    assert_eq!(harness.code(), Some(0));
}

#[test_log::test]
#[cfg(target_os = "linux")]
fn test_death_by_realtime_signal_is_signaled() {
    let signo = libc::SIGRTMIN() + 1;
    let mut process = Process::spawn(move || {
        raise_raw(signo);
        0
    })
    .unwrap();

    process.join().unwrap();
    assert_eq!(process.state().unwrap(), ProcessState::Signaled);
    assert_eq!(process.signal(), Some(signo));
    assert_eq!(process.known_signal(), None);
    assert_eq!(process.code(), None);
    assert!(matches!(process.join(), Err(ProcessError::NotJoinable)));
}

#[test_log::test]
#[cfg(target_os = "linux")]
fn test_timed_join_sees_realtime_signal() {
    let signo = libc::SIGRTMIN();
    let mut process = Process::spawn(|| {
        current::sleep_for(Duration::from_secs(30));
        0
    })
    .unwrap();

    assert!(!process.try_join_for(Duration::from_millis(20)).unwrap());
    process.raise(signo).unwrap();
    assert!(process.try_join_for(Duration::from_secs(10)).unwrap());
    assert_eq!(process.state().unwrap(), ProcessState::Signaled);
    assert_eq!(process.signal(), Some(signo));
}

#[test_log::test]
#[cfg(target_os = "linux")]
fn test_spawn_failure_closes_opened_pipes() {
    // Runs in a throwaway child because it lowers the descriptor limit.
    // Exit codes: 2 spawn succeeded, 3 wrong error, 4 descriptors leaked.
    let mut harness = Process::spawn(|| -> io::Result<i32> {
        let before = open_descriptors()?;
        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;

        // Leave room for the first pipe or two, never all three.
        let limit = (0..).filter(|fd| !before.contains(fd)).nth(2).map_or(0, |fd| fd + 1);
        setrlimit(
            Resource::RLIMIT_NOFILE,
            libc::rlim_t::try_from(limit).unwrap_or(0),
            hard,
        )?;
        let spawned = Process::spawn(|| 0);
        setrlimit(Resource::RLIMIT_NOFILE, soft, hard)?;

        let error = match spawned {
            Ok(mut process) => {
                process.detach();
                return Ok(2);
            }
            Err(error) => error,
        };
        if !matches!(error, ProcessError::Os { call: "pipe", .. })
            || error.errno() != Some(Errno::EMFILE)
        {
            return Ok(3);
        }
        if open_descriptors()? != before {
            return Ok(4);
        }
        Ok(0)
    })
    .unwrap();

    harness.join().unwrap();
    assert_eq!(harness.code(), Some(0));
}

/// Descriptors open in this process, including the one used for listing.
#[cfg(target_os = "linux")]
fn open_descriptors() -> io::Result<BTreeSet<i32>> {
    std::fs::read_dir("/proc/self/fd")?
        .map(|entry| Ok(entry?.file_name().to_string_lossy().parse().unwrap_or(-1)))
        .collect()
}

#[allow(unsafe_code)]
#[cfg(target_os = "linux")]
fn raise_raw(signo: libc::c_int) {
    // SAFETY: delivers a signal to the calling process, no memory involved.
    unsafe { libc::raise(signo) };
}

#[allow(unsafe_code)]
fn ignore_sigchld() {
    use nix::sys::signal::{signal, SigHandler};
    // SAFETY: installs the SIG_IGN disposition, no handler code runs.
    unsafe { signal(Signal::SIGCHLD, SigHandler::SigIgn) }.expect("Failed to ignore SIGCHLD");
}
