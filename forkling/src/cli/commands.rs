//! CLI command execution.

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::process::{current, signal_name, InputStream, Process, ProcessId, ProcessState};

use super::args::{Cli, Commands};

/// Options for `forkling run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// The program to execute.
    pub program: String,
    /// Arguments to pass to the program.
    pub args: Vec<String>,
    /// How long to wait before terminating the child.
    pub timeout: Option<Duration>,
    /// How long to wait between SIGTERM and SIGKILL.
    pub grace: Duration,
    /// Whether to copy our stdin into the child.
    pub forward_stdin: bool,
}

/// Outcome of a finished `forkling run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub pid: ProcessId,
    pub state: ProcessState,
    pub code: Option<i32>,
    /// Name of the terminating signal, e.g. `SIGKILL`, or `signal 34` for
    /// numbers without a name.
    pub signal: Option<String>,
    pub signal_number: Option<i32>,
    /// Whether the child had to be terminated after the timeout.
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Exit code to report for the child: its own code, or 128 + signal.
    pub fn exit_code(&self) -> u8 {
        let code = match (self.code, self.signal_number) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        };
        u8::try_from(code).unwrap_or(1)
    }
}

/// Process identities of this process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Identity {
    pub pid: ProcessId,
    pub ppid: ProcessId,
}

/// Execute the CLI command.
pub async fn execute(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Run {
            timeout_ms,
            grace_ms,
            forward_stdin,
            json,
            command,
        } => {
            let (program, args) = command.split_first().context("Program is required")?;
            let options = RunOptions {
                program: program.clone(),
                args: args.to_vec(),
                timeout: timeout_ms.map(Duration::from_millis),
                grace: Duration::from_millis(grace_ms),
                forward_stdin,
            };

            let report = run(options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(ExitCode::from(report.exit_code()))
        }
        Commands::Whoami { json } => {
            let identity = Identity {
                pid: current::id(),
                ppid: current::parent_id(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&identity)?);
            } else {
                println!("pid:  {}", identity.pid);
                println!("ppid: {}", identity.ppid);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run a program in a child process, relaying its output to ours.
pub async fn run(options: RunOptions) -> Result<RunReport> {
    let started_at = Utc::now();
    let start = Instant::now();

    let mut process = Process::spawn_exec(
        options.program.as_str(),
        options.args.iter().map(String::as_str),
    )
    .with_context(|| format!("Failed to spawn process: {}", options.program))?;
    let pid = process.id();
    debug!("running {} as {pid}", options.program);

    let stdout = process.stdout.take().context("Child stdout missing")?;
    let stderr = process.stderr.take().context("Child stderr missing")?;
    let stdin = process.stdin.take();

    // Relay output on blocking workers so both pipes drain concurrently.
    let stdout_task = tokio::task::spawn_blocking(move || relay(stdout, io::stdout()));
    let stderr_task = tokio::task::spawn_blocking(move || relay(stderr, io::stderr()));

    if options.forward_stdin {
        if let Some(mut stdin) = stdin {
            // A plain thread: reading our stdin may never finish, and the
            // runtime must not wait for it on shutdown.
            std::thread::Builder::new()
                .name("forkling-stdin".to_string())
                .spawn(move || {
                    let copied = io::copy(&mut io::stdin().lock(), &mut stdin)
                        .and_then(|_| stdin.close());
                    if let Err(e) = copied {
                        debug!("stopped forwarding stdin: {e}");
                    }
                })
                .context("Failed to start stdin forwarder")?;
        }
    } else {
        drop(stdin);
    }

    let (timeout, grace) = (options.timeout, options.grace);
    let (mut process, timed_out) = tokio::task::spawn_blocking(move || wait(process, timeout, grace))
        .await
        .context("Wait task failed")??;

    stdout_task.await.context("Stdout relay failed")??;
    stderr_task.await.context("Stderr relay failed")??;

    let signal = process.signal();
    Ok(RunReport {
        pid,
        state: process.state()?,
        code: process.code(),
        signal: signal.map(|signo| {
            signal_name(signo).map_or_else(|| format!("signal {signo}"), str::to_string)
        }),
        signal_number: signal,
        timed_out,
        started_at,
        elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}

fn relay(mut from: InputStream, mut to: impl Write) -> io::Result<u64> {
    let copied = io::copy(&mut from, &mut to)?;
    to.flush()?;
    Ok(copied)
}

/// Wait for the child, escalating to SIGTERM and then SIGKILL on timeout.
fn wait(
    mut process: Process,
    timeout: Option<Duration>,
    grace: Duration,
) -> Result<(Process, bool)> {
    let result = wait_or_escalate(&mut process, timeout, grace);
    if result.is_err() && process.joinable() {
        warn!("giving up on child {}", process.id());
        process.detach();
    }
    result.map(|timed_out| (process, timed_out))
}

fn wait_or_escalate(
    process: &mut Process,
    timeout: Option<Duration>,
    grace: Duration,
) -> Result<bool> {
    let Some(timeout) = timeout else {
        process.join().context("Failed to wait for process to exit")?;
        return Ok(false);
    };

    if process.try_join_for(timeout)? {
        return Ok(false);
    }

    warn!(
        "child {} still running after {timeout:?}, terminating",
        process.id()
    );
    process.terminate()?;
    if !process.try_join_for(grace)? {
        warn!("child {} ignored SIGTERM, killing", process.id());
        process.kill()?;
        process.join().context("Failed to wait for killed process")?;
    }
    Ok(true)
}
