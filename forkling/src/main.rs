//! Forkling - run programs in managed child processes.
//!
//! Thin binary over the `forkling` library: `forkling run` spawns a program
//! through a process handle and relays its output, `forkling whoami` shows
//! process ids.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use forkling::cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    execute(cli).await
}
