//! CLI argument definitions.

use clap::{Parser, Subcommand};

/// Forkling - run programs in managed child processes
#[derive(Parser, Debug)]
#[command(name = "forkling")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program in a child process and relay its output
    Run {
        /// Terminate the child if it has not exited after this many milliseconds
        #[arg(long, env = "FORKLING_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Time between SIGTERM and SIGKILL once the timeout has passed
        #[arg(long, env = "FORKLING_GRACE_MS", default_value = "2000")]
        grace_ms: u64,

        /// Copy our stdin to the child (otherwise the child sees end of input)
        #[arg(long)]
        forward_stdin: bool,

        /// Print a JSON report after the child finishes
        #[arg(long)]
        json: bool,

        /// Program to run, followed by its arguments
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            required = true,
            num_args = 1..
        )]
        command: Vec<String>,
    },

    /// Show the current and parent process ids
    Whoami {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}
