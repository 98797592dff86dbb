//! Command line front-end.

mod args;
mod commands;

pub use args::{Cli, Commands};
pub use commands::{execute, run, Identity, RunOptions, RunReport};
