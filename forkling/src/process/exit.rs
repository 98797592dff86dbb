//! Mapping of child closure results to exit codes.

use std::fmt::Display;
use std::io::{self, Write};

/// Exit code used when the child closure panics or reports an error.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code used when an external program cannot be executed.
pub const EXIT_EXEC_FAILED: i32 = 127;

/// Conversion of a child closure's return value into its exit code.
pub trait IntoExitCode {
    fn into_exit_code(self) -> i32;
}

impl IntoExitCode for i32 {
    fn into_exit_code(self) -> i32 {
        self
    }
}

impl IntoExitCode for u8 {
    fn into_exit_code(self) -> i32 {
        i32::from(self)
    }
}

impl IntoExitCode for () {
    fn into_exit_code(self) -> i32 {
        0
    }
}

impl IntoExitCode for bool {
    fn into_exit_code(self) -> i32 {
        if self {
            0
        } else {
            EXIT_FAILURE
        }
    }
}

/// `Err` values are printed to the child's stderr.
impl<T: IntoExitCode, E: Display> IntoExitCode for Result<T, E> {
    fn into_exit_code(self) -> i32 {
        match self {
            Ok(value) => value.into_exit_code(),
            Err(e) => {
                let _ = writeln!(io::stderr(), "error: {e}");
                EXIT_FAILURE
            }
        }
    }
}
