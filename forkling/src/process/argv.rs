//! Owned argument vectors for executing external programs.

use std::convert::Infallible;
use std::ffi::{CStr, CString};

use nix::unistd::execvp;

use crate::error::{ProcessError, Result};

/// Program name followed by its arguments, each an owned C string.
///
/// Built in the parent before forking so the child only has to call
/// [`ArgVector::exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgVector {
    args: Vec<CString>,
}

impl ArgVector {
    /// Build from a full argument list (`argv[0]` is the program).
    pub fn new<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        let args = args
            .into_iter()
            .map(CString::new)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { args })
    }

    /// Build from a program path and its arguments.
    pub fn with_program<P, I, S>(program: P, args: I) -> Result<Self>
    where
        P: Into<Vec<u8>>,
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        let mut vector = Self::new(args)?;
        vector.args.insert(0, CString::new(program)?);
        Ok(vector)
    }

    pub fn program(&self) -> Option<&CStr> {
        self.args.first().map(CString::as_c_str)
    }

    /// Everything after the program name.
    pub fn args(&self) -> &[CString] {
        self.args.get(1..).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn as_slice(&self) -> &[CString] {
        &self.args
    }

    /// Replace the current process image. Returns only on failure.
    pub fn exec(&self) -> Result<Infallible> {
        let program = self
            .program()
            .ok_or(ProcessError::os("execvp", nix::errno::Errno::ENOENT))?;
        execvp(program, &self.args).map_err(|e| ProcessError::os("execvp", e))
    }
}
