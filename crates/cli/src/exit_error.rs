// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Custom error type that carries a process exit code.
//!
//! Commands return `ExitError` instead of calling `std::process::exit()`
//! directly, allowing `main()` to handle process termination. Codes follow
//! `0` success, `1` generic failure, `2` argument error, `137`
//! reaped/terminated-without-results.

use std::fmt;

pub const EXIT_GENERIC_FAILURE: i32 = 1;
pub const EXIT_ARGUMENT_ERROR: i32 = 2;
pub const EXIT_REAPED: i32 = 137;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(EXIT_GENERIC_FAILURE, message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(EXIT_ARGUMENT_ERROR, message)
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<ctl_core::Error> for ExitError {
    fn from(e: ctl_core::Error) -> Self {
        match e {
            ctl_core::Error::Validation(msg) => ExitError::argument(msg),
            other => ExitError::generic(other.to_string()),
        }
    }
}
