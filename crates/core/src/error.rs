// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the control plane resolves to one of five
//! kinds. Component crates define their own precise error enums and convert
//! into this one at the boundary, so a caller that only needs to pick a
//! JSON-RPC error code never has to match on component internals.

use thiserror::Error;

/// Top-level error kind shared by every component.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: bad arguments, unknown tool, invalid JSON.
    #[error("validation: {0}")]
    Validation(String),

    /// The referenced project, run, request, or artifact does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation was rejected because it would create a duplicate
    /// (e.g. launching a spec that already has a live instance).
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A cloud provisioning call failed after retries.
    #[error("provisioning: {0}")]
    Provisioning(String),

    /// Unrecoverable local condition: corrupt state, missing roots, I/O
    /// failure on a file the caller has no way to fix.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Fatal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
