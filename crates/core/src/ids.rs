// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier construction for every entity in the data model.
//!
//! Unlike the teacher's fixed-width `IdBuf`/`define_id!` (23-byte
//! `{prefix}{19-char-nanoid}` ids), every id here is timestamp-prefixed and
//! variable length, matching the original tool's formats exactly:
//!
//! - `project_id`  = first 12 hex chars of `sha1(orchestration_kit_root)`
//! - `run_id`       = `{YYYYMMDDTHHMMSSZ}-{8 hex}`
//! - `request_id`   = `rq-{YYYYMMDDTHHMMSSZ}-{6 hex}`
//! - `batch_id`     = `batch-{YYYYMMDDTHHMMSSZ}-{8 hex}`

use crate::clock::Clock;
use nanoid::nanoid;
use sha1::{Digest, Sha1};

const HEX_ALPHABET: [char; 16] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f'];

fn hex_suffix(len: usize) -> String {
    nanoid!(len, &HEX_ALPHABET)
}

/// Derive a project id from its orchestration-kit root path.
///
/// The path is used as given (callers are expected to have already
/// canonicalized it); hashing a relative vs. absolute path on purpose
/// produces different ids, matching the original registry's behavior of
/// keying on whatever root string was registered.
pub fn project_id(orchestration_kit_root: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(orchestration_kit_root.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..12].to_string()
}

pub fn run_id(clock: &impl Clock) -> String {
    format!("{}-{}", clock.now_compact(), hex_suffix(8))
}

pub fn request_id(clock: &impl Clock) -> String {
    format!("rq-{}-{}", clock.now_compact(), hex_suffix(6))
}

pub fn batch_id(clock: &impl Clock) -> String {
    format!("batch-{}-{}", clock.now_compact(), hex_suffix(8))
}

/// Stable idempotency token for cloud provisioning calls, derived from a
/// run id. Providers cap client tokens at 64 bytes; ours never gets close
/// but we truncate defensively to match the original's stated contract.
pub fn cloud_client_token(run_id: &str) -> String {
    let token = format!("cloud-run-{run_id}");
    if token.len() > 64 {
        token[..64].to_string()
    } else {
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn project_id_is_twelve_hex_chars() {
        let id = project_id("/home/user/repo");
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn project_id_is_stable() {
        assert_eq!(project_id("/a/b"), project_id("/a/b"));
        assert_ne!(project_id("/a/b"), project_id("/a/c"));
    }

    #[test]
    fn run_id_has_expected_shape() {
        let clock = FakeClock::at(0);
        let id = run_id(&clock);
        assert_eq!(id, format!("19700101T000000Z-{}", &id[18..]));
        assert_eq!(id.len(), 17 + 1 + 8);
    }

    #[test]
    fn request_and_batch_id_prefixes() {
        let clock = FakeClock::at(0);
        assert!(request_id(&clock).starts_with("rq-19700101T000000Z-"));
        assert!(batch_id(&clock).starts_with("batch-19700101T000000Z-"));
    }

    #[test]
    fn cloud_client_token_is_bounded() {
        let long_run_id = "x".repeat(100);
        assert!(cloud_client_token(&long_run_id).len() <= 64);
    }
}
