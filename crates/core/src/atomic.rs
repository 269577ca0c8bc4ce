// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic JSON file writes: write to a temp file in the same directory,
//! then rename over the destination. A crash or concurrent reader can never
//! observe a half-written state file (registry, service state, batch state,
//! cloud state).

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().ok_or_else(|| Error::fatal("path has no parent directory"))?;
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(".{}.tmp-{}", file_stem(path), std::process::id()));
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("state").to_string()
}

/// Read and parse a JSON file, treating "missing" and "corrupt" the same
/// way the dashboard's registry loader does: fall back to `default`.
pub fn read_json_or_default<T: DeserializeOwned>(path: &Path, default: T) -> T {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(default),
        Err(_) => default,
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| Error::not_found(format!("{}: {e}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Default)]
    struct Doc {
        value: u32,
    }

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &Doc { value: 7 }).expect("write");
        let loaded: Doc = read_json(&path).expect("read");
        assert_eq!(loaded, Doc { value: 7 });
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing.json");
        let loaded: Doc = read_json_or_default(&path, Doc::default());
        assert_eq!(loaded, Doc::default());
    }

    #[test]
    fn corrupt_file_falls_back_to_default() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json").expect("write");
        let loaded: Doc = read_json_or_default(&path, Doc::default());
        assert_eq!(loaded, Doc::default());
    }
}
