// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-variable driven configuration, mirroring
//! `examples/original_source/mcp/server.py::ServerConfig`'s field set and
//! `env_int` helper. CLI flags (parsed by the `ctl` binary with `clap`)
//! override these where both exist; that precedence is applied by the
//! caller, not here — this module only knows how to read the environment.

use std::env;
use std::path::PathBuf;

pub fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

pub fn env_int(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub fn env_path(name: &str) -> Option<PathBuf> {
    env_str(name).map(PathBuf::from)
}

/// Transport the MCP facade should listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

impl Transport {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdio" => Some(Transport::Stdio),
            "http" => Some(Transport::Http),
            _ => None,
        }
    }
}

/// Configuration for the MCP facade (C6), read once at process start.
#[derive(Debug, Clone)]
pub struct McpConfig {
    pub orchestration_kit_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub token: Option<String>,
    pub max_output_bytes: usize,
    pub log_dir: Option<PathBuf>,
    pub transport: Transport,
}

const DEFAULT_MAX_OUTPUT_BYTES: u64 = 32_000;

impl McpConfig {
    /// Build from the environment, using `ORCHESTRATION_KIT_ROOT` as the
    /// only required variable. Panics are never used here: a missing root
    /// is a validation error surfaced to the caller.
    pub fn from_env() -> crate::error::Result<Self> {
        let root = env_path("ORCHESTRATION_KIT_ROOT")
            .ok_or_else(|| crate::error::Error::validation("ORCHESTRATION_KIT_ROOT is required"))?;
        let transport = env_str("ORCHESTRATION_KIT_MCP_TRANSPORT")
            .and_then(|v| Transport::parse(&v))
            .unwrap_or(Transport::Http);
        Ok(Self {
            orchestration_kit_root: root,
            host: env_str("ORCHESTRATION_KIT_MCP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: env_int("ORCHESTRATION_KIT_MCP_PORT", 7341) as u16,
            token: env_str("ORCHESTRATION_KIT_MCP_TOKEN"),
            max_output_bytes: env_int("ORCHESTRATION_KIT_MCP_MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES)
                as usize,
            log_dir: env_path("ORCHESTRATION_KIT_MCP_LOG_DIR"),
            transport,
        })
    }
}

/// Cloud preference: how aggressively to route work off the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudPreference {
    Local,
    CloudFirst,
    CloudAlways,
}

impl CloudPreference {
    pub fn from_env() -> Self {
        match env_str("ORCHESTRATION_KIT_CLOUD_PREFERENCE").as_deref() {
            Some("cloud-first") => CloudPreference::CloudFirst,
            Some("cloud-always") => CloudPreference::CloudAlways,
            _ => CloudPreference::Local,
        }
    }
}

/// Where the kit keeps its small local state files (`.kit` for a greenfield
/// project, `.` for a project vendored into a monorepo).
pub fn kit_state_dir(project_root: &std::path::Path) -> PathBuf {
    match env_path("KIT_STATE_DIR") {
        Some(p) => p,
        None => project_root.join(".kit"),
    }
}

pub fn orchestration_kit_registry_path() -> PathBuf {
    dirs_home().join(".orchestration-kit").join("registry.json")
}

pub fn cloud_state_dir() -> PathBuf {
    dirs_home().join(".orchestration-kit-cloud")
}

fn dirs_home() -> PathBuf {
    env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parses_known_values() {
        assert_eq!(Transport::parse("stdio"), Some(Transport::Stdio));
        assert_eq!(Transport::parse("http"), Some(Transport::Http));
        assert_eq!(Transport::parse("carrier-pigeon"), None);
    }

    #[test]
    fn env_int_falls_back_to_default() {
        assert_eq!(env_int("CTL_TEST_DOES_NOT_EXIST", 42), 42);
    }
}
