// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess supervision primitives for the lifecycle engine.
//!
//! Grounded on the teacher's `AgentAdapter` trait (spawn/kill/is_alive
//! shape) and on `examples/original_source/tests/test_hook_reentry_guard.py`
//! for the reentrancy guard, which is a single process-wide boolean checked
//! once at entry rather than a counted lock: a nested invocation delegates
//! instead of erroring.

use ctl_core::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

pub const HOOK_ACTIVE_ENV: &str = "ORCHESTRATION_KIT_HOOK_ACTIVE";

/// Outcome of attempting to enter the hook guard.
pub enum HookEntry {
    /// This call owns the guard; `_guard` releases it on drop.
    Entered,
    /// A guard is already active; the caller should not spawn another
    /// nested phase and should return a `delegated: true` marker instead.
    Delegated,
}

/// Checks and sets the reentrancy guard for the current process. Because
/// std::env mutation is process-wide and not thread-safe to read/write
/// concurrently, callers are expected to hold this for the lifetime of one
/// spawn attempt on a single-threaded control path (the lifecycle engine
/// serializes launches).
pub fn enter_hook_guard() -> HookEntry {
    if std::env::var(HOOK_ACTIVE_ENV).is_ok() {
        return HookEntry::Delegated;
    }
    std::env::set_var(HOOK_ACTIVE_ENV, "1");
    HookEntry::Entered
}

pub fn exit_hook_guard() {
    std::env::remove_var(HOOK_ACTIVE_ENV);
}

/// Parameters for launching one workflow phase as a supervised child
/// process.
pub struct SpawnParams<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    pub cwd: &'a Path,
    pub launch_log: &'a Path,
    pub env: &'a [(String, String)],
}

/// Spawn a phase process in its own session so that signals delivered to
/// the control plane do not cascade to it, redirecting stdout+stderr to a
/// per-run launch log for post-mortem.
pub fn spawn_background(params: SpawnParams<'_>) -> Result<Child> {
    let log_file = std::fs::File::create(params.launch_log)
        .map_err(|e| Error::fatal(format!("opening launch log: {e}")))?;
    let log_file_err = log_file
        .try_clone()
        .map_err(|e| Error::fatal(format!("cloning launch log handle: {e}")))?;

    let mut cmd = Command::new(params.program);
    cmd.args(params.args)
        .current_dir(params.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err));
    for (k, v) in params.env {
        cmd.env(k, v);
    }
    unsafe {
        cmd.pre_exec(|| {
            // Detach into a new session so the child survives/ignores
            // signals sent to our process group.
            nix::unistd::setsid().map(|_| ()).map_err(std::io::Error::from)
        });
    }
    cmd.spawn().map_err(|e| Error::fatal(format!("spawning phase process: {e}")))
}

/// True if a PID is alive on the local host (`kill(pid, 0)` semantics).
pub fn pid_is_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    nix::sys::signal::kill(pid, None).is_ok()
}

pub fn kill_pid(pid: i64, signal: nix::sys::signal::Signal) -> Result<()> {
    let pid = nix::unistd::Pid::from_raw(pid as i32);
    nix::sys::signal::kill(pid, signal)
        .map_err(|e| Error::fatal(format!("kill({pid}, {signal}): {e}")))
}

/// Standard environment every spawned phase process receives in addition
/// to its inherited environment.
pub fn standard_env(
    orchestration_kit_root: &Path,
    project_root: &Path,
    kit_state_dir: &Path,
) -> Vec<(String, String)> {
    vec![
        ("ORCHESTRATION_KIT_ROOT".to_string(), orchestration_kit_root.to_string_lossy().to_string()),
        ("PROJECT_ROOT".to_string(), project_root.to_string_lossy().to_string()),
        ("KIT_STATE_DIR".to_string(), kit_state_dir.to_string_lossy().to_string()),
    ]
}

pub fn env_map(env: &[(String, String)]) -> HashMap<String, String> {
    env.iter().cloned().collect()
}

pub fn default_launch_log_path(run_root: &Path, run_id: &str) -> PathBuf {
    run_root.join(format!("{run_id}.launch.log"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn hook_guard_delegates_on_reentry() {
        std::env::remove_var(HOOK_ACTIVE_ENV);
        match enter_hook_guard() {
            HookEntry::Entered => {}
            HookEntry::Delegated => panic!("first entry must succeed"),
        }
        match enter_hook_guard() {
            HookEntry::Entered => panic!("nested entry must delegate"),
            HookEntry::Delegated => {}
        }
        exit_hook_guard();
        match enter_hook_guard() {
            HookEntry::Entered => {}
            HookEntry::Delegated => panic!("entry after exit must succeed"),
        }
        exit_hook_guard();
    }

    #[test]
    fn pid_is_alive_detects_self() {
        let pid = std::process::id() as i64;
        assert!(pid_is_alive(pid));
    }

    #[test]
    fn pid_is_alive_false_for_dead_pid() {
        // A pid this large is virtually guaranteed not to exist.
        assert!(!pid_is_alive(2_147_483_646));
    }
}
