// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data model shared by every component: projects, runs, requests, batches,
//! and cloud run state. Field names and optionality follow
//! `examples/original_source/dashboard/parsing.py::parse_run` and
//! `tools/cloud/*.py` exactly so the index schema and JSON file formats stay
//! faithful to the system this control plane replaces.

use serde::{Deserialize, Serialize};

/// One of the three workflow families a run or request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kit {
    Tdd,
    Research,
    Math,
}

impl Kit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kit::Tdd => "tdd",
            Kit::Research => "research",
            Kit::Math => "math",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tdd" => Some(Kit::Tdd),
            "research" => Some(Kit::Research),
            "math" => Some(Kit::Math),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Ok,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "ok" => Some(RunStatus::Ok),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    /// Derive status from the (finished_at, exit_code) pair per
    /// SPEC_FULL.md §3's run invariants.
    pub fn derive(finished_at: &Option<String>, exit_code: Option<i32>) -> Self {
        match finished_at {
            None => RunStatus::Running,
            Some(_) => {
                if exit_code == Some(0) {
                    RunStatus::Ok
                } else {
                    RunStatus::Failed
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Confirmed,
    Refuted,
    Inconclusive,
}

impl Verdict {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CONFIRMED" => Some(Verdict::Confirmed),
            "REFUTED" => Some(Verdict::Refuted),
            "INCONCLUSIVE" => Some(Verdict::Inconclusive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Confirmed => "CONFIRMED",
            Verdict::Refuted => "REFUTED",
            Verdict::Inconclusive => "INCONCLUSIVE",
        }
    }
}

/// A registered orchestration-kit workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub label: String,
    pub orchestration_kit_root: String,
    pub project_root: String,
    pub registered_at: String,
    pub updated_at: String,
}

/// One execution of one phase of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Run {
    pub project_id: String,
    pub run_id: String,
    pub parent_run_id: Option<String>,
    pub kit: Option<String>,
    pub phase: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub exit_code: Option<i32>,
    pub status: Option<String>,
    pub capsule_path: Option<String>,
    pub manifest_path: Option<String>,
    pub log_path: Option<String>,
    pub events_path: Option<String>,
    pub cwd: Option<String>,
    pub project_root: Option<String>,
    pub orchestration_kit_root: Option<String>,
    pub agent_runtime: Option<String>,
    pub host: Option<String>,
    pub pid: Option<i64>,
    pub reasoning: Option<String>,
    pub experiment_name: Option<String>,
    pub verdict: Option<String>,
}

impl Run {
    pub fn new(project_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self { project_id: project_id.into(), run_id: run_id.into(), ..Default::default() }
    }

    pub fn duration_seconds(&self, now_iso: &str) -> Option<i64> {
        let started = self.started_at.as_deref()?;
        let end = self.finished_at.as_deref().unwrap_or(now_iso);
        let started = chrono::DateTime::parse_from_rfc3339(started).ok()?;
        let end = chrono::DateTime::parse_from_rfc3339(end).ok()?;
        Some((end - started).num_seconds())
    }

    /// `status=running AND duration>1800s`: a read-time flag for runs
    /// that have been going unusually long, independent of whether the
    /// owning process is even still alive.
    pub fn is_stale(&self, now_iso: &str) -> bool {
        self.status.as_deref() == Some("running")
            && self.duration_seconds(now_iso).map(|d| d > 1800).unwrap_or(false)
    }

    /// `status=running AND host==localhost AND kill(pid,0)==ESRCH`: the
    /// run claims to still be going but its process is provably dead.
    /// Complementary to `gc`, which is the write-side remediation for the
    /// same condition.
    pub fn is_orphaned(&self, pid_is_alive: impl Fn(i64) -> bool) -> bool {
        if self.status.as_deref() != Some("running") {
            return false;
        }
        let is_local = self.host.as_deref().map(|h| h == "localhost" || h == "127.0.0.1").unwrap_or(true);
        if !is_local {
            return false;
        }
        match self.pid {
            Some(pid) => !pid_is_alive(pid),
            None => false,
        }
    }
}

/// A proposed cross-kit handoff, materialized as a request/response file
/// pair and indexed from the `request_enqueued`/`request_completed` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Request {
    pub project_id: String,
    pub request_id: String,
    pub parent_run_id: Option<String>,
    pub child_run_id: Option<String>,
    pub from_kit: Option<String>,
    pub from_phase: Option<String>,
    pub to_kit: Option<String>,
    pub to_phase: Option<String>,
    pub action: Option<String>,
    pub status: Option<String>,
    pub request_path: Option<String>,
    pub response_path: Option<String>,
    pub enqueued_ts: Option<String>,
    pub completed_ts: Option<String>,
    pub reasoning: Option<String>,
}

/// Read-budget contract attached to a request file: advisory to the child
/// workflow, recorded (not enforced) by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadBudget {
    #[serde(default = "default_max_files")]
    pub max_files: u32,
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

fn default_max_files() -> u32 {
    20
}

fn default_max_total_bytes() -> u64 {
    2_000_000
}

impl Default for ReadBudget {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_total_bytes: default_max_total_bytes(),
            allowed_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// The full on-disk request document written under `interop/requests/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFile {
    pub request_id: String,
    pub parent_run_id: String,
    pub from_kit: String,
    pub from_phase: String,
    pub to_kit: String,
    pub to_phase: String,
    pub action: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub must_read: Vec<String>,
    #[serde(default)]
    pub read_budget: ReadBudget,
    #[serde(default)]
    pub deliverables_expected: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    pub reasoning: Option<String>,
    pub enqueued_ts: String,
}

/// The response document written under `interop/responses/` on pump
/// completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFile {
    pub request_id: String,
    pub child_run_id: String,
    pub status: String,
    pub capsule_path: Option<String>,
    pub manifest_path: Option<String>,
    pub completed_ts: String,
}

/// A parent container for N parallel cloud runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Batch {
    pub batch_id: String,
    pub specs: Vec<String>,
    pub runs: std::collections::BTreeMap<String, String>,
    pub status: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub max_instances: u32,
    #[serde(default)]
    pub results: std::collections::BTreeMap<String, String>,
}

/// Lifecycle of a single cloud-provisioned run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CloudRunStatus {
    #[default]
    Pending,
    Provisioning,
    Running,
    Completed,
    Failed,
    Terminated,
    BlockedDuplicate,
    DryRun,
    TerminatedNoResults,
}

impl CloudRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CloudRunStatus::Completed
                | CloudRunStatus::Failed
                | CloudRunStatus::Terminated
                | CloudRunStatus::BlockedDuplicate
                | CloudRunStatus::DryRun
                | CloudRunStatus::TerminatedNoResults
        )
    }
}

/// Global per-run cloud state, one file per live run under
/// `~/.orchestration-kit-cloud/runs/{run_id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CloudRunState {
    pub run_id: String,
    pub backend: String,
    pub instance_type: String,
    pub command: Vec<String>,
    pub spec_file: Option<String>,
    pub project_root: String,
    #[serde(default)]
    pub data_dirs: Vec<String>,
    pub sync_back: Option<String>,
    pub local_results_dir: Option<String>,
    pub s3_prefix: Option<String>,
    pub use_spot: bool,
    pub max_hours: Option<f64>,
    pub started_at: String,
    pub status: CloudRunStatus,
    pub instance_id: Option<String>,
    pub exit_code: Option<i32>,
    pub finished_at: Option<String>,
    pub batch_id: Option<String>,
}

/// Per-project mirror of live cloud runs at `.kit/cloud-state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectCloudState {
    pub active_runs: std::collections::BTreeMap<String, ActiveCloudRun>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCloudRun {
    pub instance_id: String,
    pub backend: String,
    pub instance_type: String,
    pub spec_file: Option<String>,
    pub launched_at: String,
    pub max_hours: Option<f64>,
    pub registered_at: String,
    pub batch_id: Option<String>,
}

/// Service state for any long-running HTTP service owned by the control
/// plane (the MCP facade, when launched in background mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    pub pid: u32,
    pub host: String,
    pub port: u16,
    pub token_file: Option<String>,
    pub started_at: String,
    pub log_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_derivation_matches_invariants() {
        assert_eq!(RunStatus::derive(&None, None), RunStatus::Running);
        assert_eq!(RunStatus::derive(&Some("x".into()), Some(0)), RunStatus::Ok);
        assert_eq!(RunStatus::derive(&Some("x".into()), Some(1)), RunStatus::Failed);
        assert_eq!(RunStatus::derive(&Some("x".into()), None), RunStatus::Failed);
    }

    #[test]
    fn priority_ranks_high_above_low() {
        assert!(Priority::High.rank() > Priority::Normal.rank());
        assert!(Priority::Normal.rank() > Priority::Low.rank());
    }

    #[test]
    fn cloud_run_status_terminal_set() {
        assert!(CloudRunStatus::Completed.is_terminal());
        assert!(!CloudRunStatus::Running.is_terminal());
    }

    #[test]
    fn is_orphaned_true_for_dead_local_pid_false_for_live_one() {
        let mut run = Run::new("p1", "r1");
        run.status = Some("running".to_string());
        run.host = Some("localhost".to_string());
        run.pid = Some(2_147_483_646);
        assert!(run.is_orphaned(|_| false));

        run.pid = Some(1);
        assert!(!run.is_orphaned(|_| true));
    }

    #[test]
    fn is_orphaned_false_when_not_running_or_remote() {
        let mut run = Run::new("p1", "r1");
        run.status = Some("ok".to_string());
        run.host = Some("localhost".to_string());
        run.pid = Some(2_147_483_646);
        assert!(!run.is_orphaned(|_| false));

        run.status = Some("running".to_string());
        run.host = Some("10.0.0.5".to_string());
        assert!(!run.is_orphaned(|_| false));
    }

    #[test]
    fn is_stale_requires_running_and_half_hour_elapsed() {
        let mut run = Run::new("p1", "r1");
        run.status = Some("running".to_string());
        run.started_at = Some("2026-01-01T00:00:00Z".to_string());
        assert!(!run.is_stale("2026-01-01T00:10:00Z"));
        assert!(run.is_stale("2026-01-01T01:00:00Z"));
    }
}
