// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `CloudBackend`: the capability set every compute provider implements.
//!
//! Shaped directly after the teacher's `AgentAdapter` trait
//! (`crates/daemon/src/adapters/agent/mod.rs`, since removed — see
//! DESIGN.md): `spawn`→`provision`, `is_alive`→`status`, `kill`→`terminate`,
//! with the same "async-trait, one error enum, default methods where the
//! contract is provider-agnostic" shape.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudBackendError {
    #[error("provisioning failed: {0}")]
    Provisioning(String),
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("duplicate spec already running: {0}")]
    DuplicateSpec(String),
    #[error("provider API error: {0}")]
    Api(String),
}

pub type BackendResult<T> = Result<T, CloudBackendError>;

/// A request to launch one instance for one run.
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub run_id: String,
    pub spec_file: String,
    pub instance_type: String,
    pub use_spot: bool,
    pub max_hours: Option<f64>,
    pub command: Vec<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub gpu_type: Option<String>,
    pub allow_duplicate: bool,
    /// Idempotency token; the same token re-submitted returns the existing
    /// instance instead of provisioning a new one.
    pub client_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub run_id: String,
    pub state: InstanceState,
    pub launched_at: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PollResult {
    pub state: InstanceState,
    pub exit_code: Option<i32>,
    pub heartbeat_age_seconds: Option<i64>,
}

#[async_trait]
pub trait CloudBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Find any live instance already tagged with this spec file, for the
    /// single-flight check in `batch`/the CLI's `run` command.
    async fn find_instances_by_spec(&self, spec_file: &str) -> BackendResult<Vec<InstanceInfo>>;

    async fn provision(&self, spec: &ProvisionSpec) -> BackendResult<InstanceInfo>;

    async fn poll_status(&self, instance_id: &str) -> BackendResult<PollResult>;

    async fn terminate(&self, instance_id: &str) -> BackendResult<()>;

    /// Sync the run's results back to `local_dir`. Default no-op for
    /// backends (like a local dry-run stub) that never produce remote
    /// artifacts.
    async fn pull_results(&self, _run_id: &str, _local_dir: &std::path::Path) -> BackendResult<()> {
        Ok(())
    }

    async fn list_all_tagged(&self) -> BackendResult<Vec<InstanceInfo>>;
}
