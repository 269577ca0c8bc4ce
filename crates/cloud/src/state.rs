// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk cloud state.
//!
//! Grounded on `examples/original_source/tools/cloud/state.py`: one state
//! file per run under a global directory (rather than one giant shared
//! file — avoids write contention across concurrently reaped runs, per
//! SPEC_FULL.md §3), plus a per-project `cloud-state.json` summarizing
//! active runs for that project, and a batch state directory keyed by
//! batch id.

use crate::backend::InstanceState;
use ctl_core::atomic::{read_json_or_default, write_json_atomic};
use ctl_core::error::Result;
use ctl_core::model::{Batch, CloudRunState, CloudRunStatus, ProjectCloudState};
use std::path::{Path, PathBuf};

/// `~/.orchestration-kit-cloud/runs/{run_id}.json`
pub struct CloudStateStore {
    root: PathBuf,
}

impl CloudStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    pub fn load(&self, run_id: &str) -> CloudRunState {
        read_json_or_default(&self.run_path(run_id), CloudRunState::default())
    }

    pub fn save(&self, state: &CloudRunState) -> Result<()> {
        let path = self.run_path(&state.run_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_json_atomic(&path, state)
    }

    pub fn list_all(&self) -> Vec<CloudRunState> {
        let Ok(entries) = std::fs::read_dir(self.runs_dir()) else { return Vec::new() };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| {
                let state: CloudRunState = read_json_or_default(&e.path(), CloudRunState::default());
                if state.run_id.is_empty() { None } else { Some(state) }
            })
            .collect()
    }

    pub fn remove(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All states not yet in a terminal instance state, for the reaper's
    /// sweep.
    pub fn active(&self) -> Vec<CloudRunState> {
        self.list_all().into_iter().filter(|s| !s.status.is_terminal()).collect()
    }
}

/// `.kit/cloud-state.json`, one per project root.
pub struct ProjectCloudStateStore {
    path: PathBuf,
}

impl ProjectCloudStateStore {
    pub fn at(kit_state_dir: impl AsRef<Path>) -> Self {
        Self { path: kit_state_dir.as_ref().join("cloud-state.json") }
    }

    pub fn load(&self) -> ProjectCloudState {
        read_json_or_default(&self.path, ProjectCloudState::default())
    }

    pub fn save(&self, state: &ProjectCloudState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }
}

/// `.kit/batches/{batch_id}.json`
pub struct BatchStateStore {
    dir: PathBuf,
}

impl BatchStateStore {
    pub fn at(kit_state_dir: impl AsRef<Path>) -> Self {
        Self { dir: kit_state_dir.as_ref().join("batches") }
    }

    fn path(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{batch_id}.json"))
    }

    pub fn load(&self, batch_id: &str) -> Batch {
        read_json_or_default(&self.path(batch_id), Batch::default())
    }

    pub fn save(&self, batch: &Batch) -> Result<()> {
        let path = self.path(&batch.batch_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_json_atomic(&path, batch)
    }

    pub fn list_all(&self) -> Vec<Batch> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else { return Vec::new() };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
            .filter_map(|e| {
                let batch: Batch = read_json_or_default(&e.path(), Batch::default());
                if batch.batch_id.is_empty() { None } else { Some(batch) }
            })
            .collect()
    }
}

pub fn instance_state_label(state: &InstanceState) -> &'static str {
    match state {
        InstanceState::Pending => "pending",
        InstanceState::Running => "running",
        InstanceState::Stopping => "stopping",
        InstanceState::Stopped => "stopped",
        InstanceState::Terminated => "terminated",
    }
}

/// Map a raw instance poll into the run-level status taxonomy. A
/// terminated instance is only `Completed` if it exited zero; otherwise
/// `Failed`.
pub fn status_from_poll(state: &InstanceState, exit_code: Option<i32>) -> CloudRunStatus {
    match state {
        InstanceState::Pending => CloudRunStatus::Provisioning,
        InstanceState::Running => CloudRunStatus::Running,
        InstanceState::Stopping | InstanceState::Stopped => CloudRunStatus::Running,
        InstanceState::Terminated => match exit_code {
            Some(0) => CloudRunStatus::Completed,
            Some(_) => CloudRunStatus::Failed,
            None => CloudRunStatus::TerminatedNoResults,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn run_state_round_trips_and_defaults_when_missing() {
        let dir = tempdir().expect("tempdir");
        let store = CloudStateStore::new(dir.path());
        assert_eq!(store.load("nope").run_id, "");

        let mut state = CloudRunState::default();
        state.run_id = "R1".to_string();
        state.instance_id = Some("i-123".to_string());
        store.save(&state).expect("save");

        let loaded = store.load("R1");
        assert_eq!(loaded.instance_id.as_deref(), Some("i-123"));
        assert_eq!(store.list_all().len(), 1);
    }

    #[test]
    fn active_excludes_terminated() {
        let dir = tempdir().expect("tempdir");
        let store = CloudStateStore::new(dir.path());

        let mut alive = CloudRunState::default();
        alive.run_id = "R1".to_string();
        alive.status = CloudRunStatus::Running;
        store.save(&alive).expect("save alive");

        let mut dead = CloudRunState::default();
        dead.run_id = "R2".to_string();
        dead.status = CloudRunStatus::Terminated;
        store.save(&dead).expect("save dead");

        let active = store.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].run_id, "R1");
    }

    #[test]
    fn batch_store_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = BatchStateStore::at(dir.path());
        let mut batch = Batch::default();
        batch.batch_id = "batch-1".to_string();
        store.save(&batch).expect("save");
        assert_eq!(store.load("batch-1").batch_id, "batch-1");
        assert_eq!(store.list_all().len(), 1);
    }
}
