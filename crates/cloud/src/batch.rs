// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batch dispatch: provision N specs under one shared cap, poll them to
//! completion, pull results.
//!
//! Grounded on `examples/original_source/tools/cloud/batch.py`
//! (`launch_batch`/`poll_batch`/`pull_batch`/`list_batches`). The original's
//! `first_poll` boolean (skip the first sleep) is replaced here by a
//! `tokio::time::interval`, whose first tick fires immediately — the
//! same effect without a mutable flag threaded through the loop.

use crate::backend::{CloudBackend, ProvisionSpec};
use crate::preflight::{decide, ComputeProfile, CostTable, Recommendation};
use crate::state::BatchStateStore;
use ctl_core::clock::Clock;
use ctl_core::config::CloudPreference;
use ctl_core::error::{Error, Result};
use ctl_core::ids;
use ctl_core::model::Batch;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(30);

pub struct BatchSpec {
    pub spec_file: String,
    pub instance_type: String,
    pub use_spot: bool,
    pub max_hours: Option<f64>,
    pub command: Vec<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub compute_profile: Option<ComputeProfile>,
}

pub struct CostEstimate {
    pub total: f64,
    pub skipped_without_profile: Vec<String>,
}

/// Estimate total cost across specs that carry a compute profile; specs
/// without one are skipped (not failed) and reported separately.
pub fn estimate_cost(specs: &[BatchSpec], preference: CloudPreference, costs: &CostTable) -> CostEstimate {
    let mut total = 0.0;
    let mut skipped = Vec::new();
    for spec in specs {
        match &spec.compute_profile {
            Some(profile) => {
                let decision = decide(profile, preference, costs);
                if decision.recommendation == Recommendation::Remote {
                    total += decision.est_cost.unwrap_or(0.0);
                }
            }
            None => skipped.push(spec.spec_file.clone()),
        }
    }
    CostEstimate { total, skipped_without_profile: skipped }
}

pub struct BatchDispatcher<C: Clock> {
    clock: C,
    store: BatchStateStore,
}

impl<C: Clock> BatchDispatcher<C> {
    pub fn new(clock: C, store: BatchStateStore) -> Self {
        Self { clock, store }
    }

    /// Provision every spec (up to `max_instances`), save initial batch
    /// state, and return the batch id. Does not poll — call
    /// [`Self::poll_until_done`] separately so a caller can detach.
    pub async fn launch(
        &self,
        backend: &dyn CloudBackend,
        specs: Vec<BatchSpec>,
        max_instances: u32,
        max_cost: Option<f64>,
        preference: CloudPreference,
    ) -> Result<Batch> {
        if specs.len() as u32 > max_instances {
            return Err(Error::validation(format!(
                "{} specs exceeds max_instances {max_instances}",
                specs.len()
            )));
        }
        if let Some(cap) = max_cost {
            let estimate = estimate_cost(&specs, preference, &CostTable::default());
            if !estimate.skipped_without_profile.is_empty() {
                warn!(skipped = ?estimate.skipped_without_profile, "specs without a compute profile excluded from cost estimate");
            }
            if estimate.total > cap {
                return Err(Error::validation(format!(
                    "estimated cost {:.2} exceeds max_cost {:.2}",
                    estimate.total, cap
                )));
            }
        }

        let batch_id = ids::batch_id(&self.clock);
        let mut runs = BTreeMap::new();
        for spec in &specs {
            let run_id = ids::run_id(&self.clock);
            let client_token = ids::cloud_client_token(&run_id);
            let provision_spec = ProvisionSpec {
                run_id: run_id.clone(),
                spec_file: spec.spec_file.clone(),
                instance_type: spec.instance_type.clone(),
                use_spot: spec.use_spot,
                max_hours: spec.max_hours,
                command: spec.command.clone(),
                s3_bucket: spec.s3_bucket.clone(),
                s3_prefix: spec.s3_prefix.clone(),
                gpu_type: None,
                allow_duplicate: false,
                client_token,
            };
            match backend.provision(&provision_spec).await {
                Ok(info) => {
                    runs.insert(run_id, info.instance_id);
                }
                Err(e) => {
                    warn!(spec = %spec.spec_file, error = %e, "batch spec failed to provision");
                }
            }
        }

        let batch = Batch {
            batch_id: batch_id.clone(),
            specs: specs.iter().map(|s| s.spec_file.clone()).collect(),
            runs,
            status: "running".to_string(),
            started_at: self.clock.now_iso(),
            finished_at: None,
            max_instances,
            results: BTreeMap::new(),
        };
        self.store.save(&batch)?;
        info!(batch_id = %batch.batch_id, runs = batch.runs.len(), "batch launched");
        Ok(batch)
    }

    /// Poll every pending run in `batch_id` until all reach a terminal
    /// state, pulling results as each completes. First tick fires
    /// immediately.
    pub async fn poll_until_done(&self, backend: &dyn CloudBackend, batch_id: &str, results_root: &std::path::Path) -> Result<Batch> {
        let mut batch = self.store.load(batch_id);
        if batch.batch_id.is_empty() {
            return Err(Error::not_found(format!("batch {batch_id} not found")));
        }

        let mut pending: Vec<(String, String)> =
            batch.runs.iter().map(|(run_id, instance_id)| (run_id.clone(), instance_id.clone())).collect();
        let mut interval = tokio::time::interval(POLL_INTERVAL);
        let mut any_failed = false;

        while !pending.is_empty() {
            interval.tick().await;
            let mut still_pending = Vec::new();
            for (run_id, instance_id) in pending {
                let poll = backend
                    .poll_status(&instance_id)
                    .await
                    .map_err(|e| Error::fatal(e.to_string()))?;
                if poll.state.clone() == crate::backend::InstanceState::Terminated {
                    let local_dir = results_root.join(&run_id);
                    if let Err(e) = backend.pull_results(&run_id, &local_dir).await {
                        warn!(%run_id, error = %e, "failed to pull batch run results");
                    }
                    any_failed = any_failed || poll.exit_code != Some(0);
                    batch.results.insert(run_id, local_dir.to_string_lossy().to_string());
                } else {
                    still_pending.push((run_id, instance_id));
                }
            }
            pending = still_pending;
            self.store.save(&batch)?;
        }

        batch.status = if any_failed { "partial".to_string() } else { "completed".to_string() };
        batch.finished_at = Some(self.clock.now_iso());
        self.store.save(&batch)?;
        Ok(batch)
    }

    /// Live status snapshot without mutating stored state.
    pub fn poll_snapshot(&self, batch_id: &str) -> Batch {
        self.store.load(batch_id)
    }

    /// Most-recent-first by `started_at`.
    pub fn list_batches(&self) -> Vec<Batch> {
        let mut all = self.store.list_all();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// Pull results only for runs already completed-but-unpulled.
    pub async fn pull_batch(&self, backend: &dyn CloudBackend, batch_id: &str, results_root: &std::path::Path) -> Result<usize> {
        let mut batch = self.store.load(batch_id);
        if batch.batch_id.is_empty() {
            return Err(Error::not_found(format!("batch {batch_id} not found")));
        }
        let mut pulled = 0;
        for (run_id, _instance_id) in batch.runs.clone() {
            if batch.results.contains_key(&run_id) {
                continue;
            }
            let local_dir: PathBuf = results_root.join(&run_id);
            backend.pull_results(&run_id, &local_dir).await.map_err(|e| Error::fatal(e.to_string()))?;
            batch.results.insert(run_id, local_dir.to_string_lossy().to_string());
            pulled += 1;
        }
        if pulled > 0 {
            self.store.save(&batch)?;
        }
        Ok(pulled)
    }
}
