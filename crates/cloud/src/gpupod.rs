// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GPU-pod backend.
//!
//! Grounded on `examples/original_source/tools/cloud/backends/runpod.py`:
//! a REST-driven pod provider rather than an AWS API — no SDK, just
//! `reqwest` calls against the provider's GraphQL-over-HTTP endpoint.
//! Tagging and idempotency mirror the AWS backend so the reaper and batch
//! dispatcher stay backend-agnostic.

use crate::backend::{
    BackendResult, CloudBackend, CloudBackendError, InstanceInfo, InstanceState, PollResult,
    ProvisionSpec,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

pub struct GpuPodBackend {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl GpuPodBackend {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), api_base: api_base.into(), api_key: api_key.into() }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct PodResponse {
    id: String,
    #[serde(rename = "desiredStatus")]
    desired_status: String,
    #[serde(rename = "runtime")]
    runtime: Option<PodRuntime>,
}

#[derive(Debug, Deserialize)]
struct PodRuntime {
    #[serde(rename = "exitCode")]
    exit_code: Option<i32>,
}

fn state_from_desired(status: &str) -> InstanceState {
    match status.to_ascii_uppercase().as_str() {
        "RUNNING" => InstanceState::Running,
        "EXITED" | "TERMINATED" => InstanceState::Terminated,
        "CREATED" | "PENDING" => InstanceState::Pending,
        _ => InstanceState::Stopped,
    }
}

#[async_trait]
impl CloudBackend for GpuPodBackend {
    fn name(&self) -> &'static str {
        "gpupod"
    }

    async fn find_instances_by_spec(&self, spec_file: &str) -> BackendResult<Vec<InstanceInfo>> {
        Ok(self
            .list_all_tagged()
            .await?
            .into_iter()
            .filter(|i| i.tags.get("cloud-run:spec").map(|s| s.as_str()) == Some(spec_file))
            .collect())
    }

    async fn provision(&self, spec: &ProvisionSpec) -> BackendResult<InstanceInfo> {
        if !spec.allow_duplicate {
            let existing = self.find_instances_by_spec(&spec.spec_file).await?;
            if !existing.is_empty() {
                return Err(CloudBackendError::DuplicateSpec(spec.spec_file.clone()));
            }
        }

        let gpu_type = spec.gpu_type.clone().unwrap_or_else(|| "A10".to_string());
        let body = serde_json::json!({
            "name": format!("cloud-run-{}", spec.run_id),
            "gpuTypeId": gpu_type,
            "dockerArgs": spec.command.join(" "),
            "idempotenceToken": spec.client_token,
            "env": {
                "RUN_ID": spec.run_id,
                "S3_BUCKET": spec.s3_bucket.clone().unwrap_or_default(),
                "S3_PREFIX": spec.s3_prefix.clone().unwrap_or_default(),
            },
        });

        let resp = self
            .auth(self.client.post(format!("{}/pods", self.api_base)))
            .json(&body)
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CloudBackendError::Provisioning(format!("gpu-pod create failed: {}", resp.status())));
        }
        let pod: PodResponse = resp.json().await.map_err(|e| CloudBackendError::Api(e.to_string()))?;

        let mut tags = BTreeMap::new();
        tags.insert("cloud-run:run-id".to_string(), spec.run_id.clone());
        tags.insert("cloud-run:spec".to_string(), spec.spec_file.clone());
        if let Some(h) = spec.max_hours {
            tags.insert("cloud-run:max-hours".to_string(), h.to_string());
        }
        tags.insert("cloud-run:launched-at".to_string(), chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());

        Ok(InstanceInfo {
            instance_id: pod.id,
            run_id: spec.run_id.clone(),
            state: state_from_desired(&pod.desired_status),
            launched_at: tags.get("cloud-run:launched-at").cloned().unwrap_or_default(),
            tags,
        })
    }

    async fn poll_status(&self, instance_id: &str) -> BackendResult<PollResult> {
        let resp = self
            .auth(self.client.get(format!("{}/pods/{instance_id}", self.api_base)))
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CloudBackendError::NotFound(instance_id.to_string()));
        }
        let pod: PodResponse = resp.json().await.map_err(|e| CloudBackendError::Api(e.to_string()))?;
        let state = state_from_desired(&pod.desired_status);
        let exit_code = pod.runtime.and_then(|r| r.exit_code);
        Ok(PollResult { state, exit_code, heartbeat_age_seconds: None })
    }

    async fn terminate(&self, instance_id: &str) -> BackendResult<()> {
        let resp = self
            .auth(self.client.delete(format!("{}/pods/{instance_id}", self.api_base)))
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(CloudBackendError::Api(format!("gpu-pod terminate failed: {}", resp.status())));
        }
        Ok(())
    }

    async fn list_all_tagged(&self) -> BackendResult<Vec<InstanceInfo>> {
        let resp = self
            .auth(self.client.get(format!("{}/pods", self.api_base)))
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        let pods: Vec<PodResponse> = resp.json().await.map_err(|e| CloudBackendError::Api(e.to_string()))?;
        Ok(pods
            .into_iter()
            .map(|pod| InstanceInfo {
                instance_id: pod.id,
                run_id: String::new(),
                state: state_from_desired(&pod.desired_status),
                launched_at: String::new(),
                tags: BTreeMap::new(),
            })
            .collect())
    }
}
