// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! EC2/S3 cloud backend.
//!
//! Grounded on `examples/original_source/tools/cloud/backends/aws.py`
//! (referenced throughout `reaper.py`, `batch.py`, `preflight.py`): tag-based
//! discovery (`cloud-run:launched-at`, `cloud-run:spec`, `cloud-run:max-hours`),
//! client-token idempotency, and a spot-with-on-demand-fallback provisioning
//! strategy.

use crate::backend::{
    BackendResult, CloudBackend, CloudBackendError, InstanceInfo, InstanceState, PollResult,
    ProvisionSpec,
};
use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, InstanceStateName, ResourceType, Tag, TagSpecification};
use std::collections::BTreeMap;

pub struct AwsBackend {
    ec2: aws_sdk_ec2::Client,
    s3: aws_sdk_s3::Client,
    region: String,
    bucket: String,
}

impl AwsBackend {
    pub async fn from_env(bucket: String) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let region = config.region().map(|r| r.to_string()).unwrap_or_else(|| "us-east-1".to_string());
        Self {
            ec2: aws_sdk_ec2::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            region,
            bucket,
        }
    }

    fn tag_specifications(spec: &ProvisionSpec) -> Vec<TagSpecification> {
        let tags = vec![
            Tag::builder().key("cloud-run:run-id").value(&spec.run_id).build(),
            Tag::builder().key("cloud-run:spec").value(short(&spec.spec_file, 256)).build(),
            Tag::builder()
                .key("cloud-run:max-hours")
                .value(spec.max_hours.map(|h| h.to_string()).unwrap_or_default())
                .build(),
            Tag::builder().key("cloud-run:launched-at").value(iso_now()).build(),
            Tag::builder().key("ManagedBy").value("orchestration-kit").build(),
            Tag::builder().key("RunId").value(&spec.run_id).build(),
        ];
        vec![
            TagSpecification::builder()
                .resource_type(ResourceType::Instance)
                .set_tags(Some(tags.clone()))
                .build(),
            TagSpecification::builder()
                .resource_type(ResourceType::Volume)
                .set_tags(Some(tags))
                .build(),
        ]
    }

    fn instance_state_from(state: Option<&InstanceStateName>) -> InstanceState {
        match state {
            Some(InstanceStateName::Running) => InstanceState::Running,
            Some(InstanceStateName::Pending) => InstanceState::Pending,
            Some(InstanceStateName::Stopping) => InstanceState::Stopping,
            Some(InstanceStateName::Stopped) => InstanceState::Stopped,
            _ => InstanceState::Terminated,
        }
    }
}

fn short(s: &str, n: usize) -> String {
    if s.len() <= n {
        s.to_string()
    } else {
        s[..n].to_string()
    }
}

fn iso_now() -> String {
    // AWS SDK calls are themselves a time boundary the rest of the crate
    // treats as an I/O effect; this is the one place it is acceptable to
    // read wall time directly rather than through `ctl_core::Clock`.
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[async_trait]
impl CloudBackend for AwsBackend {
    fn name(&self) -> &'static str {
        "aws"
    }

    async fn find_instances_by_spec(&self, spec_file: &str) -> BackendResult<Vec<InstanceInfo>> {
        let resp = self
            .ec2
            .describe_instances()
            .filters(Filter::builder().name("tag:cloud-run:spec").values(short(spec_file, 256)).build())
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("running")
                    .values("pending")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;

        let mut out = Vec::new();
        for reservation in resp.reservations() {
            for instance in reservation.instances() {
                out.push(to_instance_info(instance));
            }
        }
        Ok(out)
    }

    async fn provision(&self, spec: &ProvisionSpec) -> BackendResult<InstanceInfo> {
        if !spec.allow_duplicate {
            let existing = self.find_instances_by_spec(&spec.spec_file).await?;
            if !existing.is_empty() {
                return Err(CloudBackendError::DuplicateSpec(spec.spec_file.clone()));
            }
        }

        let market_type = if spec.use_spot {
            Some(aws_sdk_ec2::types::InstanceMarketOptionsRequest::builder()
                .market_type(aws_sdk_ec2::types::MarketType::Spot)
                .build())
        } else {
            None
        };

        let mut request = self
            .ec2
            .run_instances()
            .instance_type(spec.instance_type.clone().into())
            .min_count(1)
            .max_count(1)
            .client_token(&spec.client_token)
            .set_tag_specifications(Some(Self::tag_specifications(spec)));
        if let Some(market) = market_type.clone() {
            request = request.instance_market_options(market);
        }

        let result = request.send().await;
        let response = match result {
            Ok(r) => r,
            Err(e) if spec.use_spot => {
                // Spot capacity exhausted: retry once as on-demand.
                self.ec2
                    .run_instances()
                    .instance_type(spec.instance_type.clone().into())
                    .min_count(1)
                    .max_count(1)
                    .client_token(&spec.client_token)
                    .set_tag_specifications(Some(Self::tag_specifications(spec)))
                    .send()
                    .await
                    .map_err(|retry_err| {
                        CloudBackendError::Provisioning(format!(
                            "spot failed ({e}), on-demand retry failed ({retry_err})"
                        ))
                    })?
            }
            Err(e) => return Err(CloudBackendError::Provisioning(e.to_string())),
        };

        let instance = response
            .instances()
            .first()
            .ok_or_else(|| CloudBackendError::Provisioning("run_instances returned no instances".into()))?;
        Ok(to_instance_info(instance))
    }

    async fn poll_status(&self, instance_id: &str) -> BackendResult<PollResult> {
        let resp = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        let instance = resp
            .reservations()
            .first()
            .and_then(|r| r.instances().first())
            .ok_or_else(|| CloudBackendError::NotFound(instance_id.to_string()))?;
        let state = Self::instance_state_from(instance.state().and_then(|s| s.name()));

        let exit_code = if state == InstanceState::Terminated {
            let info = to_instance_info(instance);
            self.read_exit_marker(&info.run_id).await
        } else {
            None
        };

        Ok(PollResult { state, exit_code, heartbeat_age_seconds: None })
    }

    async fn terminate(&self, instance_id: &str) -> BackendResult<()> {
        self.ec2
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        Ok(())
    }

    async fn pull_results(&self, run_id: &str, local_dir: &std::path::Path) -> BackendResult<()> {
        let prefix = format!("cloud-runs/{run_id}/results/");
        let resp = self
            .s3
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        std::fs::create_dir_all(local_dir)
            .map_err(|e| CloudBackendError::Api(format!("creating {}: {e}", local_dir.display())))?;
        for object in resp.contents() {
            let Some(key) = object.key() else { continue };
            let relative = key.strip_prefix(&prefix).unwrap_or(key);
            if relative.is_empty() {
                continue;
            }
            let dest = local_dir.join(relative);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let obj = self
                .s3
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| CloudBackendError::Api(e.to_string()))?;
            let bytes = obj
                .body
                .collect()
                .await
                .map_err(|e| CloudBackendError::Api(e.to_string()))?
                .into_bytes();
            std::fs::write(&dest, bytes)
                .map_err(|e| CloudBackendError::Api(format!("writing {}: {e}", dest.display())))?;
        }
        Ok(())
    }

    async fn list_all_tagged(&self) -> BackendResult<Vec<InstanceInfo>> {
        let resp = self
            .ec2
            .describe_instances()
            .filters(Filter::builder().name("tag-key").values("cloud-run:launched-at").build())
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("running")
                    .values("pending")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| CloudBackendError::Api(e.to_string()))?;
        let mut out = Vec::new();
        for reservation in resp.reservations() {
            for instance in reservation.instances() {
                out.push(to_instance_info(instance));
            }
        }
        Ok(out)
    }
}

impl AwsBackend {
    async fn read_exit_marker(&self, run_id: &str) -> Option<i32> {
        if run_id.is_empty() {
            return None;
        }
        let key = format!("cloud-runs/{run_id}/exit_code");
        let obj = self.s3.get_object().bucket(&self.bucket).key(&key).send().await.ok()?;
        let bytes = obj.body.collect().await.ok()?.into_bytes();
        std::str::from_utf8(&bytes).ok()?.trim().parse().ok()
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

fn to_instance_info(instance: &aws_sdk_ec2::types::Instance) -> InstanceInfo {
    let mut tags = BTreeMap::new();
    for tag in instance.tags() {
        if let (Some(k), Some(v)) = (tag.key(), tag.value()) {
            tags.insert(k.to_string(), v.to_string());
        }
    }
    let run_id = tags.get("cloud-run:run-id").cloned().unwrap_or_default();
    let launched_at = tags.get("cloud-run:launched-at").cloned().unwrap_or_default();
    InstanceInfo {
        instance_id: instance.instance_id().unwrap_or_default().to_string(),
        run_id,
        state: AwsBackend::instance_state_from(instance.state().and_then(|s| s.name())),
        launched_at,
        tags,
    }
}
