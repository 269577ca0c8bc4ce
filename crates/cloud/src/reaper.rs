// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease and hard-ceiling enforcement for cloud instances.
//!
//! Grounded on `examples/original_source/tools/cloud/reaper.py`: every
//! instance tagged `cloud-run:launched-at` is a candidate; age beyond its
//! own `cloud-run:max-hours` or a global hard ceiling (default 24h) gets it
//! terminated. Reason strings match the original's literal format so
//! operators grepping old runbooks still recognize them.

use crate::backend::{CloudBackend, InstanceInfo};
use ctl_core::clock::Clock;
use ctl_core::error::Result;

pub const DEFAULT_HARD_CEILING_HOURS: f64 = 24.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ReapAction {
    Terminate,
    None,
}

#[derive(Debug, Clone)]
pub struct ReapRow {
    pub instance_id: String,
    pub run_id: String,
    pub age_hours: f64,
    pub max_hours: Option<f64>,
    pub reason: Option<String>,
    pub action: ReapAction,
}

pub struct Reaper<C: Clock> {
    clock: C,
    hard_ceiling_hours: f64,
}

impl<C: Clock> Reaper<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, hard_ceiling_hours: DEFAULT_HARD_CEILING_HOURS }
    }

    pub fn with_hard_ceiling_hours(mut self, hours: f64) -> Self {
        self.hard_ceiling_hours = hours;
        self
    }

    fn age_hours(&self, launched_at: &str) -> Option<f64> {
        let launched = chrono::DateTime::parse_from_rfc3339(launched_at).ok()?;
        let now = self.clock.now_utc();
        let seconds = (now - launched.with_timezone(&chrono::Utc)).num_seconds();
        Some(seconds as f64 / 3600.0)
    }

    fn reason_for(&self, info: &InstanceInfo) -> (Option<f64>, Option<String>, ReapAction) {
        let Some(age) = self.age_hours(&info.launched_at) else {
            return (None, None, ReapAction::None);
        };
        let max_hours: Option<f64> =
            info.tags.get("cloud-run:max-hours").and_then(|s| s.parse::<f64>().ok()).filter(|h| *h > 0.0);

        if let Some(max) = max_hours {
            if age > max {
                return (
                    Some(age),
                    Some(format!("lease_expired ({age:.1}h > {max:.1}h)")),
                    ReapAction::Terminate,
                );
            }
        }
        if age > self.hard_ceiling_hours {
            return (
                Some(age),
                Some(format!("hard_ceiling ({age:.1}h > {:.1}h)", self.hard_ceiling_hours)),
                ReapAction::Terminate,
            );
        }
        (Some(age), None, ReapAction::None)
    }

    /// Sweep every tagged instance on `backend`, terminating expired
    /// leases unless `dry_run`. Dry-run and live runs compute the exact
    /// same candidate set; only the mutation is skipped.
    pub async fn sweep(&self, backend: &dyn CloudBackend, dry_run: bool) -> Result<Vec<ReapRow>> {
        let instances = backend
            .list_all_tagged()
            .await
            .map_err(|e| ctl_core::error::Error::fatal(e.to_string()))?;

        let mut rows = Vec::with_capacity(instances.len());
        for info in &instances {
            let (age, reason, action) = self.reason_for(info);
            if action == ReapAction::None {
                continue;
            }
            let max_hours = info.tags.get("cloud-run:max-hours").and_then(|s| s.parse::<f64>().ok());
            if action == ReapAction::Terminate && !dry_run {
                backend
                    .terminate(&info.instance_id)
                    .await
                    .map_err(|e| ctl_core::error::Error::fatal(e.to_string()))?;
            }
            rows.push(ReapRow {
                instance_id: info.instance_id.clone(),
                run_id: info.run_id.clone(),
                age_hours: age.unwrap_or(0.0),
                max_hours,
                reason,
                action,
            });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::backend::InstanceState;
    use ctl_core::clock::FakeClock;
    use std::collections::BTreeMap;

    fn tagged_instance(id: &str, run_id: &str, launched_at: &str, max_hours: Option<&str>) -> InstanceInfo {
        let mut tags = BTreeMap::new();
        tags.insert("cloud-run:run-id".to_string(), run_id.to_string());
        tags.insert("cloud-run:launched-at".to_string(), launched_at.to_string());
        if let Some(h) = max_hours {
            tags.insert("cloud-run:max-hours".to_string(), h.to_string());
        }
        InstanceInfo {
            instance_id: id.to_string(),
            run_id: run_id.to_string(),
            state: InstanceState::Running,
            launched_at: launched_at.to_string(),
            tags,
        }
    }

    #[tokio::test]
    async fn lease_expired_terminates_with_original_reason_format() {
        let backend = FakeBackend::new();
        backend.seed(tagged_instance("i-1", "R1", "1970-01-01T00:00:00Z", Some("1")));

        let clock = FakeClock::at(3 * 3600 * 1000);
        let reaper = Reaper::new(clock);
        let rows = reaper.sweep(&backend, false).await.expect("sweep");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, ReapAction::Terminate);
        assert!(rows[0].reason.as_deref().unwrap().starts_with("lease_expired"));

        let polled = backend.poll_status("i-1").await.expect("poll");
        assert_eq!(polled.state, InstanceState::Terminated);
    }

    #[tokio::test]
    async fn hard_ceiling_applies_when_no_lease_set() {
        let backend = FakeBackend::new();
        backend.seed(tagged_instance("i-2", "R2", "1970-01-01T00:00:00Z", None));

        let clock = FakeClock::at(25 * 3600 * 1000);
        let reaper = Reaper::new(clock);
        let rows = reaper.sweep(&backend, false).await.expect("sweep");

        assert!(rows[0].reason.as_deref().unwrap().starts_with("hard_ceiling"));
    }

    #[tokio::test]
    async fn dry_run_matches_live_run_candidate_set_without_mutating() {
        let backend = FakeBackend::new();
        backend.seed(tagged_instance("i-3", "R3", "1970-01-01T00:00:00Z", Some("1")));

        let clock = FakeClock::at(3 * 3600 * 1000);
        let reaper = Reaper::new(clock.clone());
        let dry_rows = reaper.sweep(&backend, true).await.expect("dry sweep");
        let live_rows = reaper.sweep(&backend, false).await.expect("live sweep");

        assert_eq!(dry_rows.len(), live_rows.len());
        assert_eq!(dry_rows[0].reason, live_rows[0].reason);

        let polled = backend.poll_status("i-3").await.expect("poll");
        assert_eq!(polled.state, InstanceState::Terminated);
    }

    #[tokio::test]
    async fn non_expired_instance_in_mixed_fleet_is_omitted_from_rows() {
        let backend = FakeBackend::new();
        backend.seed(tagged_instance("i-expired", "R4", "1970-01-01T00:00:00Z", Some("1")));
        backend.seed(tagged_instance("i-fresh", "R5", "1970-01-01T00:00:00Z", Some("100")));

        let clock = FakeClock::at(3 * 3600 * 1000);
        let reaper = Reaper::new(clock);
        let rows = reaper.sweep(&backend, false).await.expect("sweep");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].instance_id, "i-expired");
    }
}
