// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cost/feasibility analyzer.
//!
//! Grounded on `examples/original_source/tools/cloud/preflight.py`: a compute
//! profile plus a three-tier preference yields a single recommendation
//! between running the job on the local host or shipping it to remote
//! compute, along with the concrete backend and instance type to use.

use ctl_core::config::CloudPreference;
use serde::{Deserialize, Serialize};

/// Local thresholds below which a CPU job stays on the local host
/// (`original_source/tools/cloud/preflight.py::_local_thresholds`).
const LOCAL_MAX_WALL_HOURS: f64 = 2.0;
const LOCAL_MAX_MEMORY_GB: f64 = 16.0;
const SPOT_THRESHOLD_HOURS: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Light,
    Standard,
    Heavy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeProfile {
    pub tier: Tier,
    pub estimated_rows: u64,
    pub model_type: String,
    pub sequential_fits: u32,
    pub parallelizable: bool,
    pub memory_gb: f64,
    pub gpu_type: Option<String>,
    pub est_wall_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightDecision {
    pub recommendation: Recommendation,
    pub backend: Option<String>,
    pub instance_type: Option<String>,
    pub use_spot: bool,
    pub est_cost: Option<f64>,
    pub preference_override: bool,
}

/// `instance_type -> (hourly on-demand cost, max sequential fits it
/// comfortably handles)`, mirroring the original's static cost table.
pub struct CostTable {
    entries: Vec<(&'static str, f64, u32)>,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            entries: vec![
                ("c6i.xlarge", 0.17, 4),
                ("c6i.2xlarge", 0.34, 8),
                ("c6i.4xlarge", 0.68, 16),
                ("r6i.2xlarge", 0.50, 8),
            ],
        }
    }
}

impl CostTable {
    /// Smallest instance whose sequential-fit capacity covers the job,
    /// falling back to the largest entry if none is big enough.
    fn pick_for(&self, sequential_fits: u32) -> (&'static str, f64) {
        self.entries
            .iter()
            .find(|(_, _, cap)| *cap >= sequential_fits)
            .map(|(name, cost, _)| (*name, *cost))
            .unwrap_or_else(|| {
                let last = self.entries.last().expect("cost table is never empty");
                (last.0, last.1)
            })
    }
}

/// `gpu_type -> instance_type` for the GPU-pod backend.
fn gpu_instance_for(gpu_type: &str) -> &'static str {
    match gpu_type.to_ascii_lowercase().as_str() {
        "a100" => "a100-80gb",
        "h100" => "h100-80gb",
        _ => "a10-24gb",
    }
}

pub fn decide(profile: &ComputeProfile, preference: CloudPreference, costs: &CostTable) -> PreflightDecision {
    if let Some(gpu) = profile.gpu_type.as_deref() {
        return PreflightDecision {
            recommendation: Recommendation::Remote,
            backend: Some("gpupod".to_string()),
            instance_type: Some(gpu_instance_for(gpu).to_string()),
            use_spot: false,
            est_cost: None,
            preference_override: false,
        };
    }

    let within_local = profile.tier != Tier::Heavy
        && profile.est_wall_hours <= LOCAL_MAX_WALL_HOURS
        && profile.memory_gb <= LOCAL_MAX_MEMORY_GB;

    let forced_remote = !within_local
        || matches!(preference, CloudPreference::CloudAlways)
        || (matches!(preference, CloudPreference::CloudFirst) && profile.est_wall_hours > 0.0);

    if within_local && !matches!(preference, CloudPreference::CloudAlways) {
        let preference_override = matches!(preference, CloudPreference::CloudFirst);
        return PreflightDecision {
            recommendation: Recommendation::Local,
            backend: None,
            instance_type: None,
            use_spot: false,
            est_cost: Some(0.0),
            preference_override,
        };
    }

    let (instance_type, hourly) = costs.pick_for(profile.sequential_fits);
    let use_spot = profile.est_wall_hours <= SPOT_THRESHOLD_HOURS;
    PreflightDecision {
        recommendation: Recommendation::Remote,
        backend: Some("aws".to_string()),
        instance_type: Some(instance_type.to_string()),
        use_spot,
        est_cost: Some(hourly * profile.est_wall_hours),
        preference_override: forced_remote && within_local,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_profile() -> ComputeProfile {
        ComputeProfile {
            tier: Tier::Light,
            estimated_rows: 1_000,
            model_type: "linreg".to_string(),
            sequential_fits: 2,
            parallelizable: false,
            memory_gb: 4.0,
            gpu_type: None,
            est_wall_hours: 0.5,
        }
    }

    #[test]
    fn gpu_profile_always_goes_remote_to_gpupod() {
        let mut profile = light_profile();
        profile.gpu_type = Some("a100".to_string());
        let decision = decide(&profile, CloudPreference::Local, &CostTable::default());
        assert_eq!(decision.recommendation, Recommendation::Remote);
        assert_eq!(decision.backend.as_deref(), Some("gpupod"));
        assert_eq!(decision.instance_type.as_deref(), Some("a100-80gb"));
    }

    #[test]
    fn light_cpu_job_stays_local_under_default_preference() {
        let decision = decide(&light_profile(), CloudPreference::Local, &CostTable::default());
        assert_eq!(decision.recommendation, Recommendation::Local);
        assert!(decision.backend.is_none());
    }

    #[test]
    fn cloud_always_forces_remote_even_for_light_job() {
        let decision = decide(&light_profile(), CloudPreference::CloudAlways, &CostTable::default());
        assert_eq!(decision.recommendation, Recommendation::Remote);
        assert_eq!(decision.backend.as_deref(), Some("aws"));
    }

    #[test]
    fn heavy_cpu_job_routes_to_ec2_with_sized_instance() {
        let mut profile = light_profile();
        profile.tier = Tier::Heavy;
        profile.sequential_fits = 10;
        profile.est_wall_hours = 6.0;
        let decision = decide(&profile, CloudPreference::Local, &CostTable::default());
        assert_eq!(decision.recommendation, Recommendation::Remote);
        assert_eq!(decision.instance_type.as_deref(), Some("c6i.4xlarge"));
        assert!(!decision.use_spot);
    }
}
