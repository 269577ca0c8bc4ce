// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders and proptest strategies shared by other crates' test suites.
//! Only compiled with the `test-support` feature, mirroring the teacher's
//! own `oj-core::test_support` convention.

use crate::model::{Priority, Run, RunStatus};
use proptest::prelude::*;

pub fn run_fixture(project_id: &str, run_id: &str) -> Run {
    Run {
        project_id: project_id.to_string(),
        run_id: run_id.to_string(),
        kit: Some("research".to_string()),
        phase: Some("cycle".to_string()),
        started_at: Some("2026-01-01T00:00:00Z".to_string()),
        status: Some(RunStatus::Running.as_str().to_string()),
        ..Default::default()
    }
}

/// Arbitrary (non-empty) run status string, for upsert/COALESCE proptests.
pub fn status_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("running".to_string()), Just("ok".to_string()), Just("failed".to_string())]
}

pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::Low), Just(Priority::Normal), Just(Priority::High)]
}

prop_compose! {
    pub fn exit_code_strategy()(v in 0i32..255) -> i32 { v }
}
