// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level integration tests driving the `ctl` binary end-to-end:
//! registry round-trip, run lifecycle via `upsert`, and orphan reaping via
//! `gc`. Component-internal invariants (parser folding, index queries,
//! cloud reaping) have dedicated unit tests in their owning crates; these
//! exercise the CLI surface that wires them together.

mod support;

use serial_test::serial;
use support::Harness;

#[test]
#[serial]
fn register_then_projects_round_trips() {
    let h = Harness::new();
    let output = h
        .ctl()
        .args([
            "register",
            "--orchestration-kit-root",
            h.kit_root.to_str().expect("utf8 path"),
            "--project-root",
            h.project_root.to_str().expect("utf8 path"),
            "--label",
            "demo",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).expect("utf8 stdout");
    assert!(stdout.contains("project_id"));

    let listed = h.ctl().arg("projects").assert().success();
    let listed_stdout = String::from_utf8(listed.get_output().stdout.clone()).expect("utf8 stdout");
    assert!(listed_stdout.contains("demo"));

    // Re-registering the same root is idempotent: still exactly one entry.
    h.ctl()
        .args([
            "register",
            "--orchestration-kit-root",
            h.kit_root.to_str().expect("utf8 path"),
            "--project-root",
            h.project_root.to_str().expect("utf8 path"),
            "--label",
            "demo-renamed",
        ])
        .assert()
        .success();
    let relisted = h.ctl().arg("projects").assert().success();
    let relisted_stdout = String::from_utf8(relisted.get_output().stdout.clone()).expect("utf8 stdout");
    assert_eq!(relisted_stdout.matches("project_id").count(), 1);
}

#[test]
#[serial]
fn upsert_reflects_run_started_then_finished() {
    let h = Harness::new();
    h.ctl()
        .args([
            "register",
            "--orchestration-kit-root",
            h.kit_root.to_str().expect("utf8 path"),
            "--project-root",
            h.project_root.to_str().expect("utf8 path"),
            "--label",
            "demo",
        ])
        .assert()
        .success();
    let projects = h.ctl().arg("projects").assert().success();
    let projects_json: serde_json::Value =
        serde_json::from_slice(&projects.get_output().stdout).expect("parse projects json");
    let project_id = projects_json[0]["project_id"].as_str().expect("project_id present").to_string();

    h.write_events(
        "R1",
        r#"{"event":"run_started","ts":"2026-01-01T00:00:00Z","run_id":"R1","kit":"research","phase":"cycle","pid":123,"host":"localhost"}
"#,
    );

    let running = h
        .ctl()
        .args([
            "upsert",
            "--index",
            h.index_path.to_str().expect("utf8 path"),
            "--project-id",
            &project_id,
            "--run-id",
            "R1",
        ])
        .assert()
        .success();
    let running_json: serde_json::Value =
        serde_json::from_slice(&running.get_output().stdout).expect("parse upsert json");
    assert_eq!(running_json["status"], "running");

    h.write_events(
        "R1",
        "{\"event\":\"run_started\",\"ts\":\"2026-01-01T00:00:00Z\",\"run_id\":\"R1\",\"kit\":\"research\",\"phase\":\"cycle\",\"pid\":123,\"host\":\"localhost\"}\n\
         {\"event\":\"run_finished\",\"ts\":\"2026-01-01T00:05:00Z\",\"exit_code\":0}\n",
    );

    let finished = h
        .ctl()
        .args([
            "upsert",
            "--index",
            h.index_path.to_str().expect("utf8 path"),
            "--project-id",
            &project_id,
            "--run-id",
            "R1",
        ])
        .assert()
        .success();
    let finished_json: serde_json::Value =
        serde_json::from_slice(&finished.get_output().stdout).expect("parse upsert json");
    assert_eq!(finished_json["status"], "ok");
}

#[test]
#[serial]
fn gc_reaps_running_row_with_dead_pid_and_exits_137() {
    let h = Harness::new();
    h.ctl()
        .args([
            "register",
            "--orchestration-kit-root",
            h.kit_root.to_str().expect("utf8 path"),
            "--project-root",
            h.project_root.to_str().expect("utf8 path"),
            "--label",
            "demo",
        ])
        .assert()
        .success();
    let projects = h.ctl().arg("projects").assert().success();
    let projects_json: serde_json::Value =
        serde_json::from_slice(&projects.get_output().stdout).expect("parse projects json");
    let project_id = projects_json[0]["project_id"].as_str().expect("project_id present").to_string();

    // A pid that cannot plausibly be alive on any test host.
    h.write_events(
        "R2",
        r#"{"event":"run_started","ts":"2026-01-01T00:00:00Z","run_id":"R2","kit":"research","phase":"cycle","pid":2147483646,"host":"localhost"}
"#,
    );
    h.ctl()
        .args([
            "upsert",
            "--index",
            h.index_path.to_str().expect("utf8 path"),
            "--project-id",
            &project_id,
            "--run-id",
            "R2",
        ])
        .assert()
        .success();

    h.ctl()
        .args(["gc", "--index", h.index_path.to_str().expect("utf8 path"), "--project-id", &project_id, "--dry-run"])
        .assert()
        .success();

    h.ctl()
        .args(["gc", "--index", h.index_path.to_str().expect("utf8 path"), "--project-id", &project_id])
        .assert()
        .code(137);
}
