// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for workspace-level `ctl` binary tests: an isolated
//! `$HOME` (so the registry file never touches the real one) plus a
//! convenience wrapper around `assert_cmd::Command`.

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct Harness {
    pub home: TempDir,
    pub kit_root: PathBuf,
    pub project_root: PathBuf,
    pub index_path: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        let home = tempfile::tempdir().expect("tempdir for HOME");
        let kit_root = home.path().join("kit");
        let project_root = home.path().join("project");
        std::fs::create_dir_all(kit_root.join("runs")).expect("mkdir kit/runs");
        std::fs::create_dir_all(&project_root).expect("mkdir project");
        let index_path = home.path().join("index.sqlite3");
        Self { home, kit_root, project_root, index_path }
    }

    pub fn ctl(&self) -> Command {
        let mut cmd = Command::cargo_bin("ctl").expect("ctl binary built");
        cmd.env("HOME", self.home.path());
        cmd
    }

    pub fn write_events(&self, run_id: &str, events: &str) -> PathBuf {
        let run_root = self.kit_root.join("runs").join(run_id);
        std::fs::create_dir_all(&run_root).expect("mkdir run_root");
        let path = run_root.join("events.jsonl");
        std::fs::write(&path, events).expect("write events.jsonl");
        run_root
    }
}
