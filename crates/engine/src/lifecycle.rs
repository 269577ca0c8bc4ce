// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C3: run lifecycle engine.
//!
//! `upsert_single_run` and `reindex` are ported from
//! `examples/original_source/dashboard/indexing.py::upsert_single_run` and
//! `index_projects`. `gc` is new: a write-side remediation for runs whose
//! owning process died without writing `run_finished`, complementing the
//! read-time `is_orphaned` flag the index store's query surface exposes.

use crate::process::{self, pid_is_alive, SpawnParams};
use ctl_core::clock::Clock;
use ctl_core::error::{Error, Result};
use ctl_core::ids;
use ctl_core::model::{Project, Run};
use ctl_storage::parser::{parse_run, ParserConfig, ProjectContext};
use ctl_storage::IndexStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Threshold above which a `running` run with no PID is considered
/// abandoned by `gc` (two hours).
const NO_PID_ANCIENT_SECONDS: i64 = 7200;

pub struct LaunchOutcome {
    pub run_id: String,
    pub status: &'static str,
    pub launch_log: PathBuf,
}

pub struct UpsertOutcome {
    pub run_id: String,
    pub status: Option<String>,
    pub error: Option<String>,
}

pub struct ReindexOutcome {
    pub projects_indexed: usize,
    pub runs_indexed: usize,
    pub requests_indexed: usize,
    pub stale_projects_removed: usize,
    pub missing_roots: Vec<String>,
}

pub struct GcOutcome {
    pub stale_runs: Vec<(String, String)>, // (run_id, reason)
    pub dry_run: bool,
}

pub struct LifecycleEngine<C: Clock> {
    index: Arc<IndexStore>,
    clock: C,
    parser_cfg: ParserConfig,
}

impl<C: Clock> LifecycleEngine<C> {
    pub fn new(index: Arc<IndexStore>, clock: C, parser_cfg: ParserConfig) -> Self {
        Self { index, clock, parser_cfg }
    }

    /// Launch a phase as a detached child process and return immediately.
    /// The child is expected to write `events.jsonl` itself; this function
    /// does not wait on it.
    pub async fn launch_background(
        &self,
        project_id: &str,
        orchestration_kit_root: &Path,
        project_root: &Path,
        kit_state_dir: &Path,
        program: &str,
        args: &[String],
    ) -> Result<LaunchOutcome> {
        let run_id = ids::run_id(&self.clock);
        let run_root = orchestration_kit_root.join("runs").join(&run_id);
        std::fs::create_dir_all(&run_root)?;
        let launch_log = process::default_launch_log_path(&run_root, &run_id);

        match process::enter_hook_guard() {
            process::HookEntry::Delegated => {
                info!(run_id, "hook already active, delegating launch");
                return Ok(LaunchOutcome { run_id, status: "delegated", launch_log });
            }
            process::HookEntry::Entered => {}
        }

        let env = process::standard_env(orchestration_kit_root, project_root, kit_state_dir);
        let spawn_result = process::spawn_background(SpawnParams {
            program,
            args,
            cwd: &run_root,
            launch_log: &launch_log,
            env: &env,
        });
        process::exit_hook_guard();

        let child = spawn_result?;
        info!(run_id, project_id, pid = child.id(), "launched phase process");
        // Fire-and-forget: reap the child in the background so it never
        // becomes a zombie, without blocking the caller on completion.
        tokio::spawn(async move {
            let _ = child.wait_with_output().await;
        });

        Ok(LaunchOutcome { run_id, status: "launched", launch_log })
    }

    /// Re-parse one run's event stream and upsert it into the index.
    pub fn upsert_single_run(
        &self,
        project: &Project,
        orchestration_kit_root_path: &Path,
        project_root_path: &Path,
        run_id: &str,
        run_root: &Path,
    ) -> UpsertOutcome {
        let events_path = run_root.join("events.jsonl");
        if !events_path.exists() {
            return UpsertOutcome {
                run_id: run_id.to_string(),
                status: None,
                error: Some("events.jsonl not found".to_string()),
            };
        }

        let ctx = ProjectContext {
            project_id: &project.project_id,
            orchestration_kit_root: &project.orchestration_kit_root,
            orchestration_kit_root_path,
            project_root: &project.project_root,
            project_root_path,
        };
        let (run, requests) = parse_run(&self.parser_cfg, &ctx, run_root);

        if let Err(e) = self.index.upsert_run(&run) {
            return UpsertOutcome { run_id: run_id.to_string(), status: None, error: Some(e.to_string()) };
        }
        for req in &requests {
            if let Err(e) = self.index.insert_request(req) {
                warn!(request_id = %req.request_id, error = %e, "failed to insert request");
            }
        }

        UpsertOutcome { run_id: run.run_id.clone(), status: run.status.clone(), error: None }
    }

    /// Full reindex of the given projects. Deletes and reinserts every run
    /// and request for each named project; only sweeps away projects *not*
    /// in `projects` when `cleanup_stale` is true (Open Question 1).
    pub fn reindex(
        &self,
        projects: &[(Project, PathBuf, PathBuf)], // (project, kit_root_path, project_root_path)
        cleanup_stale: bool,
    ) -> Result<ReindexOutcome> {
        let mut stale_removed = 0;
        if cleanup_stale {
            let active: std::collections::HashSet<&str> =
                projects.iter().map(|(p, _, _)| p.project_id.as_str()).collect();
            for existing in self.index.project_ids().map_err(|e| Error::fatal(e.to_string()))? {
                if !active.contains(existing.as_str()) {
                    self.index.delete_project(&existing).map_err(|e| Error::fatal(e.to_string()))?;
                    stale_removed += 1;
                }
            }
        }

        let mut runs_indexed = 0;
        let mut requests_indexed = 0;
        let mut missing_roots = Vec::new();

        for (project, kit_root_path, project_root_path) in projects {
            if !kit_root_path.exists() {
                missing_roots.push(project.orchestration_kit_root.clone());
                continue;
            }
            self.index.upsert_project(project).map_err(|e| Error::fatal(e.to_string()))?;
            self.index
                .delete_project_rows(&project.project_id)
                .map_err(|e| Error::fatal(e.to_string()))?;

            let runs_dir = kit_root_path.join("runs");
            let Ok(entries) = std::fs::read_dir(&runs_dir) else { continue };
            let mut run_dirs: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
            run_dirs.sort();

            for run_root in run_dirs {
                if !run_root.join("events.jsonl").exists() {
                    continue;
                }
                let ctx = ProjectContext {
                    project_id: &project.project_id,
                    orchestration_kit_root: &project.orchestration_kit_root,
                    orchestration_kit_root_path: kit_root_path,
                    project_root: &project.project_root,
                    project_root_path,
                };
                let (run, requests) = parse_run(&self.parser_cfg, &ctx, &run_root);
                self.index.insert_run_plain(&run).map_err(|e| Error::fatal(e.to_string()))?;
                runs_indexed += 1;
                for req in &requests {
                    self.index.insert_request(req).map_err(|e| Error::fatal(e.to_string()))?;
                    requests_indexed += 1;
                }
            }
        }

        Ok(ReindexOutcome {
            projects_indexed: projects.len(),
            runs_indexed,
            requests_indexed,
            stale_projects_removed: stale_removed,
            missing_roots,
        })
    }

    /// Flip abandoned `running` rows to `failed`. Computes the same
    /// candidate set whether or not `dry_run` is set, so a dry run and a
    /// live run issued back-to-back agree (universal invariant 7).
    pub fn gc(&self, project_id: &str, dry_run: bool) -> Result<GcOutcome> {
        let running = self
            .index
            .list_runs(project_id, Some("running"), u32::MAX, 0)
            .map_err(|e| Error::fatal(e.to_string()))?;

        let mut stale = Vec::new();
        for run in running {
            let reason = self.stale_reason(&run);
            if let Some(reason) = reason {
                stale.push((run.clone(), reason));
            }
        }

        if !dry_run {
            for (run, _reason) in &stale {
                let mut updated = run.clone();
                updated.status = Some("failed".to_string());
                updated.exit_code = Some(137);
                updated.finished_at = Some(self.clock.now_iso());
                self.index.upsert_run(&updated).map_err(|e| Error::fatal(e.to_string()))?;
            }
        }

        Ok(GcOutcome {
            stale_runs: stale.into_iter().map(|(r, reason)| (r.run_id, reason)).collect(),
            dry_run,
        })
    }

    fn stale_reason(&self, run: &Run) -> Option<String> {
        let is_local = run.host.as_deref().map(|h| h == "localhost" || h == "127.0.0.1").unwrap_or(true);
        if is_local {
            if let Some(pid) = run.pid {
                if !pid_is_alive(pid) {
                    return Some("pid_dead".to_string());
                }
                return None;
            }
        }
        let age = run.duration_seconds(&self.clock.now_iso()).unwrap_or(0);
        if run.pid.is_none() && age > NO_PID_ANCIENT_SECONDS {
            return Some("no_pid_ancient".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctl_core::clock::FakeClock;
    use std::fs;
    use tempfile::tempdir;

    fn sample_project(root: &Path) -> Project {
        Project {
            project_id: ids::project_id(&root.to_string_lossy()),
            label: "demo".into(),
            orchestration_kit_root: root.to_string_lossy().to_string(),
            project_root: root.to_string_lossy().to_string(),
            registered_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn upsert_single_run_reports_missing_events_file() {
        let index = Arc::new(IndexStore::open_in_memory().expect("index"));
        let clock = FakeClock::at(0);
        let engine = LifecycleEngine::new(index, clock, ParserConfig::default());
        let dir = tempdir().expect("tempdir");
        let project = sample_project(dir.path());
        let run_root = dir.path().join("runs").join("ghost");
        fs::create_dir_all(&run_root).expect("mkdir");

        let outcome = engine.upsert_single_run(&project, dir.path(), dir.path(), "ghost", &run_root);
        assert_eq!(outcome.error.as_deref(), Some("events.jsonl not found"));
    }

    #[test]
    fn upsert_single_run_twice_moves_running_to_ok() {
        let index = Arc::new(IndexStore::open_in_memory().expect("index"));
        let clock = FakeClock::at(0);
        let engine = LifecycleEngine::new(index.clone(), clock, ParserConfig::default());
        let dir = tempdir().expect("tempdir");
        let project = sample_project(dir.path());
        let run_root = dir.path().join("runs").join("r1");
        fs::create_dir_all(&run_root).expect("mkdir");
        fs::write(
            run_root.join("events.jsonl"),
            "{\"event\":\"run_started\",\"ts\":\"2026-01-01T00:00:00Z\",\"run_id\":\"r1\",\"kit\":\"research\"}\n",
        )
        .expect("write");

        let first = engine.upsert_single_run(&project, dir.path(), dir.path(), "r1", &run_root);
        assert_eq!(first.status.as_deref(), Some("running"));

        fs::write(
            run_root.join("events.jsonl"),
            "{\"event\":\"run_started\",\"ts\":\"2026-01-01T00:00:00Z\",\"run_id\":\"r1\",\"kit\":\"research\"}\n\
             {\"event\":\"run_finished\",\"ts\":\"2026-01-01T00:05:00Z\",\"exit_code\":0}\n",
        )
        .expect("write 2");
        let second = engine.upsert_single_run(&project, dir.path(), dir.path(), "r1", &run_root);
        assert_eq!(second.status.as_deref(), Some("ok"));

        let loaded = index.get_run(&project.project_id, "r1").expect("get").expect("present");
        assert_eq!(loaded.kit.as_deref(), Some("research"));
    }

    #[test]
    fn reindex_never_drops_named_projects_without_cleanup() {
        let index = Arc::new(IndexStore::open_in_memory().expect("index"));
        let clock = FakeClock::at(0);
        let engine = LifecycleEngine::new(index.clone(), clock, ParserConfig::default());
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("runs")).expect("mkdir");
        let project = sample_project(dir.path());

        // Seed an unrelated project directly in the index.
        let other = Project {
            project_id: "other000000".into(),
            label: "other".into(),
            orchestration_kit_root: "/other".into(),
            project_root: "/other".into(),
            registered_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        index.upsert_project(&other).expect("seed");

        let outcome = engine
            .reindex(&[(project, dir.path().to_path_buf(), dir.path().to_path_buf())], false)
            .expect("reindex");
        assert_eq!(outcome.stale_projects_removed, 0);
        assert!(index.project_ids().expect("ids").contains(&"other000000".to_string()));
    }

    #[test]
    fn gc_dry_run_matches_live_run_candidate_set() {
        let index = Arc::new(IndexStore::open_in_memory().expect("index"));
        let clock = FakeClock::at(0);
        let engine = LifecycleEngine::new(index.clone(), clock, ParserConfig::default());

        let mut run = Run::new("p1", "r1");
        run.status = Some("running".to_string());
        run.host = Some("localhost".to_string());
        run.pid = Some(2_147_483_646);
        run.started_at = Some("1970-01-01T00:00:00Z".to_string());
        index.upsert_run(&run).expect("seed");

        let dry = engine.gc("p1", true).expect("dry gc");
        let live = engine.gc("p1", false).expect("live gc");
        assert_eq!(dry.stale_runs, live.stale_runs);
        assert_eq!(dry.stale_runs[0].1, "pid_dead");

        let loaded = index.get_run("p1", "r1").expect("get").expect("present");
        assert_eq!(loaded.status.as_deref(), Some("failed"));
        assert_eq!(loaded.exit_code, Some(137));
    }
}
