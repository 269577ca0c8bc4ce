// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C2: SQLite-backed index store. Upsert semantics are ported from
//! `examples/original_source/dashboard/indexing.py`: runs COALESCE every
//! column except `status` and `parent_run_id` (always overwritten);
//! requests overwrite every column unconditionally (`_insert_request`).

use crate::schema;
use ctl_core::model::{Project, Request, Run};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub struct IndexStore {
    conn: Mutex<Connection>,
}

impl IndexStore {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Ok(Self { conn: Mutex::new(schema::open(path)?) })
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::ensure_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn upsert_project(&self, project: &Project) -> rusqlite::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO projects (project_id, label, orchestration_kit_root, project_root, registered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(project_id) DO UPDATE SET
                label = excluded.label,
                orchestration_kit_root = excluded.orchestration_kit_root,
                project_root = excluded.project_root,
                updated_at = excluded.updated_at",
            params![
                project.project_id,
                project.label,
                project.orchestration_kit_root,
                project.project_root,
                project.registered_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Delete every run and request row belonging to a project, without
    /// touching the `projects` row itself.
    pub fn delete_project_rows(&self, project_id: &str) -> rusqlite::Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM runs WHERE project_id = ?1", params![project_id])?;
        conn.execute("DELETE FROM requests WHERE project_id = ?1", params![project_id])?;
        Ok(())
    }

    /// Remove a project entirely: its registry row and all run/request
    /// rows. Used only by the stale-project sweep in a full reindex.
    pub fn delete_project(&self, project_id: &str) -> rusqlite::Result<()> {
        self.delete_project_rows(project_id)?;
        let conn = self.conn.lock();
        conn.execute("DELETE FROM projects WHERE project_id = ?1", params![project_id])?;
        Ok(())
    }

    pub fn project_ids(&self) -> rusqlite::Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT project_id FROM projects")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        rows.collect()
    }

    /// Plain insert, used while walking run directories during a full
    /// reindex where rows were just deleted by `delete_project_rows`.
    pub fn insert_run_plain(&self, run: &Run) -> rusqlite::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (project_id, run_id, parent_run_id, kit, phase, started_at, finished_at,
                exit_code, status, capsule_path, manifest_path, log_path, events_path, cwd,
                project_root, orchestration_kit_root, agent_runtime, host, pid, reasoning,
                experiment_name, verdict)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)",
            run_params(run),
        )?;
        Ok(())
    }

    /// Insert-or-update by `(project_id, run_id)`. `status` and
    /// `parent_run_id` are always overwritten; every other column is
    /// COALESCEd so a later partial update never clobbers an earlier
    /// non-NULL value.
    pub fn upsert_run(&self, run: &Run) -> rusqlite::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (project_id, run_id, parent_run_id, kit, phase, started_at, finished_at,
                exit_code, status, capsule_path, manifest_path, log_path, events_path, cwd,
                project_root, orchestration_kit_root, agent_runtime, host, pid, reasoning,
                experiment_name, verdict)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)
             ON CONFLICT(project_id, run_id) DO UPDATE SET
                parent_run_id = excluded.parent_run_id,
                status = excluded.status,
                kit = COALESCE(excluded.kit, runs.kit),
                phase = COALESCE(excluded.phase, runs.phase),
                started_at = COALESCE(excluded.started_at, runs.started_at),
                finished_at = COALESCE(excluded.finished_at, runs.finished_at),
                exit_code = COALESCE(excluded.exit_code, runs.exit_code),
                capsule_path = COALESCE(excluded.capsule_path, runs.capsule_path),
                manifest_path = COALESCE(excluded.manifest_path, runs.manifest_path),
                log_path = COALESCE(excluded.log_path, runs.log_path),
                events_path = COALESCE(excluded.events_path, runs.events_path),
                cwd = COALESCE(excluded.cwd, runs.cwd),
                project_root = COALESCE(excluded.project_root, runs.project_root),
                orchestration_kit_root = COALESCE(excluded.orchestration_kit_root, runs.orchestration_kit_root),
                agent_runtime = COALESCE(excluded.agent_runtime, runs.agent_runtime),
                host = COALESCE(excluded.host, runs.host),
                pid = COALESCE(excluded.pid, runs.pid),
                reasoning = COALESCE(excluded.reasoning, runs.reasoning),
                experiment_name = COALESCE(excluded.experiment_name, runs.experiment_name),
                verdict = COALESCE(excluded.verdict, runs.verdict)",
            run_params(run),
        )?;
        Ok(())
    }

    /// Insert-or-update a request row, overwriting every column
    /// unconditionally (`_insert_request` has no COALESCE).
    pub fn insert_request(&self, req: &Request) -> rusqlite::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO requests (project_id, request_id, parent_run_id, child_run_id, from_kit,
                from_phase, to_kit, to_phase, action, status, request_path, response_path,
                enqueued_ts, completed_ts, reasoning)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
             ON CONFLICT(project_id, request_id) DO UPDATE SET
                parent_run_id = excluded.parent_run_id,
                child_run_id = excluded.child_run_id,
                from_kit = excluded.from_kit,
                from_phase = excluded.from_phase,
                to_kit = excluded.to_kit,
                to_phase = excluded.to_phase,
                action = excluded.action,
                status = excluded.status,
                request_path = excluded.request_path,
                response_path = excluded.response_path,
                enqueued_ts = excluded.enqueued_ts,
                completed_ts = excluded.completed_ts,
                reasoning = excluded.reasoning",
            params![
                req.project_id,
                req.request_id,
                req.parent_run_id,
                req.child_run_id,
                req.from_kit,
                req.from_phase,
                req.to_kit,
                req.to_phase,
                req.action,
                req.status,
                req.request_path,
                req.response_path,
                req.enqueued_ts,
                req.completed_ts,
                req.reasoning,
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, project_id: &str, run_id: &str) -> rusqlite::Result<Option<Run>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM runs WHERE project_id = ?1 AND run_id = ?2",
            params![project_id, run_id],
            row_to_run,
        )
        .optional()
    }

    /// List runs for a project, optionally filtered by status, newest
    /// first, with an offset/limit page.
    pub fn list_runs(
        &self,
        project_id: &str,
        status: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> rusqlite::Result<Vec<Run>> {
        let conn = self.conn.lock();
        let mut stmt = if status.is_some() {
            conn.prepare(
                "SELECT * FROM runs WHERE project_id = ?1 AND status = ?2
                 ORDER BY started_at DESC LIMIT ?3 OFFSET ?4",
            )?
        } else {
            conn.prepare(
                "SELECT * FROM runs WHERE project_id = ?1
                 ORDER BY started_at DESC LIMIT ?3 OFFSET ?4",
            )?
        };
        let rows = if let Some(s) = status {
            stmt.query_map(params![project_id, s, limit, offset], row_to_run)?
        } else {
            stmt.query_map(params![project_id, rusqlite::types::Null, limit, offset], row_to_run)?
        };
        rows.collect()
    }

    /// Count of runs per status for a project.
    pub fn summary_counts(&self, project_id: &str) -> rusqlite::Result<BTreeMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(status, 'unknown'), COUNT(*) FROM runs WHERE project_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![project_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            out.insert(k, v);
        }
        Ok(out)
    }

    /// Count of `running` runs per phase for a project.
    pub fn active_by_phase(&self, project_id: &str) -> rusqlite::Result<BTreeMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(phase, 'unknown'), COUNT(*) FROM runs
             WHERE project_id = ?1 AND status = 'running' GROUP BY phase",
        )?;
        let rows = stmt.query_map(params![project_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            out.insert(k, v);
        }
        Ok(out)
    }

    /// Expand a run's lineage to its root, then return every run in the
    /// thread plus every request referencing any of them. Cycle-safe via a
    /// visited set.
    pub fn thread_expansion(
        &self,
        project_id: &str,
        run_id: &str,
    ) -> rusqlite::Result<(Vec<Run>, Vec<Request>)> {
        let mut current = run_id.to_string();
        let mut visited = BTreeSet::new();
        let root = loop {
            if !visited.insert(current.clone()) {
                break current;
            }
            match self.get_run(project_id, &current)? {
                Some(run) => match run.parent_run_id {
                    Some(parent) if parent != current => current = parent,
                    _ => break current,
                },
                None => break current,
            }
        };

        let mut thread_runs = Vec::new();
        let mut frontier = vec![root];
        let mut thread_visited = BTreeSet::new();
        while let Some(rid) = frontier.pop() {
            if !thread_visited.insert(rid.clone()) {
                continue;
            }
            if let Some(run) = self.get_run(project_id, &rid)? {
                let children = self.child_run_ids(project_id, &rid)?;
                thread_runs.push(run);
                frontier.extend(children);
            }
        }
        thread_runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));

        let ids: Vec<String> = thread_runs.iter().map(|r| r.run_id.clone()).collect();
        let requests = self.requests_for_runs(project_id, &ids)?;
        Ok((thread_runs, requests))
    }

    fn child_run_ids(&self, project_id: &str, run_id: &str) -> rusqlite::Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT run_id FROM runs WHERE project_id = ?1 AND parent_run_id = ?2")?;
        let rows = stmt.query_map(params![project_id, run_id], |r| r.get::<_, String>(0))?;
        rows.collect()
    }

    fn requests_for_runs(&self, project_id: &str, run_ids: &[String]) -> rusqlite::Result<Vec<Request>> {
        if run_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let placeholders: Vec<String> = (0..run_ids.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "SELECT * FROM requests WHERE project_id = ?1 AND parent_run_id IN ({})",
            placeholders.join(",")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&project_id];
        for id in run_ids {
            bound.push(id);
        }
        let rows = stmt.query_map(bound.as_slice(), row_to_request)?;
        rows.collect()
    }
}

fn run_params(run: &Run) -> [&dyn rusqlite::ToSql; 22] {
    [
        &run.project_id,
        &run.run_id,
        &run.parent_run_id,
        &run.kit,
        &run.phase,
        &run.started_at,
        &run.finished_at,
        &run.exit_code,
        &run.status,
        &run.capsule_path,
        &run.manifest_path,
        &run.log_path,
        &run.events_path,
        &run.cwd,
        &run.project_root,
        &run.orchestration_kit_root,
        &run.agent_runtime,
        &run.host,
        &run.pid,
        &run.reasoning,
        &run.experiment_name,
        &run.verdict,
    ]
}

fn row_to_run(row: &Row) -> rusqlite::Result<Run> {
    Ok(Run {
        project_id: row.get("project_id")?,
        run_id: row.get("run_id")?,
        parent_run_id: row.get("parent_run_id")?,
        kit: row.get("kit")?,
        phase: row.get("phase")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        exit_code: row.get("exit_code")?,
        status: row.get("status")?,
        capsule_path: row.get("capsule_path")?,
        manifest_path: row.get("manifest_path")?,
        log_path: row.get("log_path")?,
        events_path: row.get("events_path")?,
        cwd: row.get("cwd")?,
        project_root: row.get("project_root")?,
        orchestration_kit_root: row.get("orchestration_kit_root")?,
        agent_runtime: row.get("agent_runtime")?,
        host: row.get("host")?,
        pid: row.get("pid")?,
        reasoning: row.get("reasoning")?,
        experiment_name: row.get("experiment_name")?,
        verdict: row.get("verdict")?,
    })
}

fn row_to_request(row: &Row) -> rusqlite::Result<Request> {
    Ok(Request {
        project_id: row.get("project_id")?,
        request_id: row.get("request_id")?,
        parent_run_id: row.get("parent_run_id")?,
        child_run_id: row.get("child_run_id")?,
        from_kit: row.get("from_kit")?,
        from_phase: row.get("from_phase")?,
        to_kit: row.get("to_kit")?,
        to_phase: row.get("to_phase")?,
        action: row.get("action")?,
        status: row.get("status")?,
        request_path: row.get("request_path")?,
        response_path: row.get("response_path")?,
        enqueued_ts: row.get("enqueued_ts")?,
        completed_ts: row.get("completed_ts")?,
        reasoning: row.get("reasoning")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_run(run_id: &str) -> Run {
        Run {
            project_id: "p1".into(),
            run_id: run_id.into(),
            kit: Some("research".into()),
            status: Some("running".into()),
            started_at: Some("2026-01-01T00:00:00Z".into()),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_run_coalesces_but_overwrites_status() {
        let store = IndexStore::open_in_memory().expect("open");
        let mut run = sample_run("r1");
        store.upsert_run(&run).expect("first upsert");

        run.status = Some("ok".into());
        run.exit_code = Some(0);
        run.kit = None; // must not clobber the earlier "research"
        store.upsert_run(&run).expect("second upsert");

        let loaded = store.get_run("p1", "r1").expect("get").expect("present");
        assert_eq!(loaded.status.as_deref(), Some("ok"));
        assert_eq!(loaded.exit_code, Some(0));
        assert_eq!(loaded.kit.as_deref(), Some("research"));
    }

    #[test]
    fn upsert_run_always_overwrites_parent_run_id() {
        let store = IndexStore::open_in_memory().expect("open");
        let mut run = sample_run("r1");
        run.parent_run_id = Some("root".into());
        store.upsert_run(&run).expect("first");

        run.parent_run_id = None;
        store.upsert_run(&run).expect("second");
        let loaded = store.get_run("p1", "r1").expect("get").expect("present");
        assert_eq!(loaded.parent_run_id, None);
    }

    #[test]
    fn insert_request_overwrites_every_field() {
        let store = IndexStore::open_in_memory().expect("open");
        let mut req = Request {
            project_id: "p1".into(),
            request_id: "rq-1".into(),
            status: Some("pending".into()),
            reasoning: Some("because".into()),
            ..Default::default()
        };
        store.insert_request(&req).expect("first");
        req.status = Some("ok".into());
        req.reasoning = None;
        store.insert_request(&req).expect("second");

        let (_, requests) = store.thread_expansion("p1", "none").expect("expand");
        assert!(requests.is_empty()); // parent_run_id is None so it's unrelated to "none"
    }

    #[test]
    fn thread_expansion_is_cycle_safe() {
        let store = IndexStore::open_in_memory().expect("open");
        let mut a = sample_run("a");
        a.parent_run_id = Some("b".into());
        let mut b = sample_run("b");
        b.parent_run_id = Some("a".into());
        store.upsert_run(&a).expect("a");
        store.upsert_run(&b).expect("b");

        let (runs, _) = store.thread_expansion("p1", "a").expect("expand");
        assert_eq!(runs.len(), 2);
    }

    #[test]
    fn delete_project_rows_keeps_project_row() {
        let store = IndexStore::open_in_memory().expect("open");
        let project = Project {
            project_id: "p1".into(),
            label: "demo".into(),
            orchestration_kit_root: "/kit".into(),
            project_root: "/proj".into(),
            registered_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        store.upsert_project(&project).expect("project");
        store.upsert_run(&sample_run("r1")).expect("run");
        store.delete_project_rows("p1").expect("delete rows");
        assert_eq!(store.project_ids().expect("ids"), vec!["p1".to_string()]);
        assert!(store.get_run("p1", "r1").expect("get").is_none());
    }
}
