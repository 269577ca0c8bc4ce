// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool dispatch: the facade holds the shared engine/storage handles and
//! maps a JSON-RPC `tools/call` onto one operation.
//!
//! Grounded on `examples/original_source/mcp/server.py`'s dispatch table
//! and on the teacher's `ListenCtx` (one shared, `Arc`-wrapped context per
//! connection task, `crates/daemon/src/listener/mod.rs`). Fire-and-forget
//! tools never take `db_lock`; DB-touching tools serialize under it to
//! avoid SQLite write contention from concurrent connections.

use crate::rpc::{code_for_error, tool_error_result, tool_text_result};
use crate::tools;
use ctl_core::clock::{Clock, SystemClock};
use ctl_core::config::kit_state_dir;
use ctl_core::error::{Error, Result};
use ctl_core::model::{Priority, ReadBudget};
use ctl_engine::interop::{CreateRequestInput, InteropRouter};
use ctl_engine::lifecycle::LifecycleEngine;
use ctl_engine::process::{kill_pid, pid_is_alive};
use ctl_storage::registry::Registry;
use ctl_storage::IndexStore;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub struct Facade {
    index: Arc<IndexStore>,
    registry: Registry,
    lifecycle: LifecycleEngine<SystemClock>,
    max_output_bytes: usize,
    /// Serializes every DB-touching tool call. Fire-and-forget launchers
    /// and process-visibility tools never take this.
    db_lock: Mutex<()>,
}

impl Facade {
    pub fn new(index: Arc<IndexStore>, registry: Registry, max_output_bytes: usize) -> Self {
        let lifecycle = LifecycleEngine::new(
            index.clone(),
            SystemClock,
            ctl_storage::parser::ParserConfig::default(),
        );
        Self { index, registry, lifecycle, max_output_bytes, db_lock: Mutex::new(()) }
    }

    /// Dispatch one `tools/call`. Returns the JSON-RPC `result` payload —
    /// either a normal tool result or a soft `isError: true` failure; a
    /// hard JSON-RPC error (unknown tool, bad params) is signalled via
    /// `Err`.
    pub async fn call(&self, name: &str, params: Value) -> std::result::Result<Value, (i64, String)> {
        let Some(spec) = tools::find(name) else {
            return Err((crate::rpc::METHOD_NOT_FOUND, format!("unknown tool: {name}")));
        };

        let outcome = if spec.db_touching {
            let _guard = self.db_lock.lock();
            self.dispatch(name, &params).await
        } else {
            self.dispatch(name, &params).await
        };

        match outcome {
            Ok(value) => Ok(self.cap_output(tool_text_result(value.to_string()))),
            Err(Error::Validation(msg)) => Err((code_for_error(&Error::Validation(msg.clone())), msg)),
            Err(e) => Ok(self.cap_output(tool_error_result(e.to_string()))),
        }
    }

    async fn dispatch(&self, name: &str, params: &Value) -> Result<Value> {
        match name {
            "orchestrator.run" | "kit.tdd" | "kit.research_cycle" | "kit.research_full"
            | "kit.research_program" | "kit.math" => self.run_tool(name, params).await,
            "orchestrator.request_create" => self.request_create(params),
            "orchestrator.pump" => self.pump(params),
            "orchestrator.run_info" | "kit.status" | "kit.runs" | "kit.capsule" | "kit.research_status" => {
                self.query_tool(name, params)
            }
            "orchestrator.query_log" => self.query_log(params),
            "kit.active" => self.active(params),
            "kit.kill" => self.kill(params),
            "kit.gc" => self.gc(params),
            "kit.research_batch" => {
                Err(Error::validation("kit.research_batch requires the cloud dispatcher; use the ctl CLI"))
            }
            other => Err(Error::validation(format!("unhandled tool: {other}"))),
        }
    }

    async fn run_tool(&self, name: &str, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        let project = self
            .registry
            .get(&project_id)
            .ok_or_else(|| Error::not_found(format!("project {project_id} not registered")))?;
        let program = str_param(params, "program").unwrap_or_else(|_| default_program_for(name));
        let args: Vec<String> = params
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let kit_root = PathBuf::from(&project.orchestration_kit_root);
        let project_root = PathBuf::from(&project.project_root);
        let state_dir = kit_state_dir(&project_root);

        let outcome = self
            .lifecycle
            .launch_background(&project_id, &kit_root, &project_root, &state_dir, &program, &args)
            .await?;

        Ok(serde_json::json!({
            "run_id": outcome.run_id,
            "status": outcome.status,
            "launch_log": outcome.launch_log.to_string_lossy(),
        }))
    }

    fn request_create(&self, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        let project = self
            .registry
            .get(&project_id)
            .ok_or_else(|| Error::not_found(format!("project {project_id} not registered")))?;
        let run_root = PathBuf::from(&project.orchestration_kit_root);
        let router = InteropRouter::new(run_root, SystemClock);

        let input = CreateRequestInput {
            request_id: None,
            parent_run_id: str_param(params, "parent_run_id")?,
            from_kit: str_param(params, "from_kit")?,
            from_phase: str_param(params, "from_phase")?,
            to_kit: str_param(params, "to_kit")?,
            to_phase: str_param(params, "to_phase")?,
            action: str_param(params, "action")?,
            args: str_array(params, "args"),
            must_read: str_array(params, "must_read"),
            read_budget: ReadBudget::default(),
            deliverables_expected: str_array(params, "deliverables_expected"),
            priority: params
                .get("priority")
                .and_then(|v| v.as_str())
                .map(priority_from_str)
                .unwrap_or_default(),
            reasoning: params.get("reasoning").and_then(|v| v.as_str()).map(str::to_string),
        };
        let (request_id, path) = router.create_request(input)?;
        Ok(serde_json::json!({ "request_id": request_id, "path": path.to_string_lossy() }))
    }

    fn pump(&self, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        let project = self
            .registry
            .get(&project_id)
            .ok_or_else(|| Error::not_found(format!("project {project_id} not registered")))?;
        let run_root = PathBuf::from(&project.orchestration_kit_root);
        let router = InteropRouter::new(run_root, SystemClock);
        match router.select_next()? {
            Some(req) => Ok(serde_json::to_value(req).map_err(Error::from)?),
            None => Ok(serde_json::json!(null)),
        }
    }

    fn query_tool(&self, name: &str, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        match name {
            "orchestrator.run_info" => {
                let run_id = str_param(params, "run_id")?;
                let run = self.index.get_run(&project_id, &run_id).map_err(|e| Error::fatal(e.to_string()))?;
                Ok(serde_json::to_value(run).map_err(Error::from)?)
            }
            "kit.status" => {
                let counts =
                    self.index.summary_counts(&project_id).map_err(|e| Error::fatal(e.to_string()))?;
                let active = self.index.active_by_phase(&project_id).map_err(|e| Error::fatal(e.to_string()))?;
                Ok(serde_json::json!({ "by_status": counts, "active_by_phase": active }))
            }
            "kit.runs" => {
                let status = params.get("status").and_then(|v| v.as_str());
                let limit = params.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as u32;
                let offset = params.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let now = SystemClock.now_iso();
                let runs = self
                    .index
                    .list_runs(&project_id, status, limit, offset)
                    .map_err(|e| Error::fatal(e.to_string()))?;
                let rows: Vec<Value> = runs
                    .into_iter()
                    .map(|r| {
                        let duration_seconds = r.duration_seconds(&now);
                        let is_stale = r.is_stale(&now);
                        let is_orphaned = r.is_orphaned(pid_is_alive);
                        let mut row = serde_json::to_value(&r).unwrap_or(Value::Null);
                        if let Value::Object(ref mut map) = row {
                            map.insert("duration_seconds".to_string(), serde_json::json!(duration_seconds));
                            map.insert("is_stale".to_string(), serde_json::json!(is_stale));
                            map.insert("is_orphaned".to_string(), serde_json::json!(is_orphaned));
                        }
                        row
                    })
                    .collect();
                Ok(serde_json::json!(rows))
            }
            "kit.capsule" => {
                let run_id = str_param(params, "run_id")?;
                let run = self
                    .index
                    .get_run(&project_id, &run_id)
                    .map_err(|e| Error::fatal(e.to_string()))?
                    .ok_or_else(|| Error::not_found(format!("run {run_id} not indexed")))?;
                let Some(capsule_path) = run.capsule_path.as_ref() else {
                    return Err(Error::not_found(format!("run {run_id} has no capsule")));
                };
                let contents = std::fs::read_to_string(capsule_path)
                    .map_err(|e| Error::fatal(format!("reading capsule {capsule_path}: {e}")))?;
                Ok(serde_json::json!({ "capsule_path": capsule_path, "contents": contents }))
            }
            "kit.research_status" => {
                let runs = self
                    .index
                    .list_runs(&project_id, None, 200, 0)
                    .map_err(|e| Error::fatal(e.to_string()))?;
                let verdicts: Vec<Value> = runs
                    .into_iter()
                    .filter(|r| r.verdict.is_some())
                    .map(|r| serde_json::json!({ "run_id": r.run_id, "verdict": r.verdict, "experiment_name": r.experiment_name }))
                    .collect();
                Ok(serde_json::json!({ "verdicts": verdicts }))
            }
            other => Err(Error::validation(format!("unhandled query tool: {other}"))),
        }
    }

    fn query_log(&self, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        let run_id = str_param(params, "run_id")?;
        let run = self
            .index
            .get_run(&project_id, &run_id)
            .map_err(|e| Error::fatal(e.to_string()))?
            .ok_or_else(|| Error::not_found(format!("run {run_id} not indexed")))?;
        let Some(root) = run.orchestration_kit_root.as_ref() else {
            return Err(Error::not_found("run has no recorded kit root"));
        };
        let events_path = PathBuf::from(root).join("runs").join(&run_id).join("events.jsonl");
        let contents = std::fs::read_to_string(&events_path)
            .map_err(|e| Error::not_found(format!("events.jsonl: {e}")))?;
        let tail_lines = params.get("tail_lines").and_then(|v| v.as_u64()).unwrap_or(200) as usize;
        let lines: Vec<&str> = contents.lines().rev().take(tail_lines).collect();
        Ok(serde_json::json!({ "lines": lines.into_iter().rev().collect::<Vec<_>>() }))
    }

    fn active(&self, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        let running = self
            .index
            .list_runs(&project_id, Some("running"), u32::MAX, 0)
            .map_err(|e| Error::fatal(e.to_string()))?;
        let entries: Vec<Value> = running
            .into_iter()
            .map(|r| {
                let alive = r.pid.map(pid_is_alive).unwrap_or(false);
                serde_json::json!({ "run_id": r.run_id, "pid": r.pid, "phase": r.phase, "alive": alive })
            })
            .collect();
        Ok(serde_json::json!({ "active": entries }))
    }

    fn kill(&self, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        let run_id = str_param(params, "run_id")?;
        let run = self
            .index
            .get_run(&project_id, &run_id)
            .map_err(|e| Error::fatal(e.to_string()))?
            .ok_or_else(|| Error::not_found(format!("run {run_id} not indexed")))?;
        let Some(pid) = run.pid else {
            return Err(Error::not_found(format!("run {run_id} has no recorded pid")));
        };
        kill_pid(pid, Signal::SIGTERM)?;
        Ok(serde_json::json!({ "run_id": run_id, "pid": pid, "signalled": "SIGTERM" }))
    }

    fn gc(&self, params: &Value) -> Result<Value> {
        let project_id = str_param(params, "project_id")?;
        let dry_run = params.get("dry_run").and_then(|v| v.as_bool()).unwrap_or(true);
        let outcome = self.lifecycle.gc(&project_id, dry_run)?;
        Ok(serde_json::json!({
            "dry_run": outcome.dry_run,
            "stale_runs": outcome.stale_runs.into_iter().map(|(id, reason)| serde_json::json!({"run_id": id, "reason": reason})).collect::<Vec<_>>(),
        }))
    }

    /// Truncate a JSON tool result's serialized text to `max_output_bytes`
    /// at a valid UTF-8 boundary (lossy re-decode of the truncated tail).
    fn cap_output(&self, mut value: Value) -> Value {
        if let Some(text) = value.get("content").and_then(|c| c.get(0)).and_then(|c| c.get("text")).and_then(|t| t.as_str()) {
            if text.len() > self.max_output_bytes {
                let capped = cap_utf8(text, self.max_output_bytes);
                value["content"][0]["text"] = Value::String(capped);
            }
        }
        value
    }
}

fn cap_utf8(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    String::from_utf8_lossy(&text.as_bytes()[..max_bytes]).into_owned()
}

fn str_param(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::validation(format!("missing required param: {key}")))
}

fn str_array(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn priority_from_str(s: &str) -> Priority {
    match s {
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Normal,
    }
}

fn default_program_for(tool: &str) -> String {
    match tool {
        "kit.tdd" => "kit-tdd".to_string(),
        "kit.research_cycle" => "kit-research-cycle".to_string(),
        "kit.research_full" => "kit-research-full".to_string(),
        "kit.research_program" => "kit-research-program".to_string(),
        "kit.math" => "kit-math".to_string(),
        _ => "kit-run".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctl_core::model::Project;
    use tempfile::tempdir;

    fn facade_with_project(dir: &std::path::Path) -> (Facade, String) {
        let index = Arc::new(IndexStore::open_in_memory().expect("index"));
        let registry_path = dir.join("registry.json");
        let registry = Registry::at(registry_path);
        let project_id = "abc123def456".to_string();
        registry
            .register(Project {
                project_id: project_id.clone(),
                label: "demo".to_string(),
                orchestration_kit_root: dir.to_string_lossy().to_string(),
                project_root: dir.to_string_lossy().to_string(),
                registered_at: "2026-01-01T00:00:00Z".to_string(),
                updated_at: "2026-01-01T00:00:00Z".to_string(),
            })
            .expect("register");
        (Facade::new(index, registry, 32_000), project_id)
    }

    #[tokio::test]
    async fn unknown_tool_is_a_hard_rpc_error() {
        let dir = tempdir().expect("tempdir");
        let (facade, _) = facade_with_project(dir.path());
        let err = facade.call("kit.nonexistent", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.0, crate::rpc::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_required_param_is_invalid_params() {
        let dir = tempdir().expect("tempdir");
        let (facade, _) = facade_with_project(dir.path());
        let err = facade.call("kit.status", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.0, crate::rpc::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn kit_status_on_empty_project_returns_soft_result() {
        let dir = tempdir().expect("tempdir");
        let (facade, project_id) = facade_with_project(dir.path());
        let result = facade.call("kit.status", serde_json::json!({"project_id": project_id})).await.expect("call");
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn unregistered_project_is_a_soft_not_found_error() {
        let dir = tempdir().expect("tempdir");
        let (facade, _) = facade_with_project(dir.path());
        let result = facade
            .call("orchestrator.run", serde_json::json!({"project_id": "ghost000000"}))
            .await
            .expect("call");
        assert_eq!(result["isError"], true);
    }

    #[test]
    fn cap_utf8_respects_byte_boundary() {
        let text = "héllo world";
        let capped = cap_utf8(text, 3);
        assert!(capped.len() <= 3);
    }

    #[tokio::test]
    async fn kit_runs_flags_dead_local_pid_as_orphaned() {
        let dir = tempdir().expect("tempdir");
        let (facade, project_id) = facade_with_project(dir.path());
        let mut run = ctl_core::model::Run::new(project_id.clone(), "r1");
        run.status = Some("running".to_string());
        run.host = Some("localhost".to_string());
        run.pid = Some(2_147_483_646);
        run.started_at = Some("2026-01-01T00:00:00Z".to_string());
        facade.index.upsert_run(&run).expect("seed run");

        let result = facade.call("kit.runs", serde_json::json!({"project_id": project_id})).await.expect("call");
        let text = result["content"][0]["text"].as_str().expect("text field");
        let rows: Value = serde_json::from_str(text).expect("parse rows");
        assert_eq!(rows[0]["is_orphaned"], true);
    }
}
