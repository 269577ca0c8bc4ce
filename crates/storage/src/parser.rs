// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event & manifest parsing (C1).
//!
//! Ported field-for-field from
//! `examples/original_source/dashboard/parsing.py`. The fold is
//! deliberately lenient: malformed lines are skipped, unexpected types are
//! ignored rather than rejected, and a missing file yields an empty run
//! rather than an error. Nothing here ever panics on untrusted input.

use ctl_core::model::{Request, Run};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Tunable knobs for the parser. `verdict_scan_bytes` resolves Open
/// Question 3: the original hardcodes 5120 bytes; we expose it here.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub verdict_scan_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { verdict_scan_bytes: 5120 }
    }
}

/// Minimal project context the parser needs: enough to resolve relative
/// pointers and to seed the skeleton run record.
pub struct ProjectContext<'a> {
    pub project_id: &'a str,
    pub orchestration_kit_root: &'a str,
    pub orchestration_kit_root_path: &'a Path,
    pub project_root: &'a str,
    pub project_root_path: &'a Path,
}

fn verdict_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)##\s*Verdict:\s*(CONFIRMED|REFUTED|INCONCLUSIVE)")
            .expect("static verdict regex is valid")
    })
}

/// Read a JSONL file, returning one JSON object per well-formed line.
/// Blank lines, malformed JSON, and non-object top-level values are
/// silently skipped — matching `parse_jsonl`.
pub fn parse_jsonl(path: &Path) -> Vec<serde_json::Map<String, serde_json::Value>> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str(line) {
            rows.push(obj);
        }
    }
    rows
}

/// Resolve a possibly-relative pointer against a base directory.
fn resolve_pointer(base: &Path, raw: Option<&str>) -> Option<PathBuf> {
    let raw = raw?;
    if raw.is_empty() {
        return None;
    }
    let p = Path::new(raw);
    let resolved = if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
    Some(resolved)
}

fn parse_manifest_full(
    orchestration_kit_root: &Path,
    manifest_path: Option<&str>,
) -> serde_json::Map<String, serde_json::Value> {
    let Some(resolved) = resolve_pointer(orchestration_kit_root, manifest_path) else {
        return serde_json::Map::new();
    };
    let Ok(text) = fs::read_to_string(&resolved) else {
        return serde_json::Map::new();
    };
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(serde_json::Value::Object(obj)) => obj,
        _ => serde_json::Map::new(),
    }
}

fn as_str<'a>(m: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    m.get(key).and_then(|v| v.as_str())
}

fn as_i64(m: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<i64> {
    m.get(key).and_then(|v| v.as_i64())
}

fn extract_experiment_name(metadata: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    let command = metadata.get("command")?.as_array()?;
    let last = command.last()?;
    let last_str = last.as_str().unwrap_or_default();
    let stem = Path::new(last_str).file_stem()?.to_str()?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

fn extract_verdict(
    project_root: &Path,
    tracked: &[serde_json::Value],
    cfg: &ParserConfig,
) -> Option<String> {
    for art in tracked {
        let Some(art_path) = art.get("path").and_then(|v| v.as_str()) else {
            continue;
        };
        if !art_path.contains("/results/") || !art_path.ends_with("/analysis.md") {
            continue;
        }
        let full = project_root.join(art_path);
        let Ok(bytes) = fs::read(&full) else {
            continue;
        };
        let capped = &bytes[..bytes.len().min(cfg.verdict_scan_bytes)];
        let text = String::from_utf8_lossy(capped);
        if let Some(caps) = verdict_re().captures(&text) {
            return Some(caps[1].to_ascii_uppercase());
        }
    }
    None
}

fn first_sorted_glob(dir: &Path, ext: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(ext))
        .collect();
    names.sort();
    let first = names.into_iter().next()?;
    Some(dir.join(first))
}

fn rel_to(base: &Path, target: &Path) -> String {
    target
        .strip_prefix(base)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| target.to_string_lossy().to_string())
}

/// Fold one run directory's `events.jsonl` (plus manifest reconciliation)
/// into a `Run` record and its associated `Request` records, sorted by
/// `(enqueued_ts, request_id)`.
pub fn parse_run(cfg: &ParserConfig, project: &ProjectContext, run_root: &Path) -> (Run, Vec<Request>) {
    let events_path = run_root.join("events.jsonl");
    let records = parse_jsonl(&events_path);
    let run_id = run_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let mut run = Run::new(project.project_id, &run_id);
    run.events_path = Some(rel_to(project.orchestration_kit_root_path, &events_path));
    run.project_root = Some(project.project_root.to_string());
    run.orchestration_kit_root = Some(project.orchestration_kit_root.to_string());

    let mut requests: BTreeMap<String, Request> = BTreeMap::new();

    for event in &records {
        let Some(event_name) = as_str(event, "event") else { continue };
        let ts = as_str(event, "ts").map(|s| s.to_string());

        match event_name {
            "run_started" => {
                run.run_id = as_str(event, "run_id").unwrap_or(&run_id).to_string();
                run.parent_run_id = as_str(event, "parent_run_id").map(String::from);
                if let Some(v) = as_str(event, "kit") {
                    run.kit = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "phase") {
                    run.phase = Some(v.to_string());
                }
                run.started_at = ts.clone().or(run.started_at.clone());
                if let Some(v) = as_str(event, "project_root") {
                    run.project_root = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "orchestration_kit_root") {
                    run.orchestration_kit_root = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "agent_runtime") {
                    run.agent_runtime = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "host") {
                    run.host = Some(v.to_string());
                }
                if let Some(v) = as_i64(event, "pid") {
                    run.pid = Some(v);
                }
                if let Some(v) = as_str(event, "reasoning") {
                    run.reasoning = Some(v.to_string());
                }
            }
            "phase_started" => {
                if let Some(v) = as_str(event, "kit") {
                    run.kit = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "phase") {
                    run.phase = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "cwd") {
                    run.cwd = Some(v.to_string());
                }
            }
            "phase_finished" => {
                if let Some(v) = as_i64(event, "exit_code") {
                    run.exit_code = Some(v as i32);
                }
                if let Some(v) = as_str(event, "log_path") {
                    run.log_path = Some(v.to_string());
                }
            }
            "capsule_written" => {
                if let Some(v) = as_str(event, "capsule_path") {
                    run.capsule_path = Some(v.to_string());
                }
            }
            "manifest_written" => {
                if let Some(v) = as_str(event, "manifest_path") {
                    run.manifest_path = Some(v.to_string());
                }
            }
            "run_finished" => {
                run.finished_at = ts.clone().or(run.finished_at.clone());
                if let Some(v) = as_i64(event, "exit_code") {
                    run.exit_code = Some(v as i32);
                }
                if let Some(v) = as_str(event, "capsule_path") {
                    run.capsule_path = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "manifest_path") {
                    run.manifest_path = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "agent_runtime") {
                    run.agent_runtime = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "host") {
                    run.host = Some(v.to_string());
                }
                if let Some(v) = as_i64(event, "pid") {
                    run.pid = Some(v);
                }
            }
            "request_enqueued" | "request_completed" => {
                let Some(request_id) = as_str(event, "request_id") else { continue };
                let rec = requests.entry(request_id.to_string()).or_insert_with(|| Request {
                    project_id: project.project_id.to_string(),
                    request_id: request_id.to_string(),
                    parent_run_id: Some(run_id.clone()),
                    ..Default::default()
                });
                if let Some(v) = as_str(event, "request_path") {
                    rec.request_path = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "response_path") {
                    rec.response_path = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "child_run_id") {
                    rec.child_run_id = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "from_kit") {
                    rec.from_kit = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "from_phase") {
                    rec.from_phase = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "to_kit") {
                    rec.to_kit = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "to_phase") {
                    rec.to_phase = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "action") {
                    rec.action = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "status") {
                    rec.status = Some(v.to_string());
                }
                if let Some(v) = as_str(event, "reasoning") {
                    rec.reasoning = Some(v.to_string());
                }
                if event_name == "request_enqueued" {
                    rec.enqueued_ts = ts.or(rec.enqueued_ts.clone());
                } else {
                    rec.completed_ts = ts.or(rec.completed_ts.clone());
                }
            }
            _ => {}
        }
    }

    if run.manifest_path.is_none() {
        run.manifest_path = first_sorted_glob(&run_root.join("manifests"), ".json")
            .map(|p| rel_to(project.orchestration_kit_root_path, &p));
    }
    if run.capsule_path.is_none() {
        run.capsule_path = first_sorted_glob(&run_root.join("capsules"), ".md")
            .map(|p| rel_to(project.orchestration_kit_root_path, &p));
    }
    if run.log_path.is_none() {
        run.log_path = first_sorted_glob(&run_root.join("logs"), ".log")
            .map(|p| rel_to(project.orchestration_kit_root_path, &p));
    }

    let manifest_full =
        parse_manifest_full(project.orchestration_kit_root_path, run.manifest_path.as_deref());
    let metadata = manifest_full
        .get("metadata")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    if !metadata.is_empty() {
        if run.parent_run_id.is_none() {
            if let Some(v) = as_str(&metadata, "parent_run_id") {
                run.parent_run_id = Some(v.to_string());
            }
        }
        if run.kit.is_none() {
            if let Some(v) = as_str(&metadata, "kit") {
                run.kit = Some(v.to_string());
            }
        }
        if run.phase.is_none() {
            if let Some(v) = as_str(&metadata, "phase") {
                run.phase = Some(v.to_string());
            }
        }
        if run.started_at.is_none() {
            if let Some(v) = as_str(&metadata, "started_at") {
                run.started_at = Some(v.to_string());
            }
        }
        if run.finished_at.is_none() {
            if let Some(v) = as_str(&metadata, "finished_at") {
                run.finished_at = Some(v.to_string());
            }
        }
        if run.exit_code.is_none() {
            if let Some(v) = as_i64(&metadata, "exit_code") {
                run.exit_code = Some(v as i32);
            }
        }
        if run.cwd.is_none() {
            if let Some(v) = as_str(&metadata, "cwd") {
                run.cwd = Some(v.to_string());
            }
        }
        // These five are always overwritten from metadata when present,
        // not only when NULL — matching parsing.py's asymmetric back-fill.
        if let Some(v) = as_str(&metadata, "project_root") {
            run.project_root = Some(v.to_string());
        }
        if let Some(v) = as_str(&metadata, "orchestration_kit_root") {
            run.orchestration_kit_root = Some(v.to_string());
        }
        if let Some(v) = as_str(&metadata, "agent_runtime") {
            run.agent_runtime = Some(v.to_string());
        }
        if let Some(v) = as_str(&metadata, "host") {
            run.host = Some(v.to_string());
        }
        if let Some(v) = as_i64(&metadata, "pid") {
            run.pid = Some(v);
        }
        if run.reasoning.is_none() {
            if let Some(v) = as_str(&metadata, "reasoning") {
                run.reasoning = Some(v.to_string());
            }
        }

        if let Some(exp) = extract_experiment_name(&metadata) {
            run.experiment_name = Some(exp);
        }
    }

    if let Some(tracked) = manifest_full
        .get("artifact_index")
        .and_then(|v| v.get("tracked"))
        .and_then(|v| v.as_array())
    {
        if let Some(verdict) = extract_verdict(project.project_root_path, tracked, cfg) {
            run.verdict = Some(verdict);
        }
    }

    run.status = Some(
        ctl_core::model::RunStatus::derive(&run.finished_at, run.exit_code)
            .as_str()
            .to_string(),
    );

    let mut request_list: Vec<Request> = requests.into_values().collect();
    request_list.sort_by(|a, b| {
        let ak = (a.enqueued_ts.clone().unwrap_or_default(), a.request_id.clone());
        let bk = (b.enqueued_ts.clone().unwrap_or_default(), b.request_id.clone());
        ak.cmp(&bk)
    });

    (run, request_list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ctx<'a>(root: &'a Path) -> ProjectContext<'a> {
        ProjectContext {
            project_id: "abc123456789",
            orchestration_kit_root: "/kit",
            orchestration_kit_root_path: root,
            project_root: "/proj",
            project_root_path: root,
        }
    }

    #[test]
    fn lifecycle_round_trip_matches_s1() {
        let dir = tempdir().expect("tempdir");
        let run_root = dir.path().join("20260101T000000Z-aaaaaaaa");
        fs::create_dir_all(&run_root).expect("mkdir");
        fs::write(
            run_root.join("events.jsonl"),
            r#"{"event":"run_started","ts":"2026-01-01T00:00:00Z","run_id":"R1","kit":"research","phase":"cycle","pid":123}
"#,
        )
        .expect("write events");

        let cfg = ParserConfig::default();
        let project_ctx = ctx(dir.path());
        let (run, _requests) = parse_run(&cfg, &project_ctx, &run_root);
        assert_eq!(run.status.as_deref(), Some("running"));
        assert_eq!(run.kit.as_deref(), Some("research"));

        fs::write(
            run_root.join("events.jsonl"),
            "{\"event\":\"run_started\",\"ts\":\"2026-01-01T00:00:00Z\",\"run_id\":\"R1\",\"kit\":\"research\",\"phase\":\"cycle\",\"pid\":123}\n\
             {\"event\":\"run_finished\",\"ts\":\"2026-01-01T00:05:00Z\",\"exit_code\":0}\n",
        )
        .expect("write events 2");
        let (run2, _) = parse_run(&cfg, &project_ctx, &run_root);
        assert_eq!(run2.status.as_deref(), Some("ok"));
        assert_eq!(run2.exit_code, Some(0));
        assert_eq!(run2.kit.as_deref(), Some("research"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        fs::write(&path, "not json\n{\"event\":\"run_started\"}\n[1,2,3]\n\n").expect("write");
        let rows = parse_jsonl(&path);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn interop_events_upsert_one_request_sorted() {
        let dir = tempdir().expect("tempdir");
        let run_root = dir.path().join("run1");
        fs::create_dir_all(&run_root).expect("mkdir");
        fs::write(
            run_root.join("events.jsonl"),
            "{\"event\":\"request_enqueued\",\"ts\":\"2026-01-01T00:00:00Z\",\"request_id\":\"rq-1\",\"to_kit\":\"tdd\"}\n\
             {\"event\":\"request_completed\",\"ts\":\"2026-01-01T00:01:00Z\",\"request_id\":\"rq-1\",\"child_run_id\":\"R2\",\"status\":\"ok\"}\n",
        )
        .expect("write");
        let cfg = ParserConfig::default();
        let project_ctx = ctx(dir.path());
        let (_run, requests) = parse_run(&cfg, &project_ctx, &run_root);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].child_run_id.as_deref(), Some("R2"));
        assert_eq!(requests[0].status.as_deref(), Some("ok"));
    }

    #[test]
    fn missing_events_file_yields_running_skeleton() {
        let dir = tempdir().expect("tempdir");
        let run_root = dir.path().join("ghost");
        fs::create_dir_all(&run_root).expect("mkdir");
        let cfg = ParserConfig::default();
        let project_ctx = ctx(dir.path());
        let (run, requests) = parse_run(&cfg, &project_ctx, &run_root);
        assert_eq!(run.status.as_deref(), Some("running"));
        assert!(requests.is_empty());
    }
}
