// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C4: interop request/response router.
//!
//! Requests and responses are plain JSON files under
//! `interop/requests/{id}.json` and `interop/responses/{id}.json`; the
//! router never touches the index directly — lineage flows from the
//! `request_enqueued`/`request_completed` events the parser already
//! understands (SPEC_FULL.md §4.4).

use ctl_core::atomic::{read_json, write_json_atomic};
use ctl_core::clock::Clock;
use ctl_core::error::{Error, Result};
use ctl_core::ids;
use ctl_core::model::{Priority, ReadBudget, RequestFile, ResponseFile};
use std::fs;
use std::path::{Path, PathBuf};

pub struct InteropRouter<C: Clock> {
    run_root: PathBuf,
    clock: C,
}

pub struct CreateRequestInput {
    pub request_id: Option<String>,
    pub parent_run_id: String,
    pub from_kit: String,
    pub from_phase: String,
    pub to_kit: String,
    pub to_phase: String,
    pub action: String,
    pub args: Vec<String>,
    pub must_read: Vec<String>,
    pub read_budget: ReadBudget,
    pub deliverables_expected: Vec<String>,
    pub priority: Priority,
    pub reasoning: Option<String>,
}

const VALID_KITS: [&str; 3] = ["tdd", "research", "math"];

impl<C: Clock> InteropRouter<C> {
    pub fn new(run_root: impl Into<PathBuf>, clock: C) -> Self {
        Self { run_root: run_root.into(), clock }
    }

    fn requests_dir(&self) -> PathBuf {
        self.run_root.join("interop").join("requests")
    }

    fn responses_dir(&self) -> PathBuf {
        self.run_root.join("interop").join("responses")
    }

    fn request_path(&self, id: &str) -> PathBuf {
        self.requests_dir().join(format!("{id}.json"))
    }

    fn response_path(&self, id: &str) -> PathBuf {
        self.responses_dir().join(format!("{id}.json"))
    }

    /// Create (or overwrite) a request file. Validates endpoints and
    /// clamps the read budget to sane minimums, then appends a
    /// `request_enqueued` event to the parent run's event stream.
    pub fn create_request(&self, mut input: CreateRequestInput) -> Result<(String, PathBuf)> {
        if !VALID_KITS.contains(&input.from_kit.as_str()) {
            return Err(Error::validation(format!("unknown from_kit: {}", input.from_kit)));
        }
        if !VALID_KITS.contains(&input.to_kit.as_str()) {
            return Err(Error::validation(format!("unknown to_kit: {}", input.to_kit)));
        }
        input.read_budget.max_files = input.read_budget.max_files.max(1);
        input.read_budget.max_total_bytes = input.read_budget.max_total_bytes.max(1);

        let request_id = input.request_id.clone().unwrap_or_else(|| ids::request_id(&self.clock));
        let doc = RequestFile {
            request_id: request_id.clone(),
            parent_run_id: input.parent_run_id.clone(),
            from_kit: input.from_kit,
            from_phase: input.from_phase,
            to_kit: input.to_kit,
            to_phase: input.to_phase,
            action: input.action,
            args: input.args,
            must_read: input.must_read,
            read_budget: input.read_budget,
            deliverables_expected: input.deliverables_expected,
            priority: input.priority,
            reasoning: input.reasoning.clone(),
            enqueued_ts: self.clock.now_iso(),
        };

        let path = self.request_path(&request_id);
        write_json_atomic(&path, &doc)?;
        self.append_event(
            &input.parent_run_id,
            serde_json::json!({
                "event": "request_enqueued",
                "ts": doc.enqueued_ts,
                "request_id": request_id,
                "from_kit": doc.from_kit,
                "from_phase": doc.from_phase,
                "to_kit": doc.to_kit,
                "to_phase": doc.to_phase,
                "action": doc.action,
                "request_path": rel_path(&self.run_root, &path),
                "reasoning": doc.reasoning,
            }),
        )?;
        Ok((request_id, path))
    }

    /// Select the next pumpable request: no response file yet, ordered by
    /// priority (high > normal > low) then `enqueued_ts` ascending.
    pub fn select_next(&self) -> Result<Option<RequestFile>> {
        let dir = self.requests_dir();
        let Ok(entries) = fs::read_dir(&dir) else { return Ok(None) };
        let mut candidates = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let doc: RequestFile = match read_json(&path) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if self.response_path(&doc.request_id).exists() {
                continue; // already completed
            }
            candidates.push(doc);
        }
        candidates.sort_by(|a, b| {
            b.priority.rank().cmp(&a.priority.rank()).then(a.enqueued_ts.cmp(&b.enqueued_ts))
        });
        Ok(candidates.into_iter().next())
    }

    /// Record the completion of a pumped request: writes the response
    /// file atomically and appends `request_completed` to the parent run's
    /// event stream. Safe to call twice for the same request id
    /// (idempotent at the file level; the index's upsert absorbs the
    /// second event as a no-op status repeat).
    pub fn complete_request(
        &self,
        request_id: &str,
        parent_run_id: &str,
        child_run_id: &str,
        status: &str,
        capsule_path: Option<String>,
        manifest_path: Option<String>,
    ) -> Result<PathBuf> {
        let completed_ts = self.clock.now_iso();
        let response = ResponseFile {
            request_id: request_id.to_string(),
            child_run_id: child_run_id.to_string(),
            status: status.to_string(),
            capsule_path: capsule_path.clone(),
            manifest_path: manifest_path.clone(),
            completed_ts: completed_ts.clone(),
        };
        let path = self.response_path(request_id);
        write_json_atomic(&path, &response)?;
        self.append_event(
            parent_run_id,
            serde_json::json!({
                "event": "request_completed",
                "ts": completed_ts,
                "request_id": request_id,
                "child_run_id": child_run_id,
                "status": status,
                "response_path": rel_path(&self.run_root, &path),
            }),
        )?;
        Ok(path)
    }

    fn append_event(&self, run_id: &str, event: serde_json::Value) -> Result<()> {
        let events_path = self.run_root.join("runs").join(run_id).join("events.jsonl");
        if let Some(parent) = events_path.parent() {
            fs::create_dir_all(parent)?;
        }
        use std::io::Write;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&events_path)?;
        writeln!(file, "{}", serde_json::to_string(&event)?)?;
        Ok(())
    }
}

fn rel_path(base: &Path, target: &Path) -> String {
    target.strip_prefix(base).map(|p| p.to_string_lossy().to_string()).unwrap_or_else(|_| target.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctl_core::clock::FakeClock;
    use tempfile::tempdir;

    fn sample_input(parent_run_id: &str) -> CreateRequestInput {
        CreateRequestInput {
            request_id: None,
            parent_run_id: parent_run_id.to_string(),
            from_kit: "research".to_string(),
            from_phase: "frame".to_string(),
            to_kit: "tdd".to_string(),
            to_phase: "red".to_string(),
            action: "fix_bug".to_string(),
            args: vec![],
            must_read: vec![],
            read_budget: ReadBudget::default(),
            deliverables_expected: vec![],
            priority: Priority::Normal,
            reasoning: Some("because".to_string()),
        }
    }

    #[test]
    fn create_request_rejects_unknown_kit() {
        let dir = tempdir().expect("tempdir");
        let router = InteropRouter::new(dir.path(), FakeClock::at(0));
        let mut input = sample_input("r1");
        input.to_kit = "astrology".to_string();
        assert!(router.create_request(input).is_err());
    }

    #[test]
    fn create_and_complete_round_trip_matches_s6() {
        let dir = tempdir().expect("tempdir");
        let router = InteropRouter::new(dir.path(), FakeClock::at(0));
        let (request_id, _path) = router.create_request(sample_input("R1")).expect("create");

        let events = fs::read_to_string(dir.path().join("runs/R1/events.jsonl")).expect("events");
        assert!(events.contains("request_enqueued"));

        router
            .complete_request(&request_id, "R1", "R2", "ok", None, None)
            .expect("complete");
        let events = fs::read_to_string(dir.path().join("runs/R1/events.jsonl")).expect("events 2");
        assert!(events.contains("request_completed"));
        assert!(events.contains("R2"));
    }

    #[test]
    fn select_next_prefers_high_priority_then_fifo() {
        let dir = tempdir().expect("tempdir");
        let clock = FakeClock::at(0);
        let router = InteropRouter::new(dir.path(), clock.clone());

        let mut low = sample_input("R1");
        low.priority = Priority::Low;
        router.create_request(low).expect("low");

        clock.advance(std::time::Duration::from_secs(1));
        let mut high = sample_input("R1");
        high.priority = Priority::High;
        let (high_id, _) = router.create_request(high).expect("high");

        let next = router.select_next().expect("select").expect("some");
        assert_eq!(next.request_id, high_id);
    }

    #[test]
    fn select_next_skips_already_completed() {
        let dir = tempdir().expect("tempdir");
        let router = InteropRouter::new(dir.path(), FakeClock::at(0));
        let (request_id, _) = router.create_request(sample_input("R1")).expect("create");
        router.complete_request(&request_id, "R1", "R2", "ok", None, None).expect("complete");
        assert!(router.select_next().expect("select").is_none());
    }
}
