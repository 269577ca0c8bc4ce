// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The static tool catalogue returned by `tools/list`.
//!
//! Names and grouping follow `examples/original_source/mcp/server.py`'s
//! `TOOLS` table: legacy orchestrator primitives, fire-and-forget kit
//! launchers, synchronous dashboard queries, and process-visibility tools.

use serde_json::{json, Value};

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Whether this tool touches the SQLite index and must serialize
    /// under the facade-wide mutex.
    pub db_touching: bool,
}

pub const CATALOGUE: &[ToolSpec] = &[
    ToolSpec { name: "orchestrator.run", description: "Launch a kit workflow in the background.", db_touching: false },
    ToolSpec { name: "orchestrator.request_create", description: "Enqueue an interop request from one kit to another.", db_touching: false },
    ToolSpec { name: "orchestrator.pump", description: "Select and hand off the next pending interop request.", db_touching: false },
    ToolSpec { name: "orchestrator.run_info", description: "Fetch a run's indexed record.", db_touching: true },
    ToolSpec { name: "orchestrator.query_log", description: "Tail a run's event log.", db_touching: false },
    ToolSpec { name: "kit.tdd", description: "Launch a TDD workflow run.", db_touching: false },
    ToolSpec { name: "kit.research_cycle", description: "Launch one research cycle.", db_touching: false },
    ToolSpec { name: "kit.research_full", description: "Launch a full multi-cycle research run.", db_touching: false },
    ToolSpec { name: "kit.research_program", description: "Launch a research program across specs.", db_touching: false },
    ToolSpec { name: "kit.math", description: "Launch a math workflow run.", db_touching: false },
    ToolSpec { name: "kit.status", description: "Summarize indexed run counts for a project.", db_touching: true },
    ToolSpec { name: "kit.runs", description: "List indexed runs for a project.", db_touching: true },
    ToolSpec { name: "kit.capsule", description: "Fetch a run's capsule contents.", db_touching: true },
    ToolSpec { name: "kit.research_status", description: "Summarize research verdict history.", db_touching: true },
    ToolSpec { name: "kit.active", description: "List currently running processes.", db_touching: false },
    ToolSpec { name: "kit.kill", description: "Terminate a running process by run id.", db_touching: false },
    ToolSpec { name: "kit.gc", description: "Reap orphaned running rows.", db_touching: true },
    ToolSpec { name: "kit.research_batch", description: "Dispatch a cloud batch of research specs.", db_touching: false },
];

pub fn list_tools_result() -> Value {
    json!({
        "tools": CATALOGUE
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description }))
            .collect::<Vec<_>>()
    })
}

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    CATALOGUE.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_has_no_duplicate_names() {
        let mut names: Vec<&str> = CATALOGUE.iter().map(|t| t.name).collect();
        names.sort_unstable();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn find_locates_known_tool() {
        assert!(find("kit.status").is_some());
        assert!(find("kit.nonexistent").is_none());
    }
}
