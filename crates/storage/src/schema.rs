// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Additive SQLite schema. Every `ensure_schema` call creates the base
//! tables if absent and then attempts to add any columns introduced after
//! the original release; duplicate-column errors are swallowed, matching
//! `examples/original_source/dashboard/indexing.py`'s migration style.

use rusqlite::Connection;

const CREATE_PROJECTS: &str = "
CREATE TABLE IF NOT EXISTS projects (
    project_id TEXT PRIMARY KEY,
    label TEXT,
    orchestration_kit_root TEXT,
    project_root TEXT,
    registered_at TEXT,
    updated_at TEXT
)";

const CREATE_RUNS: &str = "
CREATE TABLE IF NOT EXISTS runs (
    project_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    parent_run_id TEXT,
    kit TEXT,
    phase TEXT,
    started_at TEXT,
    finished_at TEXT,
    exit_code INTEGER,
    status TEXT,
    capsule_path TEXT,
    manifest_path TEXT,
    log_path TEXT,
    events_path TEXT,
    cwd TEXT,
    project_root TEXT,
    orchestration_kit_root TEXT,
    agent_runtime TEXT,
    host TEXT,
    pid INTEGER,
    reasoning TEXT,
    experiment_name TEXT,
    verdict TEXT,
    PRIMARY KEY (project_id, run_id)
)";

const CREATE_REQUESTS: &str = "
CREATE TABLE IF NOT EXISTS requests (
    project_id TEXT NOT NULL,
    request_id TEXT NOT NULL,
    parent_run_id TEXT,
    child_run_id TEXT,
    from_kit TEXT,
    from_phase TEXT,
    to_kit TEXT,
    to_phase TEXT,
    action TEXT,
    status TEXT,
    request_path TEXT,
    response_path TEXT,
    enqueued_ts TEXT,
    completed_ts TEXT,
    reasoning TEXT,
    PRIMARY KEY (project_id, request_id)
)";

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_runs_project_started ON runs(project_id, started_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_runs_project_status ON runs(project_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_runs_project_parent ON runs(project_id, parent_run_id)",
    "CREATE INDEX IF NOT EXISTS idx_requests_project_parent ON requests(project_id, parent_run_id)",
    "CREATE INDEX IF NOT EXISTS idx_requests_project_child ON requests(project_id, child_run_id)",
];

/// Columns added after the initial release. Kept as a list of
/// `(table, column, type)` so a future addition is a one-line change.
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("runs", "reasoning", "TEXT"),
    ("runs", "experiment_name", "TEXT"),
    ("runs", "verdict", "TEXT"),
    ("requests", "reasoning", "TEXT"),
];

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    conn.execute(CREATE_PROJECTS, [])?;
    conn.execute(CREATE_RUNS, [])?;
    conn.execute(CREATE_REQUESTS, [])?;
    for stmt in INDEXES {
        conn.execute(stmt, [])?;
    }
    for (table, column, ty) in ADDITIVE_COLUMNS {
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {ty}");
        match conn.execute(&sql, []) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::Unknown
                    || e.extended_code == 1 /* SQLITE_ERROR: duplicate column name */ => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn open(path: &std::path::Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        ensure_schema(&conn).expect("first");
        ensure_schema(&conn).expect("second");
    }
}
