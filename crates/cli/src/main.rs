// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ctl`: thin command-line front door onto the control plane.
//!
//! Deliberately minimal — every command parses its flags, builds the
//! matching engine/storage call, and prints JSON. No business logic lives
//! here; it belongs in `ctl-engine`/`ctl-storage`/`ctl-cloud`/`ctl-mcp`.

mod exit_error;

use clap::{Parser, Subcommand};
use ctl_cloud::aws::AwsBackend;
use ctl_cloud::reaper::Reaper;
use ctl_core::clock::{Clock, SystemClock};
use ctl_core::config::{orchestration_kit_registry_path, McpConfig};
use ctl_core::ids;
use ctl_core::model::Project;
use ctl_engine::lifecycle::LifecycleEngine;
use ctl_storage::parser::ParserConfig;
use ctl_storage::registry::Registry;
use ctl_storage::IndexStore;
use exit_error::ExitError;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ctl", about = "Orchestration control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a project root with the control plane.
    Register {
        #[arg(long)]
        orchestration_kit_root: PathBuf,
        #[arg(long)]
        project_root: PathBuf,
        #[arg(long)]
        label: String,
    },
    /// List registered projects.
    Projects,
    /// Re-parse every run for every registered project into the index.
    Reindex {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        cleanup_stale: bool,
    },
    /// Re-parse a single run's events into the index.
    Upsert {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        run_id: String,
    },
    /// Flip abandoned `running` rows to `failed`.
    Gc {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Serve the MCP tool facade (stdio or HTTP, per environment).
    Serve {
        #[arg(long)]
        index: PathBuf,
    },
    /// Sweep the AWS fleet for leases past their max-hours or the hard
    /// ceiling, terminating anything overdue.
    Reap {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.code);
    }
}

async fn run(cli: Cli) -> Result<(), ExitError> {
    match cli.command {
        Command::Register { orchestration_kit_root, project_root, label } => {
            let project_id = ids::project_id(&orchestration_kit_root.to_string_lossy());
            let now = SystemClock.now_iso();
            let project = Project {
                project_id: project_id.clone(),
                label,
                orchestration_kit_root: orchestration_kit_root.to_string_lossy().to_string(),
                project_root: project_root.to_string_lossy().to_string(),
                registered_at: now.clone(),
                updated_at: now,
            };
            let registry = Registry::at(orchestration_kit_registry_path());
            registry.register(project)?;
            println!("{}", serde_json::json!({ "project_id": project_id }));
            Ok(())
        }
        Command::Projects => {
            let registry = Registry::at(orchestration_kit_registry_path());
            println!("{}", serde_json::to_string_pretty(&registry.list()).expect("serialize projects"));
            Ok(())
        }
        Command::Reindex { index, cleanup_stale } => {
            let index_store = Arc::new(IndexStore::open(&index).map_err(|e| ExitError::generic(e.to_string()))?);
            let registry = Registry::at(orchestration_kit_registry_path());
            let engine = LifecycleEngine::new(index_store, SystemClock, ParserConfig::default());
            let projects: Vec<(Project, PathBuf, PathBuf)> = registry
                .list()
                .into_iter()
                .map(|p| {
                    let kit_root = PathBuf::from(&p.orchestration_kit_root);
                    let project_root = PathBuf::from(&p.project_root);
                    (p, kit_root, project_root)
                })
                .collect();
            let outcome = engine.reindex(&projects, cleanup_stale)?;
            println!(
                "{}",
                serde_json::json!({
                    "projects_indexed": outcome.projects_indexed,
                    "runs_indexed": outcome.runs_indexed,
                    "requests_indexed": outcome.requests_indexed,
                    "stale_projects_removed": outcome.stale_projects_removed,
                    "missing_roots": outcome.missing_roots,
                })
            );
            Ok(())
        }
        Command::Upsert { index, project_id, run_id } => {
            let index_store = Arc::new(IndexStore::open(&index).map_err(|e| ExitError::generic(e.to_string()))?);
            let registry = Registry::at(orchestration_kit_registry_path());
            let project = registry
                .get(&project_id)
                .ok_or_else(|| ExitError::argument(format!("project {project_id} not registered")))?;
            let engine = LifecycleEngine::new(index_store, SystemClock, ParserConfig::default());
            let kit_root = PathBuf::from(&project.orchestration_kit_root);
            let project_root = PathBuf::from(&project.project_root);
            let run_root = kit_root.join("runs").join(&run_id);
            let outcome = engine.upsert_single_run(&project, &kit_root, &project_root, &run_id, &run_root);
            if let Some(error) = outcome.error {
                return Err(ExitError::generic(error));
            }
            println!("{}", serde_json::json!({ "run_id": outcome.run_id, "status": outcome.status }));
            Ok(())
        }
        Command::Gc { index, project_id, dry_run } => {
            let index_store = Arc::new(IndexStore::open(&index).map_err(|e| ExitError::generic(e.to_string()))?);
            let engine = LifecycleEngine::new(index_store, SystemClock, ParserConfig::default());
            let outcome = engine.gc(&project_id, dry_run)?;
            let reaped = !dry_run && !outcome.stale_runs.is_empty();
            println!(
                "{}",
                serde_json::json!({
                    "dry_run": outcome.dry_run,
                    "stale_runs": outcome.stale_runs,
                })
            );
            if reaped {
                std::process::exit(exit_error::EXIT_REAPED);
            }
            Ok(())
        }
        Command::Serve { index } => {
            let config = McpConfig::from_env()?;
            let registry_path = orchestration_kit_registry_path();
            ctl_mcp::serve(config, &index, &registry_path).await?;
            Ok(())
        }
        Command::Reap { bucket, dry_run } => {
            let backend = AwsBackend::from_env(bucket).await;
            let reaper = Reaper::new(SystemClock);
            let rows = reaper.sweep(&backend, dry_run).await.map_err(|e| ExitError::generic(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&rows_to_json(&rows)).expect("serialize reap rows"));
            Ok(())
        }
    }
}

fn rows_to_json(rows: &[ctl_cloud::reaper::ReapRow]) -> serde_json::Value {
    serde_json::json!(rows
        .iter()
        .map(|r| serde_json::json!({
            "instance_id": r.instance_id,
            "run_id": r.run_id,
            "age_hours": r.age_hours,
            "max_hours": r.max_hours,
            "reason": r.reason,
            "terminated": r.action == ctl_cloud::reaper::ReapAction::Terminate,
        }))
        .collect::<Vec<_>>())
}
