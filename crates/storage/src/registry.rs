// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project registry file: a sorted JSON array of `Project` records at
//! `~/.orchestration-kit/registry.json`, rewritten atomically on every
//! register/unregister. Ported from
//! `examples/original_source/dashboard/registry.py`.

use ctl_core::atomic::{read_json_or_default, write_json_atomic};
use ctl_core::model::Project;
use std::path::{Path, PathBuf};

pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Vec<Project> {
        read_json_or_default(&self.path, Vec::new())
    }

    fn save(&self, mut projects: Vec<Project>) -> ctl_core::Result<()> {
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        write_json_atomic(&self.path, &projects)
    }

    pub fn list(&self) -> Vec<Project> {
        self.load()
    }

    pub fn get(&self, project_id: &str) -> Option<Project> {
        self.load().into_iter().find(|p| p.project_id == project_id)
    }

    /// Register (or re-register) a project. Idempotent: an existing entry
    /// with the same `project_id` is replaced, not duplicated.
    pub fn register(&self, project: Project) -> ctl_core::Result<()> {
        let mut projects = self.load();
        projects.retain(|p| p.project_id != project.project_id);
        projects.push(project);
        self.save(projects)
    }

    pub fn unregister(&self, project_id: &str) -> ctl_core::Result<bool> {
        let mut projects = self.load();
        let before = projects.len();
        projects.retain(|p| p.project_id != project_id);
        let changed = projects.len() != before;
        self.save(projects)?;
        Ok(changed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn project(id: &str) -> Project {
        Project {
            project_id: id.into(),
            label: "demo".into(),
            orchestration_kit_root: "/kit".into(),
            project_root: "/proj".into(),
            registered_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn register_is_idempotent_by_project_id() {
        let dir = tempdir().expect("tempdir");
        let registry = Registry::at(dir.path().join("registry.json"));
        registry.register(project("p1")).expect("register");
        let mut updated = project("p1");
        updated.label = "renamed".into();
        registry.register(updated).expect("re-register");

        let all = registry.list();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].label, "renamed");
    }

    #[test]
    fn unregister_removes_entry() {
        let dir = tempdir().expect("tempdir");
        let registry = Registry::at(dir.path().join("registry.json"));
        registry.register(project("p1")).expect("register");
        assert!(registry.unregister("p1").expect("unregister"));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let registry = Registry::at(dir.path().join("does-not-exist.json"));
        assert!(registry.list().is_empty());
    }
}
