//! Local project discovery.
//!
//! A directory is a project iff it holds a `.jiri/` metadata record. The
//! fast path trusts the latest update snapshot and only confirms that every
//! expected project still exists; anything else falls back to a full
//! recursive walk of the workspace root.

use std::path::Path;

use jiri_core::config::{project_meta_dir, project_meta_file};
use jiri_core::manifest::project_from_file;
use jiri_core::{Config, GitOps, Projects};

use crate::error::{io_err, SyncError};
use crate::snapshot::load_snapshot_file;

/// Whether to trust the latest snapshot ([`ScanMode::Fast`]) or walk the
/// whole workspace ([`ScanMode::Full`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Fast,
    Full,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Fast => f.write_str("FastScan"),
            ScanMode::Full => f.write_str("FullScan"),
        }
    }
}

/// Discover the projects on the local filesystem, with each project's
/// revision set to what is actually checked out.
///
/// With [`ScanMode::Fast`] and a latest snapshot present, the snapshot's
/// project set is returned as long as every listed project exists on disk.
pub fn local_projects(
    config: &Config,
    git: &dyn GitOps,
    mode: ScanMode,
) -> Result<Projects, SyncError> {
    let latest = config.update_history_latest_link();
    let latest_exists = latest.metadata().map(|m| m.is_file()).unwrap_or(false);
    if mode == ScanMode::Fast && latest_exists {
        // The snapshot may not contain remote imports; loading it with no
        // known locals guarantees that (resolving one would recurse into
        // needing the local projects we are computing).
        let world = load_snapshot_file(config, git, &latest)?;
        if projects_exist_locally(&world.projects) {
            return set_project_revisions(git, world.projects);
        }
        tracing::debug!("snapshot projects missing on disk; falling back to a full scan");
    }

    let mut projects = Projects::new();
    find_local_projects(config, &config.root, &mut projects)?;
    set_project_revisions(git, projects)
}

fn projects_exist_locally(projects: &Projects) -> bool {
    projects.values().all(|p| is_local_project(&p.path))
}

/// True when `path` holds a project metadata record.
pub fn is_local_project(path: &Path) -> bool {
    project_meta_dir(path).is_dir()
}

fn set_project_revisions(git: &dyn GitOps, mut projects: Projects) -> Result<Projects, SyncError> {
    for project in projects.values_mut() {
        project.revision = git.current_revision(&project.path)?;
    }
    Ok(projects)
}

// Recursive walk. Project directories can nest, so the walk continues below
// discovered projects; dot-prefixed entries are skipped.
fn find_local_projects(
    config: &Config,
    path: &Path,
    projects: &mut Projects,
) -> Result<(), SyncError> {
    if is_local_project(path) {
        let project = project_from_file(config, &project_meta_file(path))?;
        if path != project.path {
            tracing::warn!(
                "project {:?} has recorded path {} but was found in {}; treating it as stale. \
                 Delete it or move it out of the workspace to remove this warning",
                project.name,
                project.path.display(),
                path.display()
            );
            return Ok(());
        }
        if let Some(existing) = projects.get(&project.key()) {
            return Err(SyncError::ScanConflict {
                key: project.key(),
                path_a: existing.path.clone(),
                path_b: project.path.clone(),
            });
        }
        projects.insert(project.key(), project);
    }

    let entries = std::fs::read_dir(path).map_err(|e| io_err(path, e))?;
    let mut dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && !entry.file_name().to_string_lossy().starts_with('.')
        })
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    for dir in dirs {
        find_local_projects(config, &dir, projects)?;
    }
    Ok(())
}
