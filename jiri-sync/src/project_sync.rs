//! Per-project sync: the checkout/rebase state machine, metadata rewrite,
//! and git hook installation.
//!
//! A project off any branch (or any project in snapshot mode) is advanced by
//! a detached checkout; a project on a tracking branch is rebased onto its
//! tracking branch; a project on an untracked branch is rebased onto the
//! manifest revision only with the rebase-untracked opt-in. Uncommitted
//! changes always block and warn. Rebases that conflict are aborted, never
//! left half-done.

use std::collections::HashMap;
use std::path::Path;

use jiri_core::config::{project_meta_dir, project_meta_file};
use jiri_core::manifest::project_to_file;
use jiri_core::project::HEAD_REVISION;
use jiri_core::{Config, GitOps, HttpFetch, Project, ProjectKey, Projects};

use crate::error::{io_err, SyncError};

/// Per-run flags threaded through operation execution.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Show per-project update logs.
    pub show_update_logs: bool,
    /// Rebase branches that track no remote branch onto the manifest
    /// revision.
    pub rebase_untracked: bool,
    /// Snapshot mode: always advance to the exact manifest revision.
    pub snapshot: bool,
}

// ---------------------------------------------------------------------------
// Observed git state
// ---------------------------------------------------------------------------

/// The tracking branch of a checked-out branch, with its tip revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTracking {
    pub name: String,
    pub revision: String,
}

/// Observed state of a project checkout.
#[derive(Debug, Clone, Default)]
pub struct ProjectState {
    /// Current branch name; `None` on a detached HEAD.
    pub branch: Option<String>,
    /// Tracking branch of the current branch, when there is one.
    pub tracking: Option<BranchTracking>,
}

/// Observe the git state of every local project.
pub fn get_project_states(
    git: &dyn GitOps,
    projects: &Projects,
) -> Result<HashMap<ProjectKey, ProjectState>, SyncError> {
    let mut states = HashMap::new();
    for (key, project) in projects {
        let branch = git.current_branch(&project.path)?;
        let tracking = match git.tracking_branch(&project.path)? {
            Some(name) => {
                let revision = git.resolve_revision(&project.path, &name)?;
                Some(BranchTracking { name, revision })
            }
            None => None,
        };
        states.insert(key.clone(), ProjectState { branch, tracking });
    }
    Ok(states)
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// The revision a project should be advanced to: its pinned revision when
/// set, otherwise the tip of its tracked remote branch.
pub fn head_revision(project: &Project) -> String {
    if !project.revision.is_empty() && project.revision != HEAD_REVISION {
        return project.revision.clone();
    }
    let branch = if project.remote_branch.is_empty() {
        "master"
    } else {
        &project.remote_branch
    };
    format!("origin/{branch}")
}

/// Detach-checkout the project at its head revision.
pub fn checkout_head_revision(
    git: &dyn GitOps,
    project: &Project,
    force: bool,
) -> Result<(), SyncError> {
    git.checkout(&project.path, &head_revision(project), true, force)?;
    Ok(())
}

/// Point `origin` at the manifest remote and fetch it with prune.
pub fn fetch_all(git: &dyn GitOps, project: &Project) -> Result<(), SyncError> {
    if project.remote.is_empty() {
        return Err(SyncError::Core(jiri_core::CoreError::InvalidEntry(format!(
            "project {:?} does not have a remote",
            project.name
        ))));
    }
    git.set_remote_url(&project.path, "origin", &project.remote)?;
    git.fetch(&project.path, "origin", true, false)?;
    Ok(())
}

/// Rebase the current branch onto `upstream`. A dirty tree or a conflicting
/// rebase yields `false`; conflicts are aborted first.
fn try_rebase(git: &dyn GitOps, project: &Project, upstream: &str) -> Result<bool, SyncError> {
    if git.has_uncommitted(&project.path)? {
        return Ok(false);
    }
    if git.rebase(&project.path, upstream).is_err() {
        git.rebase_abort(&project.path)?;
        return Ok(false);
    }
    Ok(true)
}

/// Drive one project through the sync state machine.
///
/// Non-fatal outcomes (dirty tree, untracked branch without the opt-in,
/// conflicting rebase) warn and return success; the batch continues.
pub fn sync_project(
    git: &dyn GitOps,
    project: &Project,
    opts: &SyncOptions,
) -> Result<(), SyncError> {
    let current = git.current_branch(&project.path)?;
    if current.is_none() || opts.snapshot {
        if git.has_uncommitted(&project.path)? {
            tracing::warn!(
                "project {:?} ({}) contains uncommitted changes; commit or discard them and try again",
                project.name,
                project.path.display()
            );
            return Ok(());
        }
        if let Err(err) = checkout_head_revision(git, project, false) {
            let revision = head_revision(project);
            tracing::warn!(
                "project {:?}: not able to checkout latest: {err}; \
                 checkout manually with 'git checkout --detach {revision}'",
                project.name
            );
        }
        return Ok(());
    }

    let branch = current.unwrap_or_default();
    if let Some(tracking) = git.tracking_branch(&project.path)? {
        if try_rebase(git, project, &tracking)? {
            if opts.show_update_logs {
                tracing::info!(
                    "project {:?}: rebased local branch {branch} on {tracking}",
                    project.name
                );
            }
        } else {
            tracing::warn!(
                "project {:?}: not able to rebase local branch onto {tracking}; please do it manually",
                project.name
            );
        }
        return Ok(());
    }

    let revision = head_revision(project);
    if opts.rebase_untracked {
        if try_rebase(git, project, &revision)? {
            if opts.show_update_logs {
                tracing::info!(
                    "project {:?}: rebased untracked branch {branch} on {revision}",
                    project.name
                );
            }
        } else {
            tracing::warn!(
                "project {:?}: not able to rebase untracked branch onto {revision}; \
                 run 'git -C {} rebase {revision}' manually",
                project.name,
                project.path.display()
            );
        }
    } else {
        tracing::warn!(
            "project {:?}: branch {branch} does not track any remote branch; \
             update with --rebase-untracked, or run 'git -C {} rebase {revision}' manually",
            project.name,
            project.path.display()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Rewrite the project metadata record under `dir`.
pub fn write_metadata(config: &Config, project: &Project, dir: &Path) -> Result<(), SyncError> {
    let meta_dir = project_meta_dir(dir);
    std::fs::create_dir_all(&meta_dir).map_err(|e| io_err(&meta_dir, e))?;
    project_to_file(config, project, &project_meta_file(dir))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Git hooks and Gerrit commit-msg hooks
// ---------------------------------------------------------------------------

const EXCLUDE_ENTRY: &str = "/.jiri/\n";

/// Install Gerrit commit-msg hooks and project git hooks for every surviving
/// project, and hide the metadata directory from git.
///
/// The commit-msg hook is downloaded once per Gerrit host per run.
pub fn apply_git_hooks(
    http: &dyn HttpFetch,
    projects: &[Project],
) -> Result<(), SyncError> {
    let mut commit_hooks: HashMap<String, Vec<u8>> = HashMap::new();
    for project in projects {
        if let Some(host) = &project.gerrit_host {
            let body = match commit_hooks.get(host) {
                Some(body) => body.clone(),
                None => {
                    let url = format!("{host}/tools/hooks/commit-msg");
                    let body = http.get(&url)?;
                    commit_hooks.insert(host.clone(), body.clone());
                    body
                }
            };
            let hook_path = project.path.join(".git").join("hooks").join("commit-msg");
            std::fs::write(&hook_path, body).map_err(|e| io_err(&hook_path, e))?;
            set_executable(&hook_path, 0o750)?;
        }

        augment_exclude(&project.path)?;

        if let Some(hooks_dir) = &project.git_hooks {
            let dst = project.path.join(".git").join("hooks");
            copy_hooks_tree(hooks_dir, &dst)?;
        }
    }
    Ok(())
}

/// Add `/.jiri/` to `.git/info/exclude` when missing, preserving existing
/// entries.
fn augment_exclude(project_path: &Path) -> Result<(), SyncError> {
    let exclude_dir = project_path.join(".git").join("info");
    let exclude_file = exclude_dir.join("exclude");
    let existing = match std::fs::read_to_string(&exclude_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(io_err(&exclude_file, e)),
    };
    if existing.contains(EXCLUDE_ENTRY.trim_end()) {
        return Ok(());
    }
    std::fs::create_dir_all(&exclude_dir).map_err(|e| io_err(&exclude_dir, e))?;
    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(EXCLUDE_ENTRY);
    std::fs::write(&exclude_file, contents).map_err(|e| io_err(&exclude_file, e))?;
    Ok(())
}

/// Copy a hooks directory into `.git/hooks`, overwriting existing hooks.
/// Files must be executable for git to pick them up.
fn copy_hooks_tree(src: &Path, dst: &Path) -> Result<(), SyncError> {
    std::fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
    let entries = std::fs::read_dir(src).map_err(|e| io_err(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| io_err(&from, e))?;
        if file_type.is_dir() {
            copy_hooks_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| io_err(&to, e))?;
            set_executable(&to, 0o755)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path, mode: u32) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _mode: u32) -> Result<(), SyncError> {
    Ok(())
}
