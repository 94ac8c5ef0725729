//! Operation planning: the create/move/update/delete/null decision table,
//! ordering, and execution.
//!
//! Operations are ordered so deletions free paths before moves use them,
//! moves reseat directories before creates pick destinations, and nested
//! creates run outer-first. Every operation is tested against the
//! accumulated set of deleted directories before anything runs, so a delete
//! followed by a create at the same path passes while a pre-existing
//! destination aborts the plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use jiri_core::{Config, GitOps, Project, ProjectKey, Projects};

use crate::error::{io_err, SyncError};
use crate::project_sync::{
    checkout_head_revision, sync_project, write_metadata, ProjectState, SyncOptions,
};

/// The kind of a reconciliation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Delete,
    Move,
    Create,
    Update,
    Null,
}

impl OpKind {
    // Execution order; ties between equal kinds break by project path.
    fn rank(self) -> u8 {
        match self {
            OpKind::Delete => 0,
            OpKind::Move => 1,
            OpKind::Create => 2,
            OpKind::Update => 3,
            OpKind::Null => 4,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Delete => "delete",
            OpKind::Move => "move",
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Null => "null",
        };
        f.write_str(s)
    }
}

/// A planned reconciliation operation over one project.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub project: Project,
    /// Current project path; empty for create.
    pub source: PathBuf,
    /// New project path; empty for delete.
    pub destination: PathBuf,
    /// Whether deletions actually remove the project or only advise.
    pub gc: bool,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = &self.project.name;
        let revision = fmt_revision(&self.project.revision);
        match self.kind {
            OpKind::Create => write!(
                f,
                "create project {name:?} in {:?} and advance it to {revision:?}",
                self.destination.display().to_string()
            ),
            OpKind::Delete => write!(
                f,
                "delete project {name:?} from {:?}",
                self.source.display().to_string()
            ),
            OpKind::Move => write!(
                f,
                "move project {name:?} located in {:?} to {:?} and advance it to {revision:?}",
                self.source.display().to_string(),
                self.destination.display().to_string()
            ),
            OpKind::Update => write!(
                f,
                "advance/rebase project {name:?} located in {:?} to {revision:?}",
                self.source.display().to_string()
            ),
            OpKind::Null => write!(
                f,
                "project {name:?} located in {:?} at revision {revision:?} is up-to-date",
                self.source.display().to_string()
            ),
        }
    }
}

// The first 8 characters of a revision hash.
fn fmt_revision(revision: &str) -> &str {
    revision.get(..8).unwrap_or(revision)
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Compute and order the operations needed to bring the local set into
/// agreement with the remote set.
pub fn compute_operations(
    local: &Projects,
    remote: &Projects,
    states: &HashMap<ProjectKey, ProjectState>,
    gc: bool,
    snapshot: bool,
) -> Vec<Operation> {
    let all_keys: BTreeSet<&ProjectKey> = local.keys().chain(remote.keys()).collect();
    let mut ops: Vec<Operation> = all_keys
        .into_iter()
        .map(|key| compute_op(local.get(key), remote.get(key), states.get(key), gc, snapshot))
        .collect();
    ops.sort_by(|a, b| {
        a.kind
            .rank()
            .cmp(&b.kind.rank())
            .then_with(|| a.project.path.cmp(&b.project.path))
    });
    ops
}

fn compute_op(
    local: Option<&Project>,
    remote: Option<&Project>,
    state: Option<&ProjectState>,
    gc: bool,
    snapshot: bool,
) -> Operation {
    match (local, remote) {
        (None, Some(remote)) => Operation {
            kind: OpKind::Create,
            project: remote.clone(),
            source: PathBuf::new(),
            destination: remote.path.clone(),
            gc: false,
        },
        (Some(local), None) => Operation {
            kind: OpKind::Delete,
            project: local.clone(),
            source: local.path.clone(),
            destination: PathBuf::new(),
            gc,
        },
        (Some(local), Some(remote)) => {
            let detached = state.map(|s| s.branch.is_none()).unwrap_or(true);
            let tracking_revision = state.and_then(|s| s.tracking.as_ref()).map(|t| &t.revision);
            let kind = if local.path != remote.path {
                // A move also updates, so the revision needs no check here.
                OpKind::Move
            } else if snapshot && local.revision != remote.revision {
                OpKind::Update
            } else if detached && local.revision == remote.revision {
                OpKind::Null
            } else if tracking_revision == Some(&local.revision) {
                OpKind::Null
            } else {
                OpKind::Update
            };
            Operation {
                kind,
                project: remote.clone(),
                source: local.path.clone(),
                destination: remote.path.clone(),
                gc: false,
            }
        }
        (None, None) => unreachable!("operation computed with neither local nor remote project"),
    }
}

// ---------------------------------------------------------------------------
// Pre-flight tests
// ---------------------------------------------------------------------------

/// Filesystem changes accumulated while testing a plan, so a delete followed
/// by a create at the same path passes pre-flight.
#[derive(Debug, Default)]
pub struct FsUpdates {
    deleted: HashSet<PathBuf>,
}

impl FsUpdates {
    pub fn new() -> Self {
        FsUpdates::default()
    }

    fn delete_dir(&mut self, dir: &Path) {
        self.deleted.insert(dir.to_path_buf());
    }

    fn is_deleted(&self, dir: &Path) -> bool {
        self.deleted.contains(dir)
    }
}

impl Operation {
    /// Check whether the operation would fail, recording planned deletions.
    pub fn test(&self, updates: &mut FsUpdates) -> Result<(), SyncError> {
        match self.kind {
            OpKind::Create => {
                if self.destination.exists() && !updates.is_deleted(&self.destination) {
                    return Err(SyncError::DestinationExists {
                        path: self.destination.clone(),
                    });
                }
                Ok(())
            }
            OpKind::Delete => {
                if !self.source.exists() {
                    return Err(SyncError::SourceMissing {
                        action: "delete",
                        path: self.source.clone(),
                    });
                }
                updates.delete_dir(&self.source);
                Ok(())
            }
            OpKind::Move => {
                if !self.source.exists() {
                    return Err(SyncError::SourceMissing {
                        action: "move",
                        path: self.source.clone(),
                    });
                }
                if self.destination.exists() {
                    return Err(SyncError::MoveDestinationExists {
                        from_path: self.source.clone(),
                        destination: self.destination.clone(),
                    });
                }
                updates.delete_dir(&self.source);
                Ok(())
            }
            OpKind::Update | OpKind::Null => Ok(()),
        }
    }

    /// Execute the operation.
    pub fn run(
        &self,
        config: &Config,
        git: &dyn GitOps,
        opts: &SyncOptions,
    ) -> Result<(), SyncError> {
        match self.kind {
            OpKind::Create => self.run_create(config, git),
            OpKind::Delete => self.run_delete(git),
            OpKind::Move => self.run_move(config, git, opts),
            OpKind::Update => self.run_update(config, git, opts),
            OpKind::Null => write_metadata(config, &self.project, &self.project.path),
        }
    }

    fn run_create(&self, config: &Config, git: &dyn GitOps) -> Result<(), SyncError> {
        let parent = self
            .destination
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        std::fs::create_dir_all(&parent).map_err(|e| io_err(&parent, e))?;

        // Clone into a temp sibling first so an untimely termination never
        // leaves a half-created project at its final path.
        let prefix = format!("{}-", self.project.name.replace('/', "."));
        let staging = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&parent)
            .map_err(|e| io_err(&parent, e))?;

        let cache = self
            .project
            .cache_dir_path(config)?
            .filter(|dir| dir.is_dir());
        git.clone_repo(&self.project.remote, staging.path(), cache.as_deref())?;
        write_metadata(config, &self.project, staging.path())?;
        make_traversable(staging.path())?;
        std::fs::rename(staging.path(), &self.destination)
            .map_err(|e| io_err(&self.destination, e))?;
        // The staging TempDir is now an empty husk; its drop is a no-op.
        checkout_head_revision(git, &self.project, false)
    }

    fn run_delete(&self, git: &dyn GitOps) -> Result<(), SyncError> {
        if !self.gc {
            tracing::warn!(
                "project {:?} was not found in the project manifest; it was not automatically \
                 removed to avoid deleting uncommitted work. If you no longer need it, invoke \
                 'rm -rf {}', or run update with gc to remove all such local projects",
                self.project.name,
                self.source.display()
            );
            return Ok(());
        }
        // Never delete projects with non-master branches, uncommitted work,
        // or untracked content.
        let branches = git.branches(&self.source)?;
        let extra_branches = branches
            .iter()
            .any(|b| !b.contains("HEAD detached") && b != "master");
        let uncommitted = git.has_uncommitted(&self.source)?;
        let untracked = git.has_untracked(&self.source)?;
        if extra_branches || uncommitted || untracked {
            tracing::warn!(
                "project {:?} was not found in the project manifest, but it contains non-master \
                 branches, uncommitted work, or untracked files and will thus not be deleted",
                self.project.name
            );
            return Ok(());
        }
        std::fs::remove_dir_all(&self.source).map_err(|e| io_err(&self.source, e))
    }

    fn run_move(
        &self,
        config: &Config,
        git: &dyn GitOps,
        opts: &SyncOptions,
    ) -> Result<(), SyncError> {
        if let Some(parent) = self.destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::rename(&self.source, &self.destination)
            .map_err(|e| io_err(&self.destination, e))?;
        sync_project(git, &self.project, opts)?;
        write_metadata(config, &self.project, &self.project.path)
    }

    fn run_update(
        &self,
        config: &Config,
        git: &dyn GitOps,
        opts: &SyncOptions,
    ) -> Result<(), SyncError> {
        sync_project(git, &self.project, opts)?;
        write_metadata(config, &self.project, &self.project.path)
    }
}

#[cfg(unix)]
fn make_traversable(path: &Path) -> Result<(), SyncError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn make_traversable(_path: &Path) -> Result<(), SyncError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
