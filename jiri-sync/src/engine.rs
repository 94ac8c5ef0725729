//! The parallel sync engine: update universe.
//!
//! One reconciliation runs scan → load → match → plan → test → run. Before
//! operations execute, two tasks run concurrently: one refreshes the cache,
//! fetches local projects, and observes git states; the other batches
//! remote-HEAD queries per host. Fan-out inside each pipeline is bounded by
//! the configured worker budget, and worker errors are accumulated rather
//! than dropped. Operations themselves run sequentially in planner order, so
//! no operation observes another's partial state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use jiri_core::project::HEAD_REVISION;
use jiri_core::{Config, GitOps, Hooks, HttpFetch, Project, ProjectKey, Projects, RemoteIndex};

use crate::error::{MultiError, SyncError};
use crate::hooks::{run_hooks, DEFAULT_HOOK_TIMEOUT};
use crate::loader::load_manifest_file;
use crate::matcher::match_local_with_remote;
use crate::plan::{compute_operations, FsUpdates, OpKind};
use crate::project_sync::{apply_git_hooks, fetch_all, get_project_states, SyncOptions};
use crate::scan::{local_projects, ScanMode};

/// Everything a reconciliation needs: configuration plus the injected
/// external services.
pub struct SyncCtx {
    pub config: Config,
    pub git: Arc<dyn GitOps>,
    pub index: Arc<dyn RemoteIndex>,
    pub http: Arc<dyn HttpFetch>,
}

/// Per-run flags for update universe.
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Delete local projects that disappeared from the manifest.
    pub gc: bool,
    /// Show per-project update logs.
    pub show_update_logs: bool,
    /// Read manifest-hosting repositories as they are on disk, without
    /// fetching or checking out their manifest revisions.
    pub local_manifest: bool,
    /// Rebase untracked branches onto the manifest revision.
    pub rebase_untracked: bool,
    /// Per-hook deadline.
    pub hook_timeout: Duration,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        UpdateOptions {
            gc: false,
            show_update_logs: false,
            local_manifest: false,
            rebase_untracked: false,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }
}

/// Bring the workspace into agreement with the manifest.
///
/// A fast scan is attempted first; any failure there retries with a full
/// scan. Specifying `gc` always forces a full scan, since deletions must see
/// every project on disk.
pub async fn update_universe(ctx: &SyncCtx, opts: &UpdateOptions) -> Result<(), SyncError> {
    tracing::info!("updating all projects");
    if opts.gc {
        return update_once(ctx, opts, ScanMode::Full).await;
    }
    match update_once(ctx, opts, ScanMode::Fast).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!("fast update failed ({err}); retrying with a full scan");
            update_once(ctx, opts, ScanMode::Full).await
        }
    }
}

async fn update_once(ctx: &SyncCtx, opts: &UpdateOptions, scan: ScanMode) -> Result<(), SyncError> {
    tracing::debug!("update universe: {scan}");
    let local = local_projects(&ctx.config, ctx.git.as_ref(), scan)?;
    let loaded = load_manifest_file(
        &ctx.config,
        ctx.git.as_ref(),
        &ctx.config.manifest_file,
        local,
        true,
        opts.local_manifest,
    )?;

    // The loader may have cloned manifest-hosting projects into its temp
    // workspace and added them to the known locals; the planner then moves
    // them into their final spots. The temp dir must outlive the moves.
    let _tmp_guard = loaded.tmp_dir;
    let mut local = loaded.local_projects;
    match_local_with_remote(&mut local, &loaded.projects);
    update_projects(ctx, opts, local, loaded.projects, loaded.hooks, false).await
}

/// Run the reconciliation pipeline over already-resolved local and remote
/// sets. `snapshot` forces every revision mismatch to an update.
pub(crate) async fn update_projects(
    ctx: &SyncCtx,
    opts: &UpdateOptions,
    local: Projects,
    mut remote: Projects,
    hooks: Hooks,
    snapshot: bool,
) -> Result<(), SyncError> {
    let prefetch = {
        let config = ctx.config.clone();
        let git = ctx.git.clone();
        let local = local.clone();
        let remote = remote.clone();
        async move {
            update_cache(&config, git.clone(), &remote).await?;
            fetch_local_projects(&config, git.clone(), &local, &remote).await?;
            tokio::task::spawn_blocking(move || get_project_states(git.as_ref(), &local))
                .await
                .map_err(|e| SyncError::Worker(e.to_string()))?
        }
    };
    let head_batch = remote_head_revisions(ctx.index.clone(), ctx.config.jobs, remote.clone());

    let (states, head_revisions) = tokio::join!(prefetch, head_batch);
    let states = states?;
    for (key, revision) in head_revisions {
        if let Some(project) = remote.get_mut(&key) {
            project.revision = revision;
        }
    }

    let ops = compute_operations(&local, &remote, &states, opts.gc, snapshot);
    let mut updates = FsUpdates::new();
    for op in &ops {
        op.test(&mut updates)?;
    }

    let sync_opts = SyncOptions {
        show_update_logs: opts.show_update_logs,
        rebase_untracked: opts.rebase_untracked,
        snapshot,
    };
    for op in &ops {
        if opts.show_update_logs {
            tracing::info!("{op}");
        }
        let config = ctx.config.clone();
        let git = ctx.git.clone();
        let name = op.project.name.clone();
        let op = op.clone();
        let sync_opts = sync_opts.clone();
        match tokio::task::spawn_blocking(move || op.run(&config, git.as_ref(), &sync_opts)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(SyncError::Project {
                    name,
                    source: Box::new(err),
                });
            }
            Err(err) => return Err(SyncError::Worker(err.to_string())),
        }
    }

    run_hooks(&hooks, opts.show_update_logs, opts.hook_timeout).await?;

    let survivors: Vec<Project> = ops
        .iter()
        .filter(|op| op.kind != OpKind::Delete)
        .map(|op| op.project.clone())
        .collect();
    let http = ctx.http.clone();
    tokio::task::spawn_blocking(move || apply_git_hooks(http.as_ref(), &survivors))
        .await
        .map_err(|e| SyncError::Worker(e.to_string()))??;
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

/// Refresh the shared bare-repo cache: fetch existing mirrors, create
/// missing ones. Deduplicated by cache path so projects sharing a cache do
/// not race.
async fn update_cache(
    config: &Config,
    git: Arc<dyn GitOps>,
    remote: &Projects,
) -> Result<(), SyncError> {
    if config.cache.is_none() {
        return Ok(());
    }
    let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));
    let mut seen = HashSet::new();
    let mut errs = Vec::new();
    let mut set: JoinSet<Result<(), SyncError>> = JoinSet::new();

    for project in remote.values() {
        let dir = match project.cache_dir_path(config) {
            Ok(Some(dir)) => dir,
            Ok(None) => continue,
            Err(err) => {
                errs.push(SyncError::from(err));
                continue;
            }
        };
        if !seen.insert(dir.clone()) {
            continue;
        }
        let git = git.clone();
        let semaphore = semaphore.clone();
        let remote_url = project.remote.clone();
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| SyncError::Worker(e.to_string()))?;
            tokio::task::spawn_blocking(move || -> Result<(), SyncError> {
                if dir.is_dir() {
                    git.fetch(&dir, "", true, true)?;
                } else {
                    git.clone_mirror(&remote_url, &dir)?;
                }
                Ok(())
            })
            .await
            .map_err(|e| SyncError::Worker(e.to_string()))?
        });
    }

    drain(&mut set, &mut errs).await;
    MultiError::from(errs).into_result()?;
    Ok(())
}

/// Fetch `origin` with prune for every local project that still exists
/// remotely.
async fn fetch_local_projects(
    config: &Config,
    git: Arc<dyn GitOps>,
    local: &Projects,
    remote: &Projects,
) -> Result<(), SyncError> {
    let semaphore = Arc::new(Semaphore::new(config.jobs.max(1)));
    let mut errs = Vec::new();
    let mut set: JoinSet<Result<(), SyncError>> = JoinSet::new();

    for (key, project) in local {
        if !remote.contains_key(key) {
            continue;
        }
        let git = git.clone();
        let semaphore = semaphore.clone();
        let project = project.clone();
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| SyncError::Worker(e.to_string()))?;
            let name = project.name.clone();
            tokio::task::spawn_blocking(move || fetch_all(git.as_ref(), &project))
                .await
                .map_err(|e| SyncError::Worker(e.to_string()))?
                .map_err(|err| SyncError::Fetch {
                    name,
                    source: Box::new(err),
                })
        });
    }

    drain(&mut set, &mut errs).await;
    MultiError::from(errs).into_result()?;
    Ok(())
}

async fn drain(set: &mut JoinSet<Result<(), SyncError>>, errs: &mut Vec<SyncError>) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => errs.push(err),
            Err(err) => errs.push(SyncError::Worker(err.to_string())),
        }
    }
}

struct HostEntry {
    key: ProjectKey,
    name: String,
    branch: String,
}

/// Materialize actual revisions for remote projects at `HEAD`, grouped into
/// one batched status query per host. Failures are logged and skipped; an
/// unanswered project simply classifies per-project later.
async fn remote_head_revisions(
    index: Arc<dyn RemoteIndex>,
    jobs: usize,
    remote: Projects,
) -> HashMap<ProjectKey, String> {
    let mut by_host: HashMap<String, Vec<HostEntry>> = HashMap::new();
    for project in remote.values() {
        if project.revision != HEAD_REVISION {
            continue;
        }
        let Some(host) = index.batch_host(&project.remote) else {
            continue;
        };
        by_host.entry(host).or_default().push(HostEntry {
            key: project.key(),
            name: project.name.clone(),
            branch: project.remote_branch.clone(),
        });
    }
    if by_host.is_empty() {
        return HashMap::new();
    }

    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut set = JoinSet::new();
    for (host, entries) in by_host {
        let index = index.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let branches: Vec<String> = entries
                .iter()
                .map(|e| e.branch.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let query_host = host.clone();
            let outcome = match tokio::task::spawn_blocking(move || {
                index.repo_statuses(&query_host, &branches)
            })
            .await
            {
                Ok(Ok(statuses)) => Ok(statuses),
                Ok(Err(err)) => Err(err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            (host, entries, outcome)
        });
    }

    let mut revisions = HashMap::new();
    while let Some(joined) = set.join_next().await {
        let Ok((host, entries, outcome)) = joined else {
            continue;
        };
        let statuses = match outcome {
            Ok(statuses) => statuses,
            Err(message) => {
                tracing::warn!("error fetching repo statuses from {host}: {message}");
                continue;
            }
        };
        for entry in entries {
            let Some(status) = statuses.get(&entry.name) else {
                continue;
            };
            let Some(revision) = status.branches.get(&entry.branch) else {
                continue;
            };
            if revision.is_empty() {
                continue;
            }
            revisions.insert(entry.key, revision.clone());
        }
    }
    revisions
}
