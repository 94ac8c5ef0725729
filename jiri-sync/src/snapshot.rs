//! Snapshots and update history.
//!
//! A snapshot is a manifest capturing every local project at its current
//! revision, plus the resolved hooks. Snapshots written after each update
//! land in `<root>/.jiri_root/update_history/` under an RFC3339 timestamp,
//! with `latest` and `second-latest` symlinks kept relative so they survive
//! a workspace root move.

use std::path::Path;

use chrono::{SecondsFormat, Utc};

use jiri_core::{Config, GitOps, Manifest, Projects};

use crate::engine::{update_projects, SyncCtx, UpdateOptions};
use crate::error::{io_err, SyncError};
use crate::loader::{load_manifest_file, LoadedWorld};
use crate::scan::{local_projects, ScanMode};

/// Write a snapshot of the current state of all projects to `file`.
pub fn create_snapshot(
    config: &Config,
    git: &dyn GitOps,
    file: &Path,
    local_manifest: bool,
) -> Result<(), SyncError> {
    let locals = local_projects(config, git, ScanMode::Full)?;
    let loaded = load_manifest_file(
        config,
        git,
        &config.manifest_file,
        locals.clone(),
        false,
        local_manifest,
    )?;
    let manifest = Manifest {
        projects: locals.into_values().collect(),
        hooks: loaded.hooks.into_values().collect(),
        ..Manifest::default()
    };
    manifest.to_file(config, file)?;
    Ok(())
}

/// Load a snapshot manifest. Snapshots may not contain remote imports:
/// resolving one would need the local projects this load exists to compute.
pub fn load_snapshot_file(
    config: &Config,
    git: &dyn GitOps,
    file: &Path,
) -> Result<LoadedWorld, SyncError> {
    load_manifest_file(config, git, file, Projects::new(), false, false)
}

/// Update every project to the state recorded in `snapshot`.
pub async fn checkout_snapshot(
    ctx: &SyncCtx,
    snapshot: &Path,
    gc: bool,
) -> Result<(), SyncError> {
    let scan = if gc { ScanMode::Full } else { ScanMode::Fast };
    let local = local_projects(&ctx.config, ctx.git.as_ref(), scan)?;
    let loaded = load_snapshot_file(&ctx.config, ctx.git.as_ref(), snapshot)?;
    let opts = UpdateOptions {
        gc,
        ..UpdateOptions::default()
    };
    update_projects(ctx, &opts, local, loaded.projects, loaded.hooks, true).await?;
    write_update_history_snapshot(&ctx.config, ctx.git.as_ref(), false)
}

/// Snapshot the workspace into the update history directory and rotate the
/// `latest` / `second-latest` symlinks.
pub fn write_update_history_snapshot(
    config: &Config,
    git: &dyn GitOps,
    local_manifest: bool,
) -> Result<(), SyncError> {
    let dir = config.update_history_dir();
    let snapshot_file = dir.join(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    create_snapshot(config, git, &snapshot_file, local_manifest)?;

    let latest = config.update_history_latest_link();
    let second_latest = config.update_history_second_latest_link();

    // If "latest" already points somewhere, reseat "second-latest" onto its
    // target before "latest" moves on.
    let latest_exists = latest.metadata().map(|m| m.is_file()).unwrap_or(false);
    if latest_exists {
        let target = std::fs::read_link(&latest).map_err(|e| io_err(&latest, e))?;
        let _ = std::fs::remove_file(&second_latest);
        symlink(&target, &second_latest)?;
    }

    // Keep the link target relative so the whole history directory can be
    // moved or copied.
    let target = snapshot_file
        .file_name()
        .map(Path::new)
        .unwrap_or(snapshot_file.as_path());
    let _ = std::fs::remove_file(&latest);
    symlink(target, &latest)?;
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<(), SyncError> {
    std::os::unix::fs::symlink(target, link).map_err(|e| io_err(link, e))
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> Result<(), SyncError> {
    std::os::windows::fs::symlink_file(target, link).map_err(|e| io_err(link, e))
}
