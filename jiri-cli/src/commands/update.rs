//! `jiri update` — reconcile the workspace against the manifest.

use anyhow::{Context, Result};
use clap::Args;

use jiri_core::Config;
use jiri_sync::{update_universe, write_update_history_snapshot, UpdateOptions};

use super::{runtime, sync_ctx};

/// Arguments for `jiri update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Delete local projects that are no longer in the manifest.
    #[arg(long)]
    pub gc: bool,

    /// Rebase branches that track no remote branch onto the manifest
    /// revision.
    #[arg(long)]
    pub rebase_untracked: bool,

    /// Use manifest-hosting repositories as checked out locally instead of
    /// fetching their manifest revisions.
    #[arg(long)]
    pub local_manifest: bool,

    /// Show per-project update logs.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl UpdateArgs {
    pub fn run(self, config: Config) -> Result<()> {
        let local_manifest = self.local_manifest;
        let opts = UpdateOptions {
            gc: self.gc,
            show_update_logs: self.verbose,
            local_manifest,
            rebase_untracked: self.rebase_untracked,
            ..UpdateOptions::default()
        };
        let ctx = sync_ctx(config);
        runtime()?
            .block_on(update_universe(&ctx, &opts))
            .context("update failed")?;
        write_update_history_snapshot(&ctx.config, ctx.git.as_ref(), local_manifest)
            .context("failed to record update history snapshot")?;
        println!("Update complete.");
        Ok(())
    }
}
