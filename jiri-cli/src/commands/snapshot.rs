//! `jiri snapshot` — create and check out workspace snapshots.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use jiri_core::gitops::GitCli;
use jiri_core::Config;
use jiri_sync::{checkout_snapshot, create_snapshot};

use super::{runtime, sync_ctx};

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Write a snapshot of the current state of all projects to a file.
    Create {
        /// Destination file.
        file: PathBuf,
    },

    /// Update all projects to the state recorded in a snapshot file.
    Checkout {
        /// Snapshot file to restore.
        file: PathBuf,

        /// Delete local projects not present in the snapshot.
        #[arg(long)]
        gc: bool,
    },
}

pub fn run(command: SnapshotCommand, config: Config) -> Result<()> {
    match command {
        SnapshotCommand::Create { file } => {
            create_snapshot(&config, &GitCli::new(), &file, false)
                .with_context(|| format!("failed to create snapshot at {}", file.display()))?;
            println!("Snapshot written to {}.", file.display());
            Ok(())
        }
        SnapshotCommand::Checkout { file, gc } => {
            let ctx = sync_ctx(config);
            runtime()?
                .block_on(checkout_snapshot(&ctx, &file, gc))
                .with_context(|| format!("failed to check out snapshot {}", file.display()))?;
            println!("Snapshot {} checked out.", file.display());
            Ok(())
        }
    }
}
