//! jiri — multi-repository workspace manager.
//!
//! # Usage
//!
//! ```text
//! jiri update [--gc] [--rebase-untracked] [--local-manifest] [-v]
//! jiri snapshot create <file>
//! jiri snapshot checkout <file> [--gc]
//! jiri profile list
//! jiri profile install <name> [--root <dir>]
//! jiri profile add-target <name> --tag <tag> [--arch ...] [--os ...] ...
//! jiri profile remove-target <name> --tag <tag>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{profile::ProfileCommand, snapshot::SnapshotCommand, update::UpdateArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "jiri",
    version,
    about = "Reconcile a multi-repository workspace against its manifest",
    long_about = None,
)]
struct Cli {
    /// Workspace root (defaults to $JIRI_ROOT, then the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Worker budget for parallel fan-out.
    #[arg(short = 'j', long, global = true)]
    jobs: Option<usize>,

    /// Bare-repository mirror directory used as a clone reference.
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Root manifest file (defaults to <root>/.jiri_manifest).
    #[arg(long, global = true)]
    manifest: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update all projects to match the manifest.
    Update(UpdateArgs),

    /// Create or check out workspace snapshots.
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },

    /// Inspect and edit the installed-profiles database.
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    match cli.command {
        Commands::Update(args) => args.run(config),
        Commands::Snapshot { command } => commands::snapshot::run(command, config),
        Commands::Profile { command } => commands::profile::run(command, config),
    }
}

fn build_config(cli: &Cli) -> Result<jiri_core::Config> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => match std::env::var_os("JIRI_ROOT") {
            Some(root) => PathBuf::from(root),
            None => std::env::current_dir().context("could not determine current directory")?,
        },
    };
    let mut config = jiri_core::Config::new(root);
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs.max(1);
    }
    config.cache = cli.cache.clone();
    if let Some(manifest) = &cli.manifest {
        config.manifest_file = manifest.clone();
    }
    Ok(config)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
