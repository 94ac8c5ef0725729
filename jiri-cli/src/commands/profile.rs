//! `jiri profile` — inspect and edit the installed-profiles database.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use jiri_core::Config;
use jiri_profiles::{ProfileDb, Target};

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// List installed profiles and their targets.
    List,

    /// Install a profile (no-op when it already exists).
    Install {
        name: String,

        /// Root directory the profile is installed under.
        #[arg(long, default_value = "")]
        root: String,
    },

    /// Add an installation target to a profile.
    AddTarget {
        name: String,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Refresh the version of an existing target.
    UpdateTarget {
        name: String,

        #[arg(long)]
        tag: String,

        #[arg(long)]
        version: String,
    },

    /// Remove a target; the profile is dropped with its last target.
    RemoveTarget {
        name: String,

        #[arg(long)]
        tag: String,
    },
}

/// Target attributes shared by profile subcommands.
#[derive(Args, Debug)]
pub struct TargetArgs {
    #[arg(long)]
    pub tag: String,

    #[arg(long, default_value = "")]
    pub arch: String,

    #[arg(long, default_value = "")]
    pub os: String,

    #[arg(long, default_value = "")]
    pub installation_dir: PathBuf,

    #[arg(long, default_value = "")]
    pub version: String,

    /// Environment variables as NAME=value, repeatable.
    #[arg(long = "env")]
    pub env: Vec<String>,
}

impl From<TargetArgs> for Target {
    fn from(args: TargetArgs) -> Self {
        Target {
            arch: args.arch,
            os: args.os,
            installation_dir: args.installation_dir,
            version: args.version,
            env: args.env,
            ..Target::new(args.tag)
        }
    }
}

pub fn run(command: ProfileCommand, config: Config) -> Result<()> {
    let db_file = config.profiles_db_file();
    let db = ProfileDb::new();
    db.read(&db_file)
        .with_context(|| format!("failed to read profiles from {}", db_file.display()))?;

    match command {
        ProfileCommand::List => {
            for name in db.names() {
                let Some(profile) = db.lookup(&name) else {
                    continue;
                };
                println!("{name}");
                for target in profile.targets {
                    println!(
                        "  {} ({}-{}) version {} at {}",
                        target.tag,
                        target.arch,
                        target.os,
                        target.version,
                        target.installation_dir.display()
                    );
                }
            }
            return Ok(());
        }
        ProfileCommand::Install { name, root } => {
            db.install(&name, &root);
        }
        ProfileCommand::AddTarget { name, target } => {
            db.add_target(&name, target.into())
                .with_context(|| format!("failed to add target to profile '{name}'"))?;
        }
        ProfileCommand::UpdateTarget { name, tag, version } => {
            db.update_target(&name, &tag, &version);
        }
        ProfileCommand::RemoveTarget { name, tag } => {
            db.remove_target(&name, &tag);
        }
    }

    db.write(&db_file)
        .with_context(|| format!("failed to write profiles to {}", db_file.display()))?;
    Ok(())
}
