//! Git operations behind a trait seam.
//!
//! Everything that shells out to git goes through [`GitOps`] so the sync
//! machinery can be driven against an in-memory fake in tests. [`GitCli`] is
//! the production implementation on top of the `git` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{io_err, CoreError};

/// Abstract git operations used by the loader, scanner, and sync engine.
///
/// `dir` is always the repository worktree the command runs in. Implementors
/// must be shareable across worker tasks.
pub trait GitOps: Send + Sync {
    /// Clone `remote` into `dir`, optionally using `reference` as a local
    /// object reference.
    fn clone_repo(&self, remote: &str, dir: &Path, reference: Option<&Path>)
        -> Result<(), CoreError>;

    /// Mirror-clone `remote` into `dir` (bare, for the cache).
    fn clone_mirror(&self, remote: &str, dir: &Path) -> Result<(), CoreError>;

    /// Fetch from `remote` (all remotes when empty), pruning stale refs.
    fn fetch(&self, dir: &Path, remote: &str, prune: bool, all: bool) -> Result<(), CoreError>;

    /// Point the named remote at `url`.
    fn set_remote_url(&self, dir: &Path, name: &str, url: &str) -> Result<(), CoreError>;

    /// Check out `rev`, optionally detached and/or forced.
    fn checkout(&self, dir: &Path, rev: &str, detach: bool, force: bool) -> Result<(), CoreError>;

    /// Rebase the current branch onto `upstream`.
    fn rebase(&self, dir: &Path, upstream: &str) -> Result<(), CoreError>;

    /// Abort an in-progress rebase.
    fn rebase_abort(&self, dir: &Path) -> Result<(), CoreError>;

    /// Stash local changes. Returns whether anything was stashed.
    fn stash(&self, dir: &Path) -> Result<bool, CoreError>;

    /// Pop the most recent stash entry.
    fn stash_pop(&self, dir: &Path) -> Result<(), CoreError>;

    /// The current branch name, or `None` on a detached HEAD.
    fn current_branch(&self, dir: &Path) -> Result<Option<String>, CoreError>;

    /// The remote tracking branch of the current branch, or `None`.
    fn tracking_branch(&self, dir: &Path) -> Result<Option<String>, CoreError>;

    /// The revision HEAD points at.
    fn current_revision(&self, dir: &Path) -> Result<String, CoreError>;

    /// Resolve an arbitrary revision expression to a commit hash.
    fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<String, CoreError>;

    /// The top-level directory of the repository containing `dir`.
    fn top_level(&self, dir: &Path) -> Result<PathBuf, CoreError>;

    /// All local branch names, as printed by `git branch` (a detached HEAD
    /// shows up as a `(HEAD detached ...)` entry).
    fn branches(&self, dir: &Path) -> Result<Vec<String>, CoreError>;

    /// Whether the index or worktree differ from HEAD.
    fn has_uncommitted(&self, dir: &Path) -> Result<bool, CoreError>;

    /// Whether untracked files exist.
    fn has_untracked(&self, dir: &Path) -> Result<bool, CoreError>;

    /// Commits reachable from `from` but not `to`, one formatted entry per
    /// commit.
    fn log(&self, dir: &Path, from: &str, to: &str, format: &str)
        -> Result<Vec<String>, CoreError>;

    /// Stage `file` and commit it with `message`.
    fn commit_file(&self, dir: &Path, file: &Path, message: &str) -> Result<(), CoreError>;
}

/// Convenience: whether HEAD is on a branch.
pub fn is_on_branch(git: &dyn GitOps, dir: &Path) -> Result<bool, CoreError> {
    Ok(git.current_branch(dir)?.is_some())
}

// ---------------------------------------------------------------------------
// GitCli
// ---------------------------------------------------------------------------

/// [`GitOps`] implementation that shells out to the `git` binary.
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        GitCli
    }

    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, CoreError> {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        cmd.args(args);
        tracing::debug!("git {}", args.join(" "));
        let output = cmd
            .output()
            .map_err(|e| io_err(dir.unwrap_or_else(|| Path::new(".")), e))?;
        if !output.status.success() {
            return Err(CoreError::Git {
                args: args.iter().map(|s| (*s).to_owned()).collect(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl GitOps for GitCli {
    fn clone_repo(
        &self,
        remote: &str,
        dir: &Path,
        reference: Option<&Path>,
    ) -> Result<(), CoreError> {
        let dir_str = dir.to_string_lossy();
        let mut args = vec!["clone"];
        let reference_arg;
        if let Some(reference) = reference {
            reference_arg = format!("--reference={}", reference.to_string_lossy());
            args.push(&reference_arg);
        }
        args.push(remote);
        args.push(&dir_str);
        self.run(None, &args)?;
        Ok(())
    }

    fn clone_mirror(&self, remote: &str, dir: &Path) -> Result<(), CoreError> {
        let dir_str = dir.to_string_lossy();
        self.run(None, &["clone", "--mirror", remote, &dir_str])?;
        Ok(())
    }

    fn fetch(&self, dir: &Path, remote: &str, prune: bool, all: bool) -> Result<(), CoreError> {
        let mut args = vec!["fetch"];
        if all {
            args.push("--all");
        }
        if prune {
            args.push("--prune");
        }
        if !remote.is_empty() {
            args.push(remote);
        }
        self.run(Some(dir), &args)?;
        Ok(())
    }

    fn set_remote_url(&self, dir: &Path, name: &str, url: &str) -> Result<(), CoreError> {
        self.run(Some(dir), &["remote", "set-url", name, url])?;
        Ok(())
    }

    fn checkout(&self, dir: &Path, rev: &str, detach: bool, force: bool) -> Result<(), CoreError> {
        let mut args = vec!["checkout"];
        if detach {
            args.push("--detach");
        }
        if force {
            args.push("--force");
        }
        args.push(rev);
        self.run(Some(dir), &args)?;
        Ok(())
    }

    fn rebase(&self, dir: &Path, upstream: &str) -> Result<(), CoreError> {
        self.run(Some(dir), &["rebase", upstream])?;
        Ok(())
    }

    fn rebase_abort(&self, dir: &Path) -> Result<(), CoreError> {
        self.run(Some(dir), &["rebase", "--abort"])?;
        Ok(())
    }

    fn stash(&self, dir: &Path) -> Result<bool, CoreError> {
        let out = self.run(Some(dir), &["stash"])?;
        Ok(!out.contains("No local changes to save"))
    }

    fn stash_pop(&self, dir: &Path) -> Result<(), CoreError> {
        self.run(Some(dir), &["stash", "pop"])?;
        Ok(())
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, CoreError> {
        let out = self.run(Some(dir), &["rev-parse", "--abbrev-ref", "HEAD"])?;
        if out == "HEAD" {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn tracking_branch(&self, dir: &Path) -> Result<Option<String>, CoreError> {
        match self.run(
            Some(dir),
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
        ) {
            Ok(out) if !out.is_empty() => Ok(Some(out)),
            Ok(_) => Ok(None),
            // A branch without an upstream (or a detached HEAD) is a
            // legitimate state, not an error; anything else propagates.
            Err(CoreError::Git { message, .. })
                if message.contains("no upstream configured")
                    || message.contains("does not point to a branch") =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn current_revision(&self, dir: &Path) -> Result<String, CoreError> {
        self.run(Some(dir), &["rev-parse", "HEAD"])
    }

    fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<String, CoreError> {
        self.run(Some(dir), &["rev-parse", rev])
    }

    fn top_level(&self, dir: &Path) -> Result<PathBuf, CoreError> {
        let out = self.run(Some(dir), &["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out))
    }

    fn branches(&self, dir: &Path) -> Result<Vec<String>, CoreError> {
        let out = self.run(Some(dir), &["branch"])?;
        Ok(out
            .lines()
            .map(|l| l.trim_start_matches("* ").trim().to_owned())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn has_uncommitted(&self, dir: &Path) -> Result<bool, CoreError> {
        let out = self.run(Some(dir), &["status", "--porcelain"])?;
        Ok(out.lines().any(|l| !l.starts_with("??")))
    }

    fn has_untracked(&self, dir: &Path) -> Result<bool, CoreError> {
        let out = self.run(Some(dir), &["status", "--porcelain"])?;
        Ok(out.lines().any(|l| l.starts_with("??")))
    }

    fn log(
        &self,
        dir: &Path,
        from: &str,
        to: &str,
        format: &str,
    ) -> Result<Vec<String>, CoreError> {
        let pretty = format!("--pretty=format:{format}");
        let range = format!("{to}..{from}");
        let out = self.run(Some(dir), &["log", &pretty, &range])?;
        Ok(out.lines().map(str::to_owned).collect())
    }

    fn commit_file(&self, dir: &Path, file: &Path, message: &str) -> Result<(), CoreError> {
        let file_str = file.to_string_lossy();
        self.run(Some(dir), &["add", &file_str])?;
        self.run(Some(dir), &["commit", "-m", message, "--", &file_str])?;
        Ok(())
    }
}
