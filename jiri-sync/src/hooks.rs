//! Post-sync hook execution.
//!
//! Hooks run in parallel, one task each, with a per-hook timeout. Output is
//! captured to temp files: stderr is replayed on failure, stdout only when
//! verbose or when the hook timed out (so partial output is not lost).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::task::JoinSet;

use jiri_core::{Hook, Hooks};

use crate::error::{io_err, MultiError, SyncError};

/// Default per-hook deadline.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct HookOutcome {
    hook: Hook,
    out_path: PathBuf,
    err_path: PathBuf,
    result: Result<(), SyncError>,
}

/// Run every hook, collecting all failures into a [`MultiError`].
pub async fn run_hooks(
    hooks: &Hooks,
    show_output: bool,
    timeout: Duration,
) -> Result<(), SyncError> {
    if hooks.is_empty() {
        return Ok(());
    }
    let tmp = tempfile::Builder::new()
        .prefix("run-hooks")
        .tempdir()
        .map_err(|e| io_err("run-hooks", e))?;

    let mut set = JoinSet::new();
    for hook in hooks.values() {
        tracing::info!(
            "running hook {:?} for project {:?}",
            hook.name,
            hook.project_name
        );
        let hook = hook.clone();
        let out_path = tmp.path().join(format!("{}-out", hook.name));
        let err_path = tmp.path().join(format!("{}-err", hook.name));
        set.spawn(async move {
            let result = run_hook(&hook, &out_path, &err_path, timeout).await;
            HookOutcome {
                hook,
                out_path,
                err_path,
                result,
            }
        });
    }

    let mut errs = Vec::new();
    while let Some(joined) = set.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                errs.push(SyncError::Worker(e.to_string()));
                continue;
            }
        };
        match outcome.result {
            Ok(()) => {
                if show_output {
                    replay(&outcome.out_path, &mut std::io::stdout());
                }
            }
            Err(err @ SyncError::HookTimeout { .. }) => {
                tracing::warn!("timeout while executing hook {:?}", outcome.hook.name);
                replay(&outcome.out_path, &mut std::io::stdout());
                errs.push(err);
            }
            Err(err) => {
                if show_output {
                    replay(&outcome.out_path, &mut std::io::stdout());
                }
                replay(&outcome.err_path, &mut std::io::stderr());
                errs.push(err);
            }
        }
    }
    MultiError::from(errs).into_result()?;
    Ok(())
}

async fn run_hook(
    hook: &Hook,
    out_path: &Path,
    err_path: &Path,
    timeout: Duration,
) -> Result<(), SyncError> {
    let out = std::fs::File::create(out_path).map_err(|e| io_err(out_path, e))?;
    let err = std::fs::File::create(err_path).map_err(|e| io_err(err_path, e))?;
    let program = hook.action_path.join(&hook.action);

    let mut child = tokio::process::Command::new(&program)
        .current_dir(&hook.action_path)
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .spawn()
        .map_err(|e| io_err(&program, e))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(SyncError::HookFailed {
            name: hook.name.clone(),
            status: status.to_string(),
        }),
        Ok(Err(e)) => Err(io_err(&program, e)),
        Err(_elapsed) => {
            let _ = child.kill().await;
            Err(SyncError::HookTimeout {
                name: hook.name.clone(),
                timeout,
            })
        }
    }
}

fn replay(path: &Path, sink: &mut dyn std::io::Write) {
    if let Ok(mut file) = std::fs::File::open(path) {
        let _ = std::io::copy(&mut file, sink);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use jiri_core::Hook;

    use super::*;

    fn executable_hook(dir: &Path, name: &str, script: &str) -> Hook {
        let action = PathBuf::from(format!("{name}.sh"));
        let path = dir.join(&action);
        std::fs::write(&path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        Hook {
            name: name.to_owned(),
            action,
            project_name: "p".to_owned(),
            action_path: dir.to_path_buf(),
        }
    }

    fn hooks_of(entries: Vec<Hook>) -> Hooks {
        entries.into_iter().map(|h| (h.key(), h)).collect()
    }

    #[tokio::test]
    async fn successful_hooks_pass() {
        let dir = tempfile::TempDir::new().unwrap();
        let hooks = hooks_of(vec![
            executable_hook(dir.path(), "ok-1", "#!/bin/sh\nexit 0\n"),
            executable_hook(dir.path(), "ok-2", "#!/bin/sh\necho done\n"),
        ]);
        run_hooks(&hooks, false, DEFAULT_HOOK_TIMEOUT).await.unwrap();
    }

    #[tokio::test]
    async fn failures_aggregate_into_multi_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let hooks = hooks_of(vec![
            executable_hook(dir.path(), "bad-1", "#!/bin/sh\nexit 1\n"),
            executable_hook(dir.path(), "bad-2", "#!/bin/sh\nexit 2\n"),
            executable_hook(dir.path(), "fine", "#!/bin/sh\nexit 0\n"),
        ]);
        let err = run_hooks(&hooks, false, DEFAULT_HOOK_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            SyncError::Multi(multi) => {
                assert_eq!(multi.len(), 2);
                assert!(multi.to_string().contains("and 1 other error"));
            }
            other => panic!("expected MultiError, got {other}"),
        }
    }

    #[tokio::test]
    async fn slow_hook_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let hooks = hooks_of(vec![executable_hook(
            dir.path(),
            "slow",
            "#!/bin/sh\nsleep 10\n",
        )]);
        let err = run_hooks(&hooks, false, Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            SyncError::Multi(multi) => {
                assert!(matches!(multi.0[0], SyncError::HookTimeout { .. }));
            }
            other => panic!("expected MultiError, got {other}"),
        }
    }
}
