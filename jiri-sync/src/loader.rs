//! Recursive manifest loading with import resolution and cycle detection.
//!
//! There are two kinds of cycles. A *file* cycle repeats a manifest file
//! path on the local filesystem (manifest A local-imports B, B local-imports
//! A). A *remote* cycle repeats the `(remote, manifest)` pair of a remote
//! import. One stack of `(file, cycle key)` frames covers both: every
//! traversal pushes a frame, and a repeated file or repeated non-empty key is
//! reported with the whole stack. Mixed local/remote cycles eventually repeat
//! one of the two, so they are caught as well.
//!
//! Loading is NOT safe for concurrent invocation: remote imports check out
//! revisions in manifest-hosting repositories, and git locks the index.
//! Callers serialize top-level reconciliation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use jiri_core::project::HEAD_REVISION;
use jiri_core::{Config, GitOps, Hooks, Import, Manifest, Project, ProjectKey, Projects};

use crate::error::{io_err, SyncError};
use crate::project_sync::{checkout_head_revision, fetch_all};

/// The flat output of a manifest load.
#[derive(Debug)]
pub struct LoadedWorld {
    /// All resolved projects, keyed uniquely.
    pub projects: Projects,
    /// All resolved hooks, with absolute action paths.
    pub hooks: Hooks,
    /// The known local projects, including any manifest-hosting projects
    /// cloned into the temp workspace during this load.
    pub local_projects: Projects,
    /// Temp workspace holding manifest-hosting clones; removed on drop, so
    /// callers keep it alive until planned moves out of it have run.
    pub tmp_dir: Option<TempDir>,
}

/// Load the manifest rooted at `file`, resolving remote and local imports.
///
/// `local_projects` resolves remote imports. In `update` mode, remote
/// changes to manifest projects are fetched, and manifest projects that do
/// not exist locally are cloned into a temp workspace and added to the known
/// locals; outside update mode an unknown manifest project is an error.
/// With `local_manifest`, manifest-hosting repositories are read as-is,
/// without the checkout dance.
pub fn load_manifest_file(
    config: &Config,
    git: &dyn GitOps,
    file: &Path,
    local_projects: Projects,
    update: bool,
    local_manifest: bool,
) -> Result<LoadedWorld, SyncError> {
    let mut loader = Loader {
        config,
        git,
        projects: Projects::new(),
        hooks: Hooks::new(),
        local_projects,
        update,
        tmp_dir: None,
        cycle_stack: Vec::new(),
        loaded: HashSet::new(),
    };
    loader.load_cycle_checked("", file, "", local_manifest)?;
    Ok(LoadedWorld {
        projects: loader.projects,
        hooks: loader.hooks,
        local_projects: loader.local_projects,
        tmp_dir: loader.tmp_dir,
    })
}

#[derive(Debug, Clone)]
struct CycleFrame {
    file: PathBuf,
    key: String,
}

fn render_stack(stack: &[CycleFrame], next: &CycleFrame) -> String {
    let mut entries: Vec<String> = Vec::with_capacity(stack.len() + 1);
    for frame in stack.iter().chain(std::iter::once(next)) {
        if frame.key.is_empty() {
            entries.push(format!("{:?}", frame.file.display().to_string()));
        } else {
            entries.push(format!("{:?}", format!("{} {}", frame.file.display(), frame.key)));
        }
    }
    format!("[{}]", entries.join(", "))
}

// Joins slash-separated name components the way relative paths join,
// ignoring empty parts.
fn join_name(root: &str, name: &str) -> String {
    match (root.is_empty(), name.is_empty()) {
        (true, _) => name.to_owned(),
        (_, true) => root.to_owned(),
        _ => format!("{root}/{name}"),
    }
}

struct Loader<'a> {
    config: &'a Config,
    git: &'a dyn GitOps,
    projects: Projects,
    hooks: Hooks,
    local_projects: Projects,
    update: bool,
    tmp_dir: Option<TempDir>,
    cycle_stack: Vec<CycleFrame>,
    loaded: HashSet<PathBuf>,
}

impl Loader<'_> {
    fn load_cycle_checked(
        &mut self,
        root: &str,
        file: &Path,
        cycle_key: &str,
        local_manifest: bool,
    ) -> Result<(), SyncError> {
        let frame = CycleFrame {
            file: file.to_path_buf(),
            key: cycle_key.to_owned(),
        };
        for existing in &self.cycle_stack {
            if existing.file == frame.file {
                return Err(SyncError::FileCycle(render_stack(&self.cycle_stack, &frame)));
            }
            if !frame.key.is_empty() && existing.key == frame.key {
                return Err(SyncError::RemoteCycle(render_stack(
                    &self.cycle_stack,
                    &frame,
                )));
            }
        }
        self.cycle_stack.push(frame);
        let result = self.load(root, file, local_manifest);
        self.cycle_stack.pop();
        result
    }

    fn load(&mut self, root: &str, file: &Path, local_manifest: bool) -> Result<(), SyncError> {
        if !self.loaded.insert(file.to_path_buf()) {
            return Ok(());
        }
        let manifest = Manifest::from_file(file)?;

        for import in &manifest.imports {
            self.load_remote_import(root, import, local_manifest)?;
        }

        for local in &manifest.local_imports {
            let next_file = file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(&local.file);
            self.load_cycle_checked(root, &next_file, "", local_manifest)?;
        }

        self.collect(root, file, &manifest)
    }

    fn load_remote_import(
        &mut self,
        root: &str,
        import: &Import,
        local_manifest: bool,
    ) -> Result<(), SyncError> {
        let mut import = import.clone();
        let next_root = join_name(root, &import.root);
        import.name = join_name(&next_root, &import.name);
        let key = import.project_key();

        if !self.local_projects.contains_key(&key) {
            if !self.update {
                return Err(SyncError::UnresolvedImport { key });
            }
            if local_manifest {
                tracing::info!(
                    "import {:?} not found locally, getting it from the server",
                    import.name
                );
            }
            self.clone_manifest_project(&import, &key)?;
        }

        // Reset the manifest project to the branch the import names, then
        // load the next file. The loaded revision is always the branch tip.
        let Some(mut project) = self.local_projects.get(&key).cloned() else {
            return Err(SyncError::UnresolvedImport { key });
        };
        project.revision = HEAD_REVISION.to_owned();
        project.remote_branch = import.remote_branch.clone();

        let next_file = project.path.join(&import.manifest);
        self.reset_and_load(
            &next_root,
            &next_file,
            &import.cycle_key(),
            &project,
            local_manifest,
        )
    }

    /// Clone the manifest-hosting project into the temp workspace and insert
    /// it into the known locals.
    fn clone_manifest_project(
        &mut self,
        import: &Import,
        key: &ProjectKey,
    ) -> Result<(), SyncError> {
        let tmp_root = match &self.tmp_dir {
            Some(tmp) => tmp.path().to_path_buf(),
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("jiri-load")
                    .tempdir()
                    .map_err(|e| io_err("jiri-load", e))?;
                let path = tmp.path().to_path_buf();
                self.tmp_dir = Some(tmp);
                path
            }
        };
        let path = tmp_root.join(import.clone_dir_name());
        std::fs::create_dir_all(&path).map_err(|e| io_err(&path, e))?;
        self.git.clone_repo(&import.remote, &path, None)?;

        let mut project = import.to_project(path)?;
        project.revision = HEAD_REVISION.to_owned();
        project.remote_branch = import.remote_branch.clone();
        checkout_head_revision(self.git, &project, false)?;
        self.local_projects.insert(key.clone(), project);
        Ok(())
    }

    /// Stash and detach-checkout the manifest project, recurse, and restore
    /// the original branch and stash on every exit path.
    fn reset_and_load(
        &mut self,
        root: &str,
        file: &Path,
        cycle_key: &str,
        project: &Project,
        local_manifest: bool,
    ) -> Result<(), SyncError> {
        if local_manifest {
            return self.load_cycle_checked(root, file, cycle_key, local_manifest);
        }

        if self.update {
            fetch_all(self.git, project)?;
        }

        let original = match self.git.current_branch(&project.path)? {
            Some(branch) => branch,
            None => self.git.current_revision(&project.path)?,
        };
        let stashed = self.git.stash(&project.path)?;

        let result = checkout_head_revision(self.git, project, false)
            .and_then(|()| self.load_cycle_checked(root, file, cycle_key, local_manifest));

        let mut restore = self
            .git
            .checkout(&project.path, &original, false, false)
            .map_err(SyncError::from);
        if restore.is_ok() && stashed {
            restore = self.git.stash_pop(&project.path).map_err(SyncError::from);
        }

        match (result, restore) {
            (Err(err), _) => Err(err),
            (Ok(()), Err(err)) => Err(err),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    /// Absolutize and collect this file's projects, and resolve its hooks
    /// against them.
    fn collect(&mut self, root: &str, file: &Path, manifest: &Manifest) -> Result<(), SyncError> {
        let base = self.config.root.join(root);
        let mut action_paths = std::collections::HashMap::new();

        for project in &manifest.projects {
            let mut project = project.clone();
            project.absolutize_paths(&base);
            // Hooks name projects as written in this file, before rooting.
            action_paths.insert(project.name.clone(), project.path.clone());
            project.name = join_name(root, &project.name);
            let key = project.key();
            if let Some(existing) = self.projects.get(&key) {
                if *existing != project {
                    return Err(SyncError::DuplicateProject {
                        key,
                        file: file.to_path_buf(),
                    });
                }
            }
            self.projects.insert(key, project);
        }

        for hook in &manifest.hooks {
            let mut hook = hook.clone();
            hook.validate()?;
            match action_paths.get(&hook.project_name) {
                Some(path) if !path.as_os_str().is_empty() => {
                    hook.action_path = path.clone();
                }
                _ => {
                    return Err(SyncError::UnknownHookProject {
                        hook: hook.name,
                        project: hook.project_name,
                    });
                }
            }
            self.hooks.insert(hook.key(), hook);
        }
        Ok(())
    }
}
