//! Domain types for projects, hooks, and manifest imports.
//!
//! Projects are identified by a [`ProjectKey`] composed from their name and
//! remote; hooks by a [`HookKey`] composed from their name and owning project.
//! The separator is a reserved character that may not appear in names.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;
use crate::error::CoreError;

/// Reserved separator used in [`ProjectKey`] and [`HookKey`]. It cannot occur
/// in project or hook names.
pub const KEY_SEPARATOR: &str = "=";

/// Default remote branch for projects and imports without an explicit one.
pub const DEFAULT_REMOTE_BRANCH: &str = "master";

/// Default revision, meaning "tip of the tracked remote branch".
pub const HEAD_REVISION: &str = "HEAD";

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A unique key for a project, composed of its name and remote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectKey(String);

impl ProjectKey {
    /// Compose a key from a project name and remote URL.
    pub fn new(name: &str, remote: &str) -> Self {
        ProjectKey(format!("{name}{KEY_SEPARATOR}{remote}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ProjectKey {
    fn from(s: &str) -> Self {
        ProjectKey(s.to_owned())
    }
}

/// A unique key for a hook, composed of its name and owning project name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HookKey(String);

impl HookKey {
    /// Compose a key from a hook name and its owning project name.
    pub fn new(name: &str, project_name: &str) -> Self {
        HookKey(format!("{name}{KEY_SEPARATOR}{project_name}"))
    }
}

impl fmt::Display for HookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A single repository checkout managed by jiri.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Project {
    /// Project name; may not contain [`KEY_SEPARATOR`].
    pub name: String,
    /// Checkout path. Relative to the workspace root on disk, absolute in
    /// memory once loaded.
    pub path: PathBuf,
    /// Fetch URL of the project remote.
    pub remote: String,
    /// Remote branch to track. Filled to `"master"` on load.
    pub remote_branch: String,
    /// Revision to advance to on update. Filled to `"HEAD"` on load; a
    /// non-`HEAD` revision supersedes `remote_branch`.
    pub revision: String,
    /// Gerrit host to send CLs to, when the project uses Gerrit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gerrit_host: Option<String>,
    /// Directory of git hooks installed into the project on every update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hooks: Option<PathBuf>,
    /// Key rewritten by rename detection when a local checkout matches a
    /// remote project under a different name or remote.
    #[serde(skip)]
    pub computed_key: Option<ProjectKey>,
}

impl Project {
    /// The unique key identifying this project.
    pub fn key(&self) -> ProjectKey {
        self.computed_key
            .clone()
            .unwrap_or_else(|| ProjectKey::new(&self.name, &self.remote))
    }

    /// Fill in default values for absent fields and validate.
    pub fn fill_defaults(&mut self) -> Result<(), CoreError> {
        if self.remote_branch.is_empty() {
            self.remote_branch = DEFAULT_REMOTE_BRANCH.to_owned();
        }
        if self.revision.is_empty() {
            self.revision = HEAD_REVISION.to_owned();
        }
        self.validate()
    }

    /// Unfill default values so serialization is minimal, and validate.
    pub fn unfill_defaults(&mut self) -> Result<(), CoreError> {
        if self.remote_branch == DEFAULT_REMOTE_BRANCH {
            self.remote_branch.clear();
        }
        if self.revision == HEAD_REVISION {
            self.revision.clear();
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name.contains(KEY_SEPARATOR) {
            return Err(CoreError::InvalidEntry(format!(
                "bad project {:?}: name cannot contain {KEY_SEPARATOR:?}",
                self.name
            )));
        }
        Ok(())
    }

    /// Make all relative paths absolute by prepending `base`.
    pub fn absolutize_paths(&mut self, base: &Path) {
        if !self.path.as_os_str().is_empty() && self.path.is_relative() {
            self.path = base.join(&self.path);
        }
        if let Some(hooks) = &self.git_hooks {
            if hooks.is_relative() {
                self.git_hooks = Some(base.join(hooks));
            }
        }
    }

    /// Make all absolute paths relative to `base`, so the workspace root can
    /// be moved on disk.
    pub fn relativize_paths(&mut self, base: &Path) -> Result<(), CoreError> {
        if self.path.is_absolute() {
            self.path = relative_to(&self.path, base)?;
        }
        if let Some(hooks) = &self.git_hooks {
            if hooks.is_absolute() {
                self.git_hooks = Some(relative_to(hooks, base)?);
            }
        }
        Ok(())
    }

    /// Returns the cache directory that serves as a clone reference for this
    /// project, derived from the remote URL, or `None` when no cache is
    /// configured.
    pub fn cache_dir_path(&self, config: &Config) -> Result<Option<PathBuf>, CoreError> {
        let Some(cache) = &config.cache else {
            return Ok(None);
        };
        let url = Url::parse(&self.remote).map_err(|e| CoreError::RemoteUrl {
            url: self.remote.clone(),
            message: e.to_string(),
        })?;
        let host = url.host_str().unwrap_or_default();
        let dirname = format!("{host}{}", url.path().replace('-', "--").replace('/', "-"));
        Ok(Some(cache.join(dirname)))
    }
}

fn relative_to(path: &Path, base: &Path) -> Result<PathBuf, CoreError> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .map_err(|_| {
            CoreError::InvalidEntry(format!(
                "path {} is not under workspace root {}",
                path.display(),
                base.display()
            ))
        })
}

/// Mapping from [`ProjectKey`] to [`Project`]; ordered for deterministic
/// iteration.
pub type Projects = BTreeMap<ProjectKey, Project>;

/// Returns all projects in `projects` with the given key or name.
pub fn find(projects: &Projects, key_or_name: &str) -> Projects {
    let key = ProjectKey::from(key_or_name);
    if let Some(p) = projects.get(&key) {
        return Projects::from([(key, p.clone())]);
    }
    projects
        .iter()
        .filter(|(_, p)| p.name == key_or_name)
        .map(|(k, p)| (k.clone(), p.clone()))
        .collect()
}

/// Returns the single project with the given key or name, or an error when
/// none or several match.
pub fn find_unique(projects: &Projects, key_or_name: &str) -> Result<Project, CoreError> {
    let mut found = find(projects, key_or_name).into_values();
    match (found.next(), found.next()) {
        (Some(project), None) => Ok(project),
        (None, _) => Err(CoreError::InvalidEntry(format!(
            "no projects found with key or name {key_or_name:?}"
        ))),
        (Some(_), Some(_)) => Err(CoreError::InvalidEntry(format!(
            "multiple projects found with name {key_or_name:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

/// A post-sync executable run from a project directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hook {
    /// Hook name; may not contain [`KEY_SEPARATOR`].
    pub name: String,
    /// Executable path relative to the owning project root.
    pub action: PathBuf,
    /// Name of the owning project.
    pub project_name: String,
    /// Absolute path of the owning project, attached at resolve time. An
    /// empty path after resolution is a load error.
    #[serde(skip)]
    pub action_path: PathBuf,
}

impl Hook {
    /// The unique key identifying this hook.
    pub fn key(&self) -> HookKey {
        HookKey::new(&self.name, &self.project_name)
    }

    /// Reject reserved characters in the hook name and project name.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.contains(KEY_SEPARATOR) {
            return Err(CoreError::InvalidEntry(format!(
                "bad hook {:?}: name cannot contain {KEY_SEPARATOR:?}",
                self.name
            )));
        }
        if self.project_name.contains(KEY_SEPARATOR) {
            return Err(CoreError::InvalidEntry(format!(
                "bad hook {:?}: project cannot contain {KEY_SEPARATOR:?}",
                self.name
            )));
        }
        Ok(())
    }
}

/// Mapping from [`HookKey`] to [`Hook`].
pub type Hooks = BTreeMap<HookKey, Hook>;

// ---------------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------------

/// A reference to a manifest file hosted in a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Import {
    /// Manifest file to load from the remote manifest project.
    pub manifest: String,
    /// Name of the remote manifest project, used to derive its key.
    pub name: String,
    /// Remote URL of the manifest project.
    pub remote: String,
    /// Remote branch to track. Filled to `"master"` on load.
    pub remote_branch: String,
    /// Root prefix prepended to all project paths and names specified in the
    /// imported manifest.
    pub root: String,
}

impl Import {
    pub fn fill_defaults(&mut self) -> Result<(), CoreError> {
        if self.remote_branch.is_empty() {
            self.remote_branch = DEFAULT_REMOTE_BRANCH.to_owned();
        }
        self.validate()
    }

    pub fn unfill_defaults(&mut self) -> Result<(), CoreError> {
        if self.remote_branch == DEFAULT_REMOTE_BRANCH {
            self.remote_branch.clear();
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.manifest.is_empty() || self.remote.is_empty() {
            return Err(CoreError::InvalidEntry(
                "bad import: both manifest and remote must be specified".to_owned(),
            ));
        }
        Ok(())
    }

    /// The key of the manifest-hosting project this import refers to.
    pub fn project_key(&self) -> ProjectKey {
        ProjectKey::new(&self.name, &self.remote)
    }

    /// Materialize the manifest-hosting project at `path`.
    pub fn to_project(&self, path: PathBuf) -> Result<Project, CoreError> {
        let mut p = Project {
            name: self.name.clone(),
            path,
            remote: self.remote.clone(),
            remote_branch: self.remote_branch.clone(),
            ..Project::default()
        };
        p.fill_defaults()?;
        Ok(p)
    }

    /// Directory name used when cloning the manifest-hosting project into the
    /// loader's temp workspace.
    pub fn clone_dir_name(&self) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(self.project_key().as_str().as_bytes());
        format!("{}_{:x}", self.name, hasher.finish())
    }

    /// Key used for remote import cycle detection. The remote and manifest
    /// are not joined with a url-safe character since that might not be
    /// unique.
    pub fn cycle_key(&self) -> String {
        if self.remote.is_empty() {
            return String::new();
        }
        format!("{} + {}", self.remote, self.manifest)
    }
}

/// A reference to a manifest file on the local filesystem, relative to the
/// importing manifest's directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalImport {
    /// Manifest file to import.
    pub file: PathBuf,
}

impl LocalImport {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.file.as_os_str().is_empty() {
            return Err(CoreError::InvalidEntry(
                "bad localimport: must specify file".to_owned(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
