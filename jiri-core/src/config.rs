//! Workspace configuration context.
//!
//! A [`Config`] is passed explicitly to every operation that touches the
//! workspace; there is no process-wide state. All derived paths are pure
//! functions of the root and never touch the filesystem.

use std::path::{Path, PathBuf};

/// Name of the per-project metadata directory at each project root.
pub const PROJECT_META_DIR: &str = ".jiri";

/// Name of the project metadata file inside [`PROJECT_META_DIR`].
pub const PROJECT_META_FILE: &str = "metadata.v2";

/// Name of the workspace-wide metadata directory at the workspace root.
pub const ROOT_META_DIR: &str = ".jiri_root";

/// Configuration for a jiri workspace.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absolute path to the workspace root; all project paths live under it.
    pub root: PathBuf,
    /// Worker budget for parallel fan-out.
    pub jobs: usize,
    /// Optional bare-repository mirror directory used as a clone reference.
    pub cache: Option<PathBuf>,
    /// Path to the root manifest file.
    pub manifest_file: PathBuf,
}

impl Config {
    /// Create a configuration rooted at `root` with default jobs and the
    /// conventional manifest location.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let manifest_file = root.join(".jiri_manifest");
        Config {
            root,
            jobs: default_jobs(),
            cache: None,
            manifest_file,
        }
    }

    /// Returns `<root>/.jiri_root`.
    pub fn root_meta_dir(&self) -> PathBuf {
        self.root.join(ROOT_META_DIR)
    }

    /// Returns the directory holding timestamped update snapshots.
    pub fn update_history_dir(&self) -> PathBuf {
        self.root_meta_dir().join("update_history")
    }

    /// Returns the `latest` snapshot symlink path.
    pub fn update_history_latest_link(&self) -> PathBuf {
        self.update_history_dir().join("latest")
    }

    /// Returns the `second-latest` snapshot symlink path.
    pub fn update_history_second_latest_link(&self) -> PathBuf {
        self.update_history_dir().join("second-latest")
    }

    /// Returns the default location of the profiles database.
    pub fn profiles_db_file(&self) -> PathBuf {
        self.root_meta_dir().join("profiles.xml")
    }
}

/// Returns the metadata directory for a project checked out at `project_path`.
pub fn project_meta_dir(project_path: &Path) -> PathBuf {
    project_path.join(PROJECT_META_DIR)
}

/// Returns the metadata file for a project checked out at `project_path`.
pub fn project_meta_file(project_path: &Path) -> PathBuf {
    project_meta_dir(project_path).join(PROJECT_META_FILE)
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths() {
        let cfg = Config::new("/workspace");
        assert_eq!(cfg.root_meta_dir(), PathBuf::from("/workspace/.jiri_root"));
        assert_eq!(
            cfg.update_history_latest_link(),
            PathBuf::from("/workspace/.jiri_root/update_history/latest")
        );
        assert_eq!(
            cfg.manifest_file,
            PathBuf::from("/workspace/.jiri_manifest")
        );
    }

    #[test]
    fn meta_paths() {
        let p = Path::new("/workspace/proj");
        assert_eq!(project_meta_dir(p), PathBuf::from("/workspace/proj/.jiri"));
        assert_eq!(
            project_meta_file(p),
            PathBuf::from("/workspace/proj/.jiri/metadata.v2")
        );
    }

    #[test]
    fn jobs_default_is_positive() {
        assert!(Config::new("/w").jobs >= 1);
    }
}
