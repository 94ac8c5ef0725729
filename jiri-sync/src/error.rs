//! Error types for jiri-sync.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use jiri_core::{CoreError, ProjectKey};

/// All errors that can arise from reconciliation and sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the core layer (codec, git, HTTP, validation).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cycle in the paths of manifest files on the local filesystem.
    #[error("import cycle detected in local manifest files: {0}")]
    FileCycle(String),

    /// A cycle in the remote manifests named by remote imports.
    #[error("import cycle detected in remote manifest imports: {0}")]
    RemoteCycle(String),

    /// A remote import could not be resolved against the known local
    /// projects, and update mode was off.
    #[error("can't resolve remote import: project {key:?} not found locally")]
    UnresolvedImport { key: ProjectKey },

    /// Two manifest entries resolved to the same key with differing content.
    #[error("duplicate project {key} found in {}", file.display())]
    DuplicateProject { key: ProjectKey, file: PathBuf },

    /// A hook names a project that does not exist in its manifest.
    #[error("invalid hook {hook:?} for project {project:?}")]
    UnknownHookProject { hook: String, project: String },

    /// The scanner found the same project key at two different paths.
    #[error("name conflict: both {} and {} contain project with key {key}", path_a.display(), path_b.display())]
    ScanConflict {
        key: ProjectKey,
        path_a: PathBuf,
        path_b: PathBuf,
    },

    /// A create operation found its destination already present.
    #[error("cannot create {} as it already exists", path.display())]
    DestinationExists { path: PathBuf },

    /// A move operation found its destination already present.
    #[error("cannot move {} to {} as the destination already exists", from_path.display(), destination.display())]
    MoveDestinationExists {
        from_path: PathBuf,
        destination: PathBuf,
    },

    /// A move or delete operation found its source missing.
    #[error("cannot {action} {} as it does not exist", path.display())]
    SourceMissing {
        action: &'static str,
        path: PathBuf,
    },

    /// Fetching a local project from its remote failed.
    #[error("fetch failed for {name}: {source}")]
    Fetch {
        name: String,
        #[source]
        source: Box<SyncError>,
    },

    /// A hook exited unsuccessfully.
    #[error("hook {name:?} failed: {status}")]
    HookFailed { name: String, status: String },

    /// A hook exceeded its deadline.
    #[error("hook {name:?} timed out after {}s", timeout.as_secs())]
    HookTimeout { name: String, timeout: Duration },

    /// Executing an operation on a project failed.
    #[error("error updating project {name:?}: {source}")]
    Project {
        name: String,
        #[source]
        source: Box<SyncError>,
    },

    /// A worker task died without producing a result.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Aggregate of errors collected from parallel workers.
    #[error(transparent)]
    Multi(#[from] MultiError),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// MultiError
// ---------------------------------------------------------------------------

/// An aggregate of any number of sync errors. The user-visible message shows
/// the first error and the count of the others.
#[derive(Debug, Default)]
pub struct MultiError(pub Vec<SyncError>);

impl MultiError {
    pub fn push(&mut self, err: SyncError) {
        self.0.push(err);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(())` when no errors were collected, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Vec<SyncError>> for MultiError {
    fn from(errs: Vec<SyncError>) -> Self {
        MultiError(errs)
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.len() {
            0 => write!(f, "(0 errors)"),
            1 => write!(f, "{}", self.0[0]),
            2 => write!(f, "{} (and 1 other error)", self.0[0]),
            n => write!(f, "{} (and {} other errors)", self.0[0], n - 1),
        }
    }
}

impl std::error::Error for MultiError {}
