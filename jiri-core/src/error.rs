//! Error types for jiri-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed manifest or metadata XML.
    #[error("malformed XML: {0}")]
    Xml(String),

    /// Parse error on load, with the file that failed.
    #[error("invalid manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// An entry failed validation (missing required attributes, reserved
    /// characters in names).
    #[error("{0}")]
    InvalidEntry(String),

    /// A git invocation failed.
    #[error("git {args:?} failed: {message}")]
    Git { args: Vec<String>, message: String },

    /// An HTTP fetch failed.
    #[error("fetching {url} failed: {message}")]
    Http { url: String, message: String },

    /// A remote URL could not be parsed.
    #[error("invalid remote URL {url}: {message}")]
    RemoteUrl { url: String, message: String },
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
