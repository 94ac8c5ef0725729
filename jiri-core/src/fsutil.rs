//! Safe file-write protocols.
//!
//! Two protocols are used across the workspace:
//!
//! 1. `safe_write_file` — write to `<file>.tmp`, then rename. A crash between
//!    the write and the rename leaves the original intact.
//! 2. `rotate_write_file` — write new content to `<file>.<nanos>`, rename the
//!    old file to `<file>.prev`, then rename the new file into place. The
//!    previous version survives as `.prev`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{io_err, CoreError};

/// Atomically replace `path` with `data` via a `.tmp` sibling, creating
/// parent directories as needed.
pub fn safe_write_file(path: &Path, data: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp = path.with_extension(join_extension(path, "tmp"));
    std::fs::write(&tmp, data).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Replace `path` with `data` while preserving the previous version at
/// `<path>.prev`.
pub fn rotate_write_file(path: &Path, data: &[u8]) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let fresh = path.with_extension(join_extension(path, &nanos.to_string()));
    std::fs::write(&fresh, data).map_err(|e| io_err(&fresh, e))?;

    if path.exists() {
        let prev = path.with_extension(join_extension(path, "prev"));
        std::fs::rename(path, &prev).map_err(|e| io_err(&prev, e))?;
    }
    std::fs::rename(&fresh, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// `Path::with_extension` replaces an existing extension; we want to append.
fn join_extension(path: &Path, suffix: &str) -> String {
    match path.extension() {
        Some(ext) => format!("{}.{suffix}", ext.to_string_lossy()),
        None => suffix.to_owned(),
    }
}
