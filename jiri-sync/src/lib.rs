//! jiri sync library — everything between a manifest and an up-to-date
//! workspace.
//!
//! - [`loader`] — recursive manifest resolution with cycle detection
//! - [`scan`] — local project discovery (fast and full)
//! - [`matcher`] — rename detection between local and remote sets
//! - [`plan`] — the operation decision table, ordering, and execution
//! - [`engine`] — update universe: parallel prefetch, sequential operations
//! - [`project_sync`] — the per-project checkout/rebase state machine
//! - [`hooks`] — parallel post-sync hook execution with timeouts
//! - [`snapshot`] — snapshot create/checkout and update history
//! - [`error`] — [`SyncError`] and [`MultiError`]

pub mod engine;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod matcher;
pub mod plan;
pub mod project_sync;
pub mod scan;
pub mod snapshot;

pub use engine::{update_universe, SyncCtx, UpdateOptions};
pub use error::{MultiError, SyncError};
pub use loader::{load_manifest_file, LoadedWorld};
pub use plan::{compute_operations, OpKind, Operation};
pub use scan::ScanMode;
pub use snapshot::{checkout_snapshot, create_snapshot, write_update_history_snapshot};
