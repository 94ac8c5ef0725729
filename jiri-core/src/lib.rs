//! jiri core library — configuration, manifest model and codec, project
//! identity, and the external-service traits the sync machinery is built on.
//!
//! Public API surface:
//! - [`config`] — [`Config`] context and metadata path conventions
//! - [`error`] — [`CoreError`]
//! - [`manifest`] — [`Manifest`] model and XML codec
//! - [`project`] — [`Project`], [`Hook`], keys, and imports
//! - [`gitops`] — [`GitOps`] trait and the `git` CLI implementation
//! - [`remote`] — [`RemoteIndex`] and [`HttpFetch`] contracts
//! - [`fsutil`] — safe-write protocols

pub mod config;
pub mod error;
pub mod fsutil;
pub mod gitops;
pub mod manifest;
pub mod project;
pub mod remote;

pub use config::Config;
pub use error::CoreError;
pub use gitops::{GitCli, GitOps};
pub use manifest::Manifest;
pub use project::{Hook, HookKey, Hooks, Import, LocalImport, Project, ProjectKey, Projects};
pub use remote::{HttpFetch, RemoteIndex, RepoStatus};
